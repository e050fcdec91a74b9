//! Tests for the segment storage layer
//!
//! These tests verify:
//! - Segment build/read round trips, including tombstones
//! - Sparse index lookups at small intervals
//! - Bloom filter behavior
//! - Whole-file checksum validation
//! - Manifest persistence and atomic rewrite
//! - SegmentStore flush, lookup precedence, and compaction

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sprucedb::memtable::{Entries, MemTableEntry};
use sprucedb::storage::{
    BloomFilter, Manifest, SegmentBuilder, SegmentLookup, SegmentMeta, SegmentReader, SegmentStore,
};
use sprucedb::Config;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_segment() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.seg");
    (temp_dir, path)
}

fn test_config(dir: &Path) -> Config {
    Config::builder()
        .data_dir(dir)
        .index_interval(4)
        .compaction_fan_out(2)
        .build()
}

/// Build a segment with `count` numbered entries, seqs starting at `first_seq`
fn build_segment_with_entries(path: &Path, id: u64, count: usize, first_seq: u64) -> SegmentMeta {
    let mut builder = SegmentBuilder::new(path, id, count, 4, 10).unwrap();
    // Keys must be added in sorted order
    for i in 0..count {
        let key = format!("key{:05}", i); // Zero-padded for lexicographic order
        let value = format!("value{}", i);
        builder.add(key.as_bytes(), value.as_bytes(), first_seq + i as u64).unwrap();
    }
    builder.finish().unwrap()
}

/// A memtable-shaped snapshot for SegmentStore::flush
fn snapshot(entries: &[(&str, Option<&str>, u64)]) -> Entries {
    let mut map = BTreeMap::new();
    for (key, value, seq) in entries {
        let entry = match value {
            Some(v) => MemTableEntry::Value(v.as_bytes().to_vec()),
            None => MemTableEntry::Tombstone,
        };
        map.insert(key.as_bytes().to_vec(), (*seq, entry));
    }
    map
}

fn max_seq(entries: &Entries) -> u64 {
    entries.values().map(|(seq, _)| *seq).max().unwrap_or(0)
}

// =============================================================================
// Builder + Reader Round Trips
// =============================================================================

#[test]
fn test_builder_creates_readable_segment() {
    let (_temp, path) = setup_temp_segment();

    let meta = build_segment_with_entries(&path, 1, 5, 1);
    assert!(path.exists());
    assert_eq!(meta.entry_count, 5);
    assert_eq!(meta.min_key.as_ref(), b"key00000");
    assert_eq!(meta.max_key.as_ref(), b"key00004");
    assert_eq!(meta.max_seq, 5);
    assert!(meta.size_bytes > 0);

    let reader = SegmentReader::open(&path, meta).unwrap();
    assert_eq!(reader.entry_count(), 5);
}

#[test]
fn test_lookup_every_key() {
    let (_temp, path) = setup_temp_segment();

    let meta = build_segment_with_entries(&path, 1, 100, 1);
    let reader = SegmentReader::open(&path, meta).unwrap();

    for i in 0..100 {
        let key = format!("key{:05}", i);
        match reader.get(key.as_bytes()).unwrap() {
            SegmentLookup::Value { value, seq } => {
                assert_eq!(value, format!("value{}", i).into_bytes());
                assert_eq!(seq, 1 + i as u64);
            }
            other => panic!("expected value for {}, got {:?}", key, other),
        }
    }
}

#[test]
fn test_lookup_missing_keys() {
    let (_temp, path) = setup_temp_segment();

    let meta = build_segment_with_entries(&path, 1, 10, 1);
    let reader = SegmentReader::open(&path, meta).unwrap();

    // Before, between, and after the stored range
    assert_eq!(reader.get(b"key").unwrap(), SegmentLookup::NotFound);
    assert_eq!(reader.get(b"key00003a").unwrap(), SegmentLookup::NotFound);
    assert_eq!(reader.get(b"zzz").unwrap(), SegmentLookup::NotFound);
}

#[test]
fn test_tombstone_round_trip() {
    let (_temp, path) = setup_temp_segment();

    let mut builder = SegmentBuilder::new(&path, 1, 3, 4, 10).unwrap();
    builder.add(b"alpha", b"1", 1).unwrap();
    builder.add_tombstone(b"beta", 2).unwrap();
    builder.add(b"gamma", b"3", 3).unwrap();
    let meta = builder.finish().unwrap();

    let reader = SegmentReader::open(&path, meta).unwrap();

    assert!(matches!(reader.get(b"alpha").unwrap(), SegmentLookup::Value { .. }));
    assert_eq!(reader.get(b"beta").unwrap(), SegmentLookup::Tombstone { seq: 2 });
    assert!(matches!(reader.get(b"gamma").unwrap(), SegmentLookup::Value { .. }));
}

#[test]
fn test_builder_rejects_unsorted_keys() {
    let (_temp, path) = setup_temp_segment();

    let mut builder = SegmentBuilder::new(&path, 1, 2, 4, 10).unwrap();
    builder.add(b"banana", b"1", 1).unwrap();
    assert!(builder.add(b"apple", b"2", 2).is_err());
}

#[test]
fn test_builder_rejects_duplicate_keys() {
    let (_temp, path) = setup_temp_segment();

    let mut builder = SegmentBuilder::new(&path, 1, 2, 4, 10).unwrap();
    builder.add(b"key", b"1", 1).unwrap();
    assert!(builder.add(b"key", b"2", 2).is_err());
}

#[test]
fn test_iterator_yields_all_entries_in_order() {
    let (_temp, path) = setup_temp_segment();

    let meta = build_segment_with_entries(&path, 1, 25, 1);
    let reader = SegmentReader::open(&path, meta).unwrap();

    let entries: Vec<_> = reader.iter().unwrap().collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(entries.len(), 25);

    for (i, (key, seq, value)) in entries.iter().enumerate() {
        assert_eq!(key, format!("key{:05}", i).as_bytes());
        assert_eq!(*seq, 1 + i as u64);
        assert_eq!(value.as_deref(), Some(format!("value{}", i).as_bytes()));
    }
}

// =============================================================================
// Sparse Index Tests
// =============================================================================

#[test]
fn test_sparse_index_interval_one() {
    let (_temp, path) = setup_temp_segment();

    // Every entry indexed
    let mut builder = SegmentBuilder::new(&path, 1, 10, 1, 10).unwrap();
    for i in 0..10 {
        builder.add(format!("k{:02}", i).as_bytes(), b"v", i as u64 + 1).unwrap();
    }
    let meta = builder.finish().unwrap();
    let reader = SegmentReader::open(&path, meta).unwrap();

    for i in 0..10 {
        assert!(matches!(
            reader.get(format!("k{:02}", i).as_bytes()).unwrap(),
            SegmentLookup::Value { .. }
        ));
    }
}

#[test]
fn test_sparse_index_wide_interval() {
    let (_temp, path) = setup_temp_segment();

    // One index entry per 64 data entries: lookups scan within an interval
    let mut builder = SegmentBuilder::new(&path, 1, 200, 64, 10).unwrap();
    for i in 0..200 {
        builder
            .add(format!("k{:04}", i).as_bytes(), format!("v{}", i).as_bytes(), i as u64 + 1)
            .unwrap();
    }
    let meta = builder.finish().unwrap();
    let reader = SegmentReader::open(&path, meta).unwrap();

    for i in [0, 1, 63, 64, 65, 127, 128, 199] {
        match reader.get(format!("k{:04}", i).as_bytes()).unwrap() {
            SegmentLookup::Value { value, .. } => assert_eq!(value, format!("v{}", i).into_bytes()),
            other => panic!("expected value for k{:04}, got {:?}", i, other),
        }
    }
    assert_eq!(reader.get(b"k0063a").unwrap(), SegmentLookup::NotFound);
}

// =============================================================================
// Bloom Filter Tests
// =============================================================================

#[test]
fn test_bloom_no_false_negatives() {
    let mut bloom = BloomFilter::with_capacity(100, 10);
    for i in 0..100 {
        bloom.insert(format!("key{}", i).as_bytes());
    }
    for i in 0..100 {
        assert!(bloom.might_contain(format!("key{}", i).as_bytes()));
    }
}

#[test]
fn test_bloom_rejects_most_absent_keys() {
    let mut bloom = BloomFilter::with_capacity(100, 10);
    for i in 0..100 {
        bloom.insert(format!("key{}", i).as_bytes());
    }

    let mut false_positives = 0;
    for i in 0..1000 {
        if bloom.might_contain(format!("absent{}", i).as_bytes()) {
            false_positives += 1;
        }
    }
    // 10 bits/key with 3 probes should stay well under a 10% FP rate
    assert!(false_positives < 100, "false positive rate too high: {}/1000", false_positives);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_reader_rejects_corrupted_file() {
    let (_temp, path) = setup_temp_segment();

    let meta = build_segment_with_entries(&path, 1, 10, 1);

    // Flip one byte in the data block
    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(20)).unwrap();
    file.write_all(&[0xFF]).unwrap();
    file.sync_all().unwrap();

    let result = SegmentReader::open(&path, meta);
    assert!(matches!(result, Err(sprucedb::SpruceError::Corruption(_))));
}

#[test]
fn test_reader_rejects_truncated_file() {
    let (_temp, path) = setup_temp_segment();

    let meta = build_segment_with_entries(&path, 1, 10, 1);

    let len = fs::metadata(&path).unwrap().len();
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len / 2).unwrap();

    assert!(SegmentReader::open(&path, meta).is_err());
}

// =============================================================================
// Manifest Tests
// =============================================================================

#[test]
fn test_manifest_load_missing_is_empty() {
    let temp = TempDir::new().unwrap();
    let manifest = Manifest::load(&temp.path().join("MANIFEST")).unwrap();

    assert_eq!(manifest.last_applied_seq, 0);
    assert!(manifest.segments.is_empty());
}

#[test]
fn test_manifest_save_load_round_trip() {
    let temp = TempDir::new().unwrap();
    let manifest_path = temp.path().join("MANIFEST");

    let seg_path = temp.path().join("seg1.seg");
    let meta = build_segment_with_entries(&seg_path, 7, 3, 10);

    let mut manifest = Manifest::default();
    manifest.last_applied_seq = 12;
    manifest.segments.push(meta);
    manifest.save(&manifest_path).unwrap();

    let loaded = Manifest::load(&manifest_path).unwrap();
    assert_eq!(loaded.last_applied_seq, 12);
    assert_eq!(loaded.segments.len(), 1);
    assert_eq!(loaded.segments[0].id, 7);
    assert_eq!(loaded.max_segment_id(), 7);
    assert!(loaded.segment(7).is_some());
    assert!(loaded.segment(8).is_none());
}

#[test]
fn test_manifest_rewrite_replaces_contents() {
    let temp = TempDir::new().unwrap();
    let manifest_path = temp.path().join("MANIFEST");

    let mut manifest = Manifest::default();
    manifest.last_applied_seq = 5;
    manifest.save(&manifest_path).unwrap();

    manifest.last_applied_seq = 9;
    manifest.save(&manifest_path).unwrap();

    let loaded = Manifest::load(&manifest_path).unwrap();
    assert_eq!(loaded.last_applied_seq, 9);
}

#[test]
fn test_manifest_rejects_corruption() {
    let temp = TempDir::new().unwrap();
    let manifest_path = temp.path().join("MANIFEST");

    let mut manifest = Manifest::default();
    manifest.last_applied_seq = 5;
    manifest.save(&manifest_path).unwrap();

    let mut data = fs::read(&manifest_path).unwrap();
    data[0] ^= 0xFF;
    fs::write(&manifest_path, data).unwrap();

    assert!(matches!(
        Manifest::load(&manifest_path),
        Err(sprucedb::SpruceError::Corruption(_))
    ));
}

// =============================================================================
// SegmentStore Tests
// =============================================================================

#[test]
fn test_store_flush_and_get() {
    let temp = TempDir::new().unwrap();
    let store = SegmentStore::open(temp.path(), &test_config(temp.path())).unwrap();

    let entries = snapshot(&[("a", Some("1"), 1), ("b", None, 2), ("c", Some("3"), 3)]);
    store.flush(&entries, max_seq(&entries)).unwrap();

    assert_eq!(store.segment_count(), 1);
    assert_eq!(store.last_applied_seq(), 3);

    assert!(matches!(store.get(b"a").unwrap(), SegmentLookup::Value { .. }));
    assert!(matches!(store.get(b"b").unwrap(), SegmentLookup::Tombstone { .. }));
    assert_eq!(store.get(b"missing").unwrap(), SegmentLookup::NotFound);
}

#[test]
fn test_store_newest_segment_wins() {
    let temp = TempDir::new().unwrap();
    let store = SegmentStore::open(temp.path(), &test_config(temp.path())).unwrap();

    let old = snapshot(&[("key", Some("old"), 1)]);
    store.flush(&old, 1).unwrap();
    let new = snapshot(&[("key", Some("new"), 2)]);
    store.flush(&new, 2).unwrap();

    match store.get(b"key").unwrap() {
        SegmentLookup::Value { value, seq } => {
            assert_eq!(value, b"new".to_vec());
            assert_eq!(seq, 2);
        }
        other => panic!("expected newest value, got {:?}", other),
    }
}

#[test]
fn test_store_reopen_recovers_segments() {
    let temp = TempDir::new().unwrap();

    {
        let store = SegmentStore::open(temp.path(), &test_config(temp.path())).unwrap();
        let entries = snapshot(&[("persisted", Some("yes"), 1)]);
        store.flush(&entries, 1).unwrap();
    }

    let store = SegmentStore::open(temp.path(), &test_config(temp.path())).unwrap();
    assert_eq!(store.segment_count(), 1);
    assert!(matches!(store.get(b"persisted").unwrap(), SegmentLookup::Value { .. }));
}

#[test]
fn test_store_removes_orphan_files() {
    let temp = TempDir::new().unwrap();

    let segments_dir = temp.path().join("segments");
    fs::create_dir_all(&segments_dir).unwrap();
    let orphan = segments_dir.join("segment_000099.seg");
    fs::write(&orphan, b"never committed").unwrap();

    let _store = SegmentStore::open(temp.path(), &test_config(temp.path())).unwrap();
    assert!(!orphan.exists());
}

// =============================================================================
// Compaction Tests
// =============================================================================

#[test]
fn test_compaction_preserves_lookups() {
    let temp = TempDir::new().unwrap();
    let store = SegmentStore::open(temp.path(), &test_config(temp.path())).unwrap();

    store.flush(&snapshot(&[("a", Some("1"), 1), ("b", Some("2"), 2)]), 2).unwrap();
    store.flush(&snapshot(&[("b", Some("2x"), 3), ("c", Some("3"), 4)]), 4).unwrap();
    store.flush(&snapshot(&[("a", None, 5), ("d", Some("4"), 6)]), 6).unwrap();

    let ids: Vec<u64> = store.live_metas().iter().map(|m| m.id).collect();
    store.compact(&ids).unwrap().unwrap();

    assert_eq!(store.segment_count(), 1);
    assert_eq!(store.get(b"a").unwrap(), SegmentLookup::NotFound); // tombstone dropped entirely
    assert!(
        matches!(store.get(b"b").unwrap(), SegmentLookup::Value { value, .. } if value == b"2x")
    );
    assert!(matches!(store.get(b"c").unwrap(), SegmentLookup::Value { .. }));
    assert!(matches!(store.get(b"d").unwrap(), SegmentLookup::Value { .. }));
}

#[test]
fn test_compaction_deletes_input_files() {
    let temp = TempDir::new().unwrap();
    let store = SegmentStore::open(temp.path(), &test_config(temp.path())).unwrap();

    store.flush(&snapshot(&[("a", Some("1"), 1)]), 1).unwrap();
    store.flush(&snapshot(&[("b", Some("2"), 2)]), 2).unwrap();

    let segments_dir = temp.path().join("segments");
    let before = fs::read_dir(&segments_dir).unwrap().count();
    assert_eq!(before, 2);

    let ids: Vec<u64> = store.live_metas().iter().map(|m| m.id).collect();
    store.compact(&ids).unwrap().unwrap();

    // No scans hold references, so superseded files go immediately
    let after = fs::read_dir(&segments_dir).unwrap().count();
    assert_eq!(after, 1);
}

#[test]
fn test_compaction_drops_tombstone_when_nothing_older_remains() {
    let temp = TempDir::new().unwrap();
    let store = SegmentStore::open(temp.path(), &test_config(temp.path())).unwrap();

    store.flush(&snapshot(&[("doomed", Some("v"), 1)]), 1).unwrap();
    store.flush(&snapshot(&[("doomed", None, 2)]), 2).unwrap();

    let ids: Vec<u64> = store.live_metas().iter().map(|m| m.id).collect();
    let meta = store.compact(&ids).unwrap().unwrap();

    // Value and tombstone annihilate: the merged segment is empty
    assert_eq!(meta.entry_count, 0);
    assert_eq!(store.get(b"doomed").unwrap(), SegmentLookup::NotFound);
}

#[test]
fn test_compaction_keeps_tombstone_when_older_segment_remains() {
    let temp = TempDir::new().unwrap();
    let store = SegmentStore::open(temp.path(), &test_config(temp.path())).unwrap();

    store.flush(&snapshot(&[("key", Some("old"), 1)]), 1).unwrap();
    store.flush(&snapshot(&[("other", Some("x"), 2)]), 2).unwrap();
    store.flush(&snapshot(&[("key", None, 3)]), 3).unwrap();

    // Merge only the two newest; the oldest still holds "key"
    let mut ids: Vec<u64> = store.live_metas().iter().map(|m| m.id).collect();
    ids.sort();
    let newest_two = vec![ids[1], ids[2]];
    store.compact(&newest_two).unwrap().unwrap();

    // The tombstone must survive the merge, or "old" would resurrect
    assert!(matches!(store.get(b"key").unwrap(), SegmentLookup::Tombstone { .. }));
}

#[test]
fn test_maybe_compact_respects_fan_out() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp.path())
        .index_interval(4)
        .compaction_fan_out(2)
        .build();
    let store = SegmentStore::open(temp.path(), &config).unwrap();

    store.flush(&snapshot(&[("a", Some("1"), 1)]), 1).unwrap();
    store.flush(&snapshot(&[("b", Some("2"), 2)]), 2).unwrap();
    assert!(!store.maybe_compact().unwrap()); // 2 segments, fan-out 2: not over

    store.flush(&snapshot(&[("c", Some("3"), 3)]), 3).unwrap();
    assert!(store.maybe_compact().unwrap()); // 3 > 2: compacts

    assert_eq!(store.segment_count(), 1);
    for key in [b"a".as_ref(), b"b".as_ref(), b"c".as_ref()] {
        assert!(matches!(store.get(key).unwrap(), SegmentLookup::Value { .. }));
    }
}
