//! Tests for the MemTable
//!
//! These tests verify:
//! - Basic put/get/delete with sequence numbers
//! - Tombstone visibility
//! - Size and entry count tracking
//! - Ordered range snapshots
//! - Freeze semantics during flushes

use sprucedb::memtable::{MemTable, MemTableEntry};

// =============================================================================
// Basic Operations
// =============================================================================

#[test]
fn test_put_and_get() {
    let table = MemTable::new();

    table.apply_put(b"hello".to_vec(), b"world".to_vec(), 1);

    let (seq, entry) = table.get(b"hello").unwrap();
    assert_eq!(seq, 1);
    assert_eq!(entry, MemTableEntry::Value(b"world".to_vec()));
}

#[test]
fn test_get_missing_key() {
    let table = MemTable::new();
    assert!(table.get(b"nope").is_none());
}

#[test]
fn test_overwrite_keeps_latest() {
    let table = MemTable::new();

    table.apply_put(b"key".to_vec(), b"v1".to_vec(), 1);
    table.apply_put(b"key".to_vec(), b"v2".to_vec(), 2);

    let (seq, entry) = table.get(b"key").unwrap();
    assert_eq!(seq, 2);
    assert_eq!(entry, MemTableEntry::Value(b"v2".to_vec()));
    assert_eq!(table.entry_count(), 1);
}

#[test]
fn test_delete_inserts_tombstone() {
    let table = MemTable::new();

    table.apply_put(b"key".to_vec(), b"value".to_vec(), 1);
    table.apply_delete(b"key".to_vec(), 2);

    let (seq, entry) = table.get(b"key").unwrap();
    assert_eq!(seq, 2);
    assert_eq!(entry, MemTableEntry::Tombstone);
}

#[test]
fn test_delete_without_prior_put() {
    let table = MemTable::new();

    table.apply_delete(b"ghost".to_vec(), 1);

    // The tombstone itself is present — it must shadow older segment data
    let (_, entry) = table.get(b"ghost").unwrap();
    assert_eq!(entry, MemTableEntry::Tombstone);
}

// =============================================================================
// Size Tracking
// =============================================================================

#[test]
fn test_size_grows_with_inserts() {
    let table = MemTable::new();
    assert_eq!(table.size(), 0);
    assert!(table.is_empty());

    let after_first = table.apply_put(b"key1".to_vec(), b"value1".to_vec(), 1);
    assert!(after_first > 0);

    let after_second = table.apply_put(b"key2".to_vec(), b"value2".to_vec(), 2);
    assert!(after_second > after_first);

    assert_eq!(table.entry_count(), 2);
    assert!(!table.is_empty());
}

#[test]
fn test_size_tracks_value_delta_on_overwrite() {
    let table = MemTable::new();

    let small = table.apply_put(b"key".to_vec(), b"v".to_vec(), 1);
    let bigger = table.apply_put(b"key".to_vec(), vec![0u8; 100], 2);
    assert!(bigger > small);

    let shrunk = table.apply_put(b"key".to_vec(), b"v".to_vec(), 3);
    assert_eq!(shrunk, small);
}

// =============================================================================
// Range Snapshots
// =============================================================================

#[test]
fn test_range_returns_sorted_entries() {
    let table = MemTable::new();

    table.apply_put(b"cherry".to_vec(), b"3".to_vec(), 1);
    table.apply_put(b"apple".to_vec(), b"1".to_vec(), 2);
    table.apply_put(b"banana".to_vec(), b"2".to_vec(), 3);

    let entries = table.range(None, None);
    let keys: Vec<&[u8]> = entries.iter().map(|(k, _, _)| k.as_slice()).collect();
    assert_eq!(keys, vec![b"apple".as_ref(), b"banana".as_ref(), b"cherry".as_ref()]);
}

#[test]
fn test_range_respects_bounds() {
    let table = MemTable::new();

    for (i, key) in [b"a", b"b", b"c", b"d", b"e"].iter().enumerate() {
        table.apply_put(key.to_vec(), b"v".to_vec(), i as u64 + 1);
    }

    // [b, d) — start inclusive, end exclusive
    let entries = table.range(Some(b"b"), Some(b"d"));
    let keys: Vec<&[u8]> = entries.iter().map(|(k, _, _)| k.as_slice()).collect();
    assert_eq!(keys, vec![b"b".as_ref(), b"c".as_ref()]);
}

#[test]
fn test_range_includes_tombstones() {
    let table = MemTable::new();

    table.apply_put(b"alive".to_vec(), b"v".to_vec(), 1);
    table.apply_delete(b"dead".to_vec(), 2);

    let entries = table.range(None, None);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].2, MemTableEntry::Tombstone);
}

#[test]
fn test_range_inverted_bounds_is_empty() {
    let table = MemTable::new();
    table.apply_put(b"k".to_vec(), b"v".to_vec(), 1);

    assert!(table.range(Some(b"z"), Some(b"a")).is_empty());
}

// =============================================================================
// Freeze Semantics
// =============================================================================

#[test]
fn test_freeze_empties_active_but_keeps_reads() {
    let table = MemTable::new();

    table.apply_put(b"key".to_vec(), b"value".to_vec(), 1);

    let snapshot = table.freeze().unwrap();
    assert_eq!(snapshot.len(), 1);

    // Active is empty, but the frozen snapshot still serves reads
    assert_eq!(table.entry_count(), 0);
    assert_eq!(table.size(), 0);
    assert!(table.has_frozen());

    let (_, entry) = table.get(b"key").unwrap();
    assert_eq!(entry, MemTableEntry::Value(b"value".to_vec()));
}

#[test]
fn test_freeze_empty_returns_none() {
    let table = MemTable::new();
    assert!(table.freeze().is_none());
}

#[test]
fn test_active_shadows_frozen() {
    let table = MemTable::new();

    table.apply_put(b"key".to_vec(), b"old".to_vec(), 1);
    table.freeze().unwrap();
    table.apply_put(b"key".to_vec(), b"new".to_vec(), 2);

    let (seq, entry) = table.get(b"key").unwrap();
    assert_eq!(seq, 2);
    assert_eq!(entry, MemTableEntry::Value(b"new".to_vec()));

    // The range snapshot deduplicates the same way
    let entries = table.range(None, None);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].1, 2);
}

#[test]
fn test_discard_frozen_drops_snapshot() {
    let table = MemTable::new();

    table.apply_put(b"key".to_vec(), b"value".to_vec(), 1);
    table.freeze().unwrap();
    table.discard_frozen();

    assert!(!table.has_frozen());
    assert!(table.get(b"key").is_none());
}

#[test]
fn test_writes_during_flush_are_visible() {
    let table = MemTable::new();

    table.apply_put(b"flushed".to_vec(), b"v1".to_vec(), 1);
    table.freeze().unwrap();

    // New writes land in a fresh active map while the snapshot is "on disk"
    table.apply_put(b"recent".to_vec(), b"v2".to_vec(), 2);

    assert!(table.get(b"flushed").is_some());
    assert!(table.get(b"recent").is_some());

    let entries = table.range(None, None);
    assert_eq!(entries.len(), 2);
}
