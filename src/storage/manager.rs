//! Segment Store
//!
//! Manages the set of live segments and coordinates reads, flushes, and
//! compactions against the manifest.
//!
//! ## Responsibilities
//! - Discover live segments from the manifest on startup
//! - Delete orphan segment files the manifest never committed
//! - Serve point lookups across segments, newest data first
//! - Create new segments from memtable flushes
//! - Select and execute size-tiered compactions
//!
//! ## Concurrency
//! - `readers`: RwLock'd list, sorted by max contained seq descending.
//!   Lookups clone the `Arc`s out under a read guard and probe lock-free.
//! - `manifest`: Mutex'd in-memory copy of the durable state; every change
//!   is saved to disk before the reader list reflects it.
//! - `next_segment_id`: atomic counter, lock-free.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::error::{Result, SpruceError};
use crate::memtable::{Entries, MemTableEntry};

use super::compaction::merge_segments;
use super::manifest::{Manifest, MANIFEST_FILENAME};
use super::segment::{SegmentBuilder, SegmentLookup, SegmentMeta, SegmentReader};

/// Subdirectory of the data dir holding segment files
const SEGMENT_DIR: &str = "segments";

/// Manages the storage layer
pub struct SegmentStore {
    /// Directory where segment files are stored
    segments_dir: PathBuf,

    /// Path of the manifest file
    manifest_path: PathBuf,

    /// In-memory copy of the durable manifest
    manifest: Mutex<Manifest>,

    /// Open readers, sorted by max contained seq descending (newest data
    /// first); a flush inserts at the front, a compaction re-sorts
    readers: RwLock<Vec<Arc<SegmentReader>>>,

    /// Next id for creating new segments (atomic, lock-free)
    next_segment_id: AtomicU64,

    // Policy knobs, copied out of the config
    index_interval: usize,
    bloom_bits_per_key: usize,
    compaction_fan_out: usize,
    /// Capacity of the smallest size tier; each tier up multiplies by fan-out
    tier_base: u64,
}

impl SegmentStore {
    /// Open or create storage under the given data directory
    ///
    /// On startup:
    /// 1. Load the manifest (empty if none exists)
    /// 2. Open a reader for every listed segment (checksum-validated)
    /// 3. Delete orphan segment files the manifest does not name
    pub fn open(data_dir: &Path, config: &Config) -> Result<Self> {
        let segments_dir = data_dir.join(SEGMENT_DIR);
        fs::create_dir_all(&segments_dir)?;
        let manifest_path = data_dir.join(MANIFEST_FILENAME);

        let manifest = Manifest::load(&manifest_path)?;

        let mut readers = Vec::new();
        for meta in &manifest.segments {
            let path = Self::segment_path_with_dir(&segments_dir, meta.id);
            let reader = SegmentReader::open(&path, meta.clone())?;
            readers.push(Arc::new(reader));
        }
        sort_readers(&mut readers);

        // A crash between segment fsync and manifest rename can leave files
        // the manifest never committed; they are invisible and reclaimable
        for entry in fs::read_dir(&segments_dir)? {
            let path = entry?.path();
            if let Some(id) = Self::parse_segment_id(&path) {
                if manifest.segment(id).is_none() {
                    tracing::warn!(path = %path.display(), "removing orphan segment file");
                    let _ = fs::remove_file(&path);
                }
            }
        }

        let next_id = manifest.max_segment_id() + 1;

        Ok(Self {
            segments_dir,
            manifest_path,
            manifest: Mutex::new(manifest),
            readers: RwLock::new(readers),
            next_segment_id: AtomicU64::new(next_id),
            index_interval: config.index_interval,
            bloom_bits_per_key: config.bloom_bits_per_key,
            compaction_fan_out: config.compaction_fan_out,
            tier_base: config.memtable_size_limit as u64,
        })
    }

    /// Highest sequence number durably flushed into a segment
    pub fn last_applied_seq(&self) -> u64 {
        self.manifest.lock().last_applied_seq
    }

    /// Look up a key across all segments
    ///
    /// Probes newest-data-first and keeps the hit with the highest sequence
    /// number. Because the list is sorted by max contained seq, the probe
    /// stops as soon as no remaining segment could beat the current hit.
    pub fn get(&self, key: &[u8]) -> Result<SegmentLookup> {
        let readers = self.snapshot();

        let mut best = SegmentLookup::NotFound;
        for reader in &readers {
            if let Some(best_seq) = best.seq() {
                if reader.max_seq() < best_seq {
                    break;
                }
            }
            match reader.get(key)? {
                SegmentLookup::NotFound => continue,
                hit => {
                    let hit_seq = hit.seq().unwrap_or(0);
                    if best.seq().map_or(true, |best_seq| hit_seq > best_seq) {
                        best = hit;
                    }
                }
            }
        }

        Ok(best)
    }

    /// Flush a frozen memtable snapshot to a new segment
    ///
    /// The segment becomes visible only after its manifest entry is durably
    /// committed; `last_seq` becomes the new flush high-water mark.
    pub fn flush(&self, entries: &Entries, last_seq: u64) -> Result<SegmentMeta> {
        if entries.is_empty() {
            return Err(SpruceError::Storage("cannot flush an empty snapshot".to_string()));
        }

        let id = self.next_segment_id.fetch_add(1, Ordering::SeqCst);
        let path = self.segment_path(id);

        let mut builder = SegmentBuilder::new(
            &path,
            id,
            entries.len(),
            self.index_interval,
            self.bloom_bits_per_key,
        )?;

        // BTreeMap iteration is already in ascending key order
        let result = (|| -> Result<()> {
            for (key, (seq, entry)) in entries {
                match entry {
                    MemTableEntry::Value(v) => builder.add(key, v, *seq)?,
                    MemTableEntry::Tombstone => builder.add_tombstone(key, *seq)?,
                }
            }
            Ok(())
        })();
        if let Err(e) = result {
            builder.discard();
            return Err(e);
        }

        let meta = match builder.finish() {
            Ok(meta) => meta,
            Err(e) => {
                // finish consumed the builder; clean the partial file directly
                let _ = fs::remove_file(&path);
                return Err(e);
            }
        };

        let reader = Arc::new(SegmentReader::open(&path, meta.clone())?);

        // Manifest commit is the visibility point
        {
            let mut manifest = self.manifest.lock();
            let mut next = manifest.clone();
            next.segments.push(meta.clone());
            next.last_applied_seq = next.last_applied_seq.max(last_seq);
            next.save(&self.manifest_path)?;
            *manifest = next;
        }

        // Freshly flushed data has the highest seqs; front keeps the sort
        self.readers.write().insert(0, reader);

        tracing::debug!(
            segment = id,
            entries = meta.entry_count,
            bytes = meta.size_bytes,
            "flushed memtable to segment"
        );

        Ok(meta)
    }

    /// Run one compaction if any size tier is over the fan-out threshold
    ///
    /// Returns whether a compaction was performed.
    pub fn maybe_compact(&self) -> Result<bool> {
        let Some(input_ids) = self.pick_compaction() else {
            return Ok(false);
        };
        self.compact(&input_ids)?;
        Ok(true)
    }

    /// Select the lowest size tier holding more than fan-out segments
    fn pick_compaction(&self) -> Option<Vec<u64>> {
        let manifest = self.manifest.lock();
        let mut tiers: std::collections::BTreeMap<u32, Vec<u64>> = std::collections::BTreeMap::new();
        for meta in &manifest.segments {
            tiers
                .entry(tier_of(meta.size_bytes, self.tier_base, self.compaction_fan_out as u64))
                .or_default()
                .push(meta.id);
        }
        tiers
            .into_iter()
            .find(|(_, ids)| ids.len() > self.compaction_fan_out)
            .map(|(_, ids)| ids)
    }

    /// Merge the given segments into one, taking the highest-seq entry per
    /// key and dropping tombstones no remaining older segment could
    /// resurrect
    pub fn compact(&self, input_ids: &[u64]) -> Result<Option<SegmentMeta>> {
        let readers = self.snapshot();
        let inputs: Vec<Arc<SegmentReader>> = readers
            .iter()
            .filter(|r| input_ids.contains(&r.id()))
            .cloned()
            .collect();
        if inputs.len() < 2 {
            return Ok(None);
        }
        let outside: Vec<Arc<SegmentReader>> = readers
            .iter()
            .filter(|r| !input_ids.contains(&r.id()))
            .cloned()
            .collect();

        let out_id = self.next_segment_id.fetch_add(1, Ordering::SeqCst);
        let out_path = self.segment_path(out_id);
        let expected: usize = inputs.iter().map(|r| r.entry_count() as usize).sum();

        let mut builder = SegmentBuilder::new(
            &out_path,
            out_id,
            expected,
            self.index_interval,
            self.bloom_bits_per_key,
        )?;

        if let Err(e) = merge_segments(&inputs, &outside, &mut builder) {
            builder.discard();
            return Err(e);
        }
        let meta = match builder.finish() {
            Ok(meta) => meta,
            Err(e) => {
                let _ = fs::remove_file(&out_path);
                return Err(e);
            }
        };

        let reader = Arc::new(SegmentReader::open(&out_path, meta.clone())?);

        // Manifest swap: inputs out, output in, one durable step
        {
            let mut manifest = self.manifest.lock();
            let mut next = manifest.clone();
            next.segments.retain(|m| !input_ids.contains(&m.id));
            next.segments.push(meta.clone());
            next.save(&self.manifest_path)?;
            *manifest = next;
        }

        // Swap the reader list; superseded files go when their last
        // reference (including in-flight scans) drops
        {
            let mut list = self.readers.write();
            list.retain(|r| {
                if input_ids.contains(&r.id()) {
                    r.mark_obsolete();
                    false
                } else {
                    true
                }
            });
            list.push(reader);
            sort_readers(&mut list);
        }

        tracing::info!(
            inputs = input_ids.len(),
            output = out_id,
            entries = meta.entry_count,
            bytes = meta.size_bytes,
            "compacted segments"
        );

        Ok(Some(meta))
    }

    /// Current readers, newest data first
    pub fn snapshot(&self) -> Vec<Arc<SegmentReader>> {
        self.readers.read().clone()
    }

    /// Number of live segments
    pub fn segment_count(&self) -> usize {
        self.readers.read().len()
    }

    /// Metadata of every live segment
    pub fn live_metas(&self) -> Vec<SegmentMeta> {
        self.manifest.lock().segments.clone()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Generate the file path for a segment with the given id
    fn segment_path(&self, id: u64) -> PathBuf {
        Self::segment_path_with_dir(&self.segments_dir, id)
    }

    /// Generate a segment path given a directory and id
    fn segment_path_with_dir(dir: &Path, id: u64) -> PathBuf {
        dir.join(format!("segment_{:06}.seg", id))
    }

    /// Parse a segment id from a filename
    /// "segment_000042.seg" → Some(42)
    fn parse_segment_id(path: &Path) -> Option<u64> {
        let name = path.file_stem()?.to_string_lossy();
        let id_str = name.strip_prefix("segment_")?;
        id_str.parse().ok()
    }
}

/// Sort readers by max contained seq descending, ties by id descending
fn sort_readers(readers: &mut [Arc<SegmentReader>]) {
    readers.sort_by(|a, b| {
        b.max_seq()
            .cmp(&a.max_seq())
            .then(b.id().cmp(&a.id()))
    });
}

/// Size tier of a segment: tier capacity starts at `base` and multiplies by
/// `fan_out` per tier
fn tier_of(size_bytes: u64, base: u64, fan_out: u64) -> u32 {
    let mut tier = 0u32;
    let mut capacity = base.max(1);
    while size_bytes > capacity && tier < 32 {
        tier += 1;
        capacity = capacity.saturating_mul(fan_out.max(2));
    }
    tier
}
