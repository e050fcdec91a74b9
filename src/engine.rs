//! Engine Module
//!
//! The core storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Coordinate WAL, MemTable, and the segment store
//! - Handle concurrent read/write access
//! - Freeze and flush the memtable when it crosses the size threshold
//! - Recover from the manifest and WAL on startup
//! - Feed the background compaction worker
//!
//! ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
//!
//! - **Writes** (put/delete/flush): serialized by `write_lock`
//!   - Only ONE write operation at a time
//!   - Order of acquisition: write_lock → WAL → memtable → store
//!   - The WAL append under the write lock makes append order THE global
//!     sequence order
//!
//! - **Reads** (get/scan): never take the write lock
//!   - MemTable uses an internal RwLock (many concurrent readers)
//!   - Segment readers are immutable files shared through `Arc`s
//!   - A flush freezes the memtable and publishes the segment with an atomic
//!     manifest rewrite, so readers never observe a half-flushed table or a
//!     half-written segment

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{unbounded, Sender};
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{Result, SpruceError};
use crate::memtable::{Entries, MemTable, MemTableEntry};
use crate::storage::{
    compaction_worker, CompactionMessage, SegmentIterator, SegmentLookup, SegmentReader,
    SegmentStore,
};
use crate::wal::{Operation, WalRecovery, WalWriter};

/// Keys above this size are rejected up front
const MAX_KEY_BYTES: usize = 64 * 1024;

/// The main storage engine
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Directory holding the rotating WAL files
    wal_dir: PathBuf,

    /// Write-ahead log for durability (exclusive access needed)
    wal: Mutex<WalWriter>,

    /// In-memory table for recent writes (internal RwLock)
    memtable: MemTable,

    /// Persistent segment store (internal RwLock on the reader list)
    store: Arc<SegmentStore>,

    /// Serializes write operations (put/delete/flush)
    write_lock: Mutex<()>,

    /// Work queue feeding the compaction worker
    compaction_tx: Sender<CompactionMessage>,

    /// Worker thread, joined on close
    compaction_handle: Mutex<Option<JoinHandle<()>>>,

    /// Set once shutdown has run, so close + Drop don't run it twice
    closed: AtomicBool,
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const WAL_DIR: &'static str = "wal";

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Create the data directory tree
    /// 2. Load the manifest and open the listed segments
    /// 3. Replay WAL records newer than the flush high-water mark into a
    ///    fresh memtable (read-only: re-running recovery over the same disk
    ///    state always yields the same view)
    /// 4. Start the compaction worker
    pub fn open(config: Config) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;
        let wal_dir = config.data_dir.join(Self::WAL_DIR);

        let store = Arc::new(SegmentStore::open(&config.data_dir, &config)?);
        let memtable = MemTable::new();

        // Replay: only records above the manifest's high-water mark are live
        let last_applied = store.last_applied_seq();
        let (records, stats) = WalRecovery::recover(&wal_dir)?;
        let mut replayed = 0u64;
        for record in records {
            if record.seq <= last_applied {
                continue;
            }
            match record.operation {
                Operation::Put { key, value } => {
                    memtable.apply_put(key, value, record.seq);
                }
                Operation::Delete { key } => {
                    memtable.apply_delete(key, record.seq);
                }
            }
            replayed += 1;
        }
        if stats.records_recovered > 0 || stats.records_corrupted > 0 {
            tracing::info!(
                recovered = stats.records_recovered,
                replayed,
                corrupted = stats.records_corrupted,
                last_seq = stats.last_seq,
                truncated = stats.was_truncated,
                "WAL recovery complete"
            );
        }

        let start_seq = last_applied.max(stats.last_seq) + 1;
        let wal = WalWriter::open(&wal_dir, start_seq, config.wal_sync_strategy)?;

        let (compaction_tx, compaction_rx) = unbounded();
        let worker_store = Arc::clone(&store);
        let handle = std::thread::Builder::new()
            .name("spruce-compaction".to_string())
            .spawn(move || compaction_worker(compaction_rx, worker_store))?;

        // A previous run may have left a tier over threshold
        let _ = compaction_tx.send(CompactionMessage::Compact);

        Ok(Self {
            config,
            wal_dir,
            wal: Mutex::new(wal),
            memtable,
            store,
            write_lock: Mutex::new(()),
            compaction_tx,
            compaction_handle: Mutex::new(Some(handle)),
            closed: AtomicBool::new(false),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses the default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config)
    }

    /// Get a value by key
    ///
    /// Search order:
    /// 1. MemTable — active map, then frozen snapshot (most recent writes)
    /// 2. Segments, newest data first
    ///
    /// A tombstone anywhere along the way is a miss.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some((_, entry)) = self.memtable.get(key) {
            return Ok(match entry {
                MemTableEntry::Value(value) => Some(value),
                MemTableEntry::Tombstone => None,
            });
        }

        match self.store.get(key)? {
            SegmentLookup::Value { value, .. } => Ok(Some(value)),
            SegmentLookup::Tombstone { .. } | SegmentLookup::NotFound => Ok(None),
        }
    }

    /// Put a key-value pair
    ///
    /// Steps:
    /// 1. Acquire the write lock
    /// 2. Append to the WAL (durability point)
    /// 3. Apply to the MemTable (visibility point)
    /// 4. Flush if the size threshold is exceeded
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        validate_key(key)?;
        let _write_guard = self.write_lock.lock();

        let seq = self.wal.lock().append(Operation::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        })?;

        let new_size = self.memtable.apply_put(key.to_vec(), value.to_vec(), seq);

        if new_size >= self.config.memtable_size_limit {
            self.flush_internal()?;
        }

        Ok(())
    }

    /// Delete a key
    ///
    /// Writes a tombstone; the key vanishes from reads immediately and the
    /// older values are reclaimed by compaction.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        validate_key(key)?;
        let _write_guard = self.write_lock.lock();

        let seq = self.wal.lock().append(Operation::Delete { key: key.to_vec() })?;

        let new_size = self.memtable.apply_delete(key.to_vec(), seq);

        if new_size >= self.config.memtable_size_limit {
            self.flush_internal()?;
        }

        Ok(())
    }

    /// Scan keys in `[start, end)` in ascending order
    ///
    /// Produces a lazy merge over the memtable and every segment: one cursor
    /// per source, the globally-smallest key advancing each step, newest
    /// version winning per key, tombstones suppressed. Dropping the iterator
    /// early releases every cursor and file handle.
    pub fn scan(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<ScanIterator> {
        // An inverted or empty range scans nothing
        if let (Some(s), Some(e)) = (start, end) {
            if s >= e {
                return ScanIterator::new(Vec::new(), Vec::new(), None, None);
            }
        }

        let mem_entries = self.memtable.range(start, end);
        let readers = self.store.snapshot();
        ScanIterator::new(
            mem_entries,
            readers,
            start.map(|s| s.to_vec()),
            end.map(|e| e.to_vec()),
        )
    }

    /// Flush the memtable to a segment (public API)
    ///
    /// Forces a flush regardless of memtable size
    pub fn flush(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        self.flush_internal()
    }

    /// Internal flush implementation (called with the write lock held)
    fn flush_internal(&self) -> Result<()> {
        // A failed flush leaves its frozen snapshot behind; retry it before
        // freezing anything else
        if let Some(frozen) = self.memtable.frozen_snapshot() {
            self.flush_frozen(&frozen)?;
        }

        if self.memtable.is_empty() {
            return Ok(());
        }

        // Seal the WAL file so it covers exactly the frozen records
        self.wal.lock().rotate()?;

        let frozen = match self.memtable.freeze() {
            Some(frozen) => frozen,
            None => return Ok(()),
        };
        self.flush_frozen(&frozen)
    }

    /// Write a frozen snapshot to a segment, then truncate the WAL
    fn flush_frozen(&self, frozen: &Entries) -> Result<()> {
        let last_seq = frozen.values().map(|(seq, _)| *seq).max().unwrap_or(0);

        self.store.flush(frozen, last_seq)?;
        self.memtable.discard_frozen();
        self.wal.lock().truncate(last_seq)?;

        let _ = self.compaction_tx.send(CompactionMessage::Compact);
        Ok(())
    }

    /// Close the engine gracefully
    ///
    /// Flushes pending data, syncs the WAL, and stops the compaction worker.
    /// Dropping an unclosed engine performs the same shutdown best-effort.
    pub fn close(self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let result = (|| -> Result<()> {
            let _write_guard = self.write_lock.lock();
            self.flush_internal()?;
            self.wal.lock().sync()?;
            Ok(())
        })();

        let _ = self.compaction_tx.send(CompactionMessage::Shutdown);
        if let Some(handle) = self.compaction_handle.lock().take() {
            let _ = handle.join();
        }

        result
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the WAL directory path
    pub fn wal_dir(&self) -> &Path {
        &self.wal_dir
    }

    /// Get the current memtable size
    pub fn memtable_size(&self) -> usize {
        self.memtable.size()
    }

    /// Get the memtable entry count
    pub fn memtable_entry_count(&self) -> usize {
        self.memtable.entry_count()
    }

    /// Get the number of live segments
    pub fn segment_count(&self) -> usize {
        self.store.segment_count()
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            if let Err(e) = self.shutdown() {
                tracing::warn!(error = %e, "engine shutdown on drop failed");
            }
        }
    }
}

fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(SpruceError::Storage("key must not be empty".to_string()));
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(SpruceError::Storage(format!(
            "key exceeds max size of {} bytes",
            MAX_KEY_BYTES
        )));
    }
    Ok(())
}

// =============================================================================
// Scan Iterator
// =============================================================================

/// One candidate entry in the scan merge
struct HeapEntry {
    key: Vec<u8>,
    seq: u64,
    /// None means tombstone
    value: Option<Vec<u8>>,
    /// Which source produced this entry
    src: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

// Reversed so the max-heap pops the smallest key first; among equal keys the
// highest seq (newest write) comes out first and wins
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .key
            .cmp(&self.key)
            .then(self.seq.cmp(&other.seq))
            .then(other.src.cmp(&self.src))
    }
}

enum ScanSource {
    /// Snapshot of the memtable (active shadowing frozen), already bounded
    Mem {
        entries: Vec<(Vec<u8>, u64, MemTableEntry)>,
        pos: usize,
    },
    /// Sequential cursor over one segment, with its own file handle; the
    /// `Arc` keeps a superseded segment's file alive until the scan ends
    Segment {
        iter: SegmentIterator,
        _reader: Arc<SegmentReader>,
    },
}

/// Lazy, ordered merge over the memtable and all segments
///
/// Yields `(key, value)` pairs in ascending key order, one per live key.
pub struct ScanIterator {
    heap: BinaryHeap<HeapEntry>,
    sources: Vec<ScanSource>,
    last_key: Option<Vec<u8>>,
    start: Option<Vec<u8>>,
    end: Option<Vec<u8>>,
    done: bool,
}

impl ScanIterator {
    fn new(
        mem_entries: Vec<(Vec<u8>, u64, MemTableEntry)>,
        readers: Vec<Arc<SegmentReader>>,
        start: Option<Vec<u8>>,
        end: Option<Vec<u8>>,
    ) -> Result<Self> {
        let mut sources = Vec::with_capacity(1 + readers.len());
        sources.push(ScanSource::Mem { entries: mem_entries, pos: 0 });
        for reader in readers {
            let iter = reader.iter()?;
            sources.push(ScanSource::Segment { iter, _reader: reader });
        }

        let mut scan = Self {
            heap: BinaryHeap::new(),
            sources,
            last_key: None,
            start,
            end,
            done: false,
        };

        // Prime one entry per source
        for src in 0..scan.sources.len() {
            if let Some(entry) = scan.advance_source(src)? {
                scan.heap.push(entry);
            }
        }

        Ok(scan)
    }

    /// Pull the next in-bounds entry from one source
    fn advance_source(&mut self, src: usize) -> Result<Option<HeapEntry>> {
        loop {
            let (key, seq, value) = match &mut self.sources[src] {
                ScanSource::Mem { entries, pos } => {
                    if *pos >= entries.len() {
                        return Ok(None);
                    }
                    let (key, seq, entry) = entries[*pos].clone();
                    *pos += 1;
                    let value = match entry {
                        MemTableEntry::Value(v) => Some(v),
                        MemTableEntry::Tombstone => None,
                    };
                    (key, seq, value)
                }
                ScanSource::Segment { iter, .. } => match iter.next() {
                    None => return Ok(None),
                    Some(item) => item?,
                },
            };

            // Memtable entries are pre-bounded; segment cursors filter here
            if let Some(start) = &self.start {
                if &key < start {
                    continue;
                }
            }
            if let Some(end) = &self.end {
                if &key >= end {
                    // Sources are sorted, nothing further can be in bounds
                    return Ok(None);
                }
            }

            return Ok(Some(HeapEntry { key, seq, value, src }));
        }
    }
}

impl Iterator for ScanIterator {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let entry = self.heap.pop()?;

            // Refill from the source that just yielded
            match self.advance_source(entry.src) {
                Ok(Some(next_entry)) => self.heap.push(next_entry),
                Ok(None) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }

            // Duplicate key: a newer version was already considered
            if self.last_key.as_deref() == Some(entry.key.as_slice()) {
                continue;
            }
            self.last_key = Some(entry.key.clone());

            match entry.value {
                Some(value) => return Some(Ok((entry.key, value))),
                // Tombstone: the key is dead, skip it
                None => continue,
            }
        }
    }
}
