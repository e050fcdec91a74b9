//! MemTable implementation
//!
//! BTreeMap-based memtable with RwLock for concurrency. Each entry records
//! the sequence number of the write that produced it; within one map a later
//! write simply replaces the earlier one, so the stored seq is always the
//! highest for that key.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{Entries, MemTableEntry};

/// Fixed bookkeeping cost charged per entry when estimating byte footprint
const ENTRY_OVERHEAD: usize = 32;

/// In-memory table for recent writes
///
/// Holds an active map that accepts writes and, during a flush, a frozen
/// snapshot of the previous active map. Readers consult active first, then
/// frozen; the frozen map is discarded only after its segment is durable.
pub struct MemTable {
    /// Mutable map receiving writes (engine write path only)
    active: RwLock<Entries>,

    /// Snapshot being flushed, shadowed by `active`
    frozen: RwLock<Option<Arc<Entries>>>,

    /// Approximate byte footprint of the active map
    size: AtomicUsize,

    /// Entry count of the active map
    entry_count: AtomicUsize,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self {
            active: RwLock::new(BTreeMap::new()),
            frozen: RwLock::new(None),
            size: AtomicUsize::new(0),
            entry_count: AtomicUsize::new(0),
        }
    }

    /// Insert a value; returns the new approximate size of the active map
    pub fn apply_put(&self, key: Vec<u8>, value: Vec<u8>, seq: u64) -> usize {
        self.apply(key, (seq, MemTableEntry::Value(value)))
    }

    /// Insert a tombstone; returns the new approximate size of the active map
    pub fn apply_delete(&self, key: Vec<u8>, seq: u64) -> usize {
        self.apply(key, (seq, MemTableEntry::Tombstone))
    }

    fn apply(&self, key: Vec<u8>, entry: (u64, MemTableEntry)) -> usize {
        let key_len = key.len();
        let new_val = value_len(&entry.1);

        let mut active = self.active.write();
        let old = active.insert(key, entry);
        drop(active);

        match old {
            // Overwrite: key and per-entry overhead are already charged,
            // only the value delta changes the footprint
            Some((_, old_entry)) => {
                let old_val = value_len(&old_entry);
                if new_val >= old_val {
                    self.size.fetch_add(new_val - old_val, Ordering::Relaxed) + (new_val - old_val)
                } else {
                    self.size.fetch_sub(old_val - new_val, Ordering::Relaxed) - (old_val - new_val)
                }
            }
            None => {
                self.entry_count.fetch_add(1, Ordering::Relaxed);
                let added = ENTRY_OVERHEAD + key_len + new_val;
                self.size.fetch_add(added, Ordering::Relaxed) + added
            }
        }
    }

    /// Latest visible entry for a key, or None if the key is absent
    ///
    /// Checks the active map, then the frozen snapshot.
    pub fn get(&self, key: &[u8]) -> Option<(u64, MemTableEntry)> {
        if let Some(entry) = self.active.read().get(key) {
            return Some(entry.clone());
        }
        if let Some(frozen) = self.frozen.read().as_ref() {
            return frozen.get(key).cloned();
        }
        None
    }

    /// Ordered snapshot of all entries in `[start, end)`
    ///
    /// Active entries shadow frozen ones for the same key. `None` bounds are
    /// unbounded on that side.
    pub fn range(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Vec<(Vec<u8>, u64, MemTableEntry)> {
        if let (Some(s), Some(e)) = (start, end) {
            if s >= e {
                return Vec::new();
            }
        }
        let lo = start.map_or(Bound::Unbounded, Bound::Included);
        let hi = end.map_or(Bound::Unbounded, Bound::Excluded);

        let mut merged: Entries = BTreeMap::new();
        if let Some(frozen) = self.frozen.read().as_ref() {
            for (key, entry) in frozen.range::<[u8], _>((lo, hi)) {
                merged.insert(key.clone(), entry.clone());
            }
        }
        for (key, entry) in self.active.read().range::<[u8], _>((lo, hi)) {
            merged.insert(key.clone(), entry.clone());
        }

        merged
            .into_iter()
            .map(|(key, (seq, entry))| (key, seq, entry))
            .collect()
    }

    /// Approximate byte footprint of the active map
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Entry count of the active map
    pub fn entry_count(&self) -> usize {
        self.entry_count.load(Ordering::Relaxed)
    }

    /// Whether the active map holds no entries
    pub fn is_empty(&self) -> bool {
        self.entry_count() == 0
    }

    /// Whether a frozen snapshot is awaiting flush
    pub fn has_frozen(&self) -> bool {
        self.frozen.read().is_some()
    }

    /// The frozen snapshot awaiting flush, if any (used to retry a failed
    /// flush without re-freezing)
    pub fn frozen_snapshot(&self) -> Option<Arc<Entries>> {
        self.frozen.read().clone()
    }

    /// Move the active map into the frozen slot and return it
    ///
    /// Returns None if the active map is empty. The caller must consume the
    /// previous frozen snapshot (via `discard_frozen`) before freezing again;
    /// the engine guarantees this by flushing under the write lock.
    pub fn freeze(&self) -> Option<Arc<Entries>> {
        let mut active = self.active.write();
        if active.is_empty() {
            return None;
        }
        let snapshot = Arc::new(std::mem::take(&mut *active));
        drop(active);

        self.size.store(0, Ordering::Relaxed);
        self.entry_count.store(0, Ordering::Relaxed);
        *self.frozen.write() = Some(Arc::clone(&snapshot));
        Some(snapshot)
    }

    /// Drop the frozen snapshot once its segment is durable
    pub fn discard_frozen(&self) {
        *self.frozen.write() = None;
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

fn value_len(entry: &MemTableEntry) -> usize {
    match entry {
        MemTableEntry::Value(v) => v.len(),
        MemTableEntry::Tombstone => 0,
    }
}
