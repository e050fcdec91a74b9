//! Compaction
//!
//! Background k-way merge of segments. The foreground engine enqueues
//! requests over a channel and never blocks on the result; worker errors are
//! logged and skipped, never surfaced to foreground reads or writes.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crossbeam::channel::Receiver;

use crate::error::Result;

use super::manager::SegmentStore;
use super::segment::{SegmentBuilder, SegmentIterator, SegmentReader};

/// Requests understood by the compaction worker
pub enum CompactionMessage {
    /// Check tier occupancy and compact until nothing is over threshold
    Compact,
    /// Drain and exit
    Shutdown,
}

/// Worker loop: runs on a dedicated thread until shutdown
pub fn compaction_worker(receiver: Receiver<CompactionMessage>, store: Arc<SegmentStore>) {
    loop {
        match receiver.recv() {
            Ok(CompactionMessage::Compact) => loop {
                match store.maybe_compact() {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "compaction failed, skipping");
                        break;
                    }
                }
            },
            Ok(CompactionMessage::Shutdown) | Err(_) => break,
        }
    }
}

/// One candidate entry in the k-way merge
struct MergeEntry {
    key: Vec<u8>,
    seq: u64,
    /// None means tombstone
    value: Option<Vec<u8>>,
    /// Which input iterator produced this entry
    src: usize,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.seq == other.seq
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so the max-heap pops the smallest key first; among equal keys the
// highest seq (newest write) comes out first and wins
impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .cmp(&self.key)
            .then(self.seq.cmp(&other.seq))
            .then(other.src.cmp(&self.src))
    }
}

/// Merge `inputs` into `builder`, keeping the highest-seq entry per key
///
/// A tombstone survives the merge only if some segment outside the merge
/// might still hold the key — otherwise there is nothing left to resurrect
/// and the tombstone's work is done.
pub(super) fn merge_segments(
    inputs: &[Arc<SegmentReader>],
    outside: &[Arc<SegmentReader>],
    builder: &mut SegmentBuilder,
) -> Result<()> {
    let mut iters: Vec<SegmentIterator> = inputs
        .iter()
        .map(|reader| reader.iter())
        .collect::<Result<Vec<_>>>()?;

    let mut heap = BinaryHeap::new();
    for (src, iter) in iters.iter_mut().enumerate() {
        if let Some(first) = iter.next() {
            let (key, seq, value) = first?;
            heap.push(MergeEntry { key, seq, value, src });
        }
    }

    let mut last_key: Option<Vec<u8>> = None;
    while let Some(entry) = heap.pop() {
        // Refill from the source that just yielded
        if let Some(next) = iters[entry.src].next() {
            let (key, seq, value) = next?;
            heap.push(MergeEntry { key, seq, value, src: entry.src });
        }

        // Duplicate key: a newer version was already written
        if last_key.as_deref() == Some(entry.key.as_slice()) {
            continue;
        }
        last_key = Some(entry.key.clone());

        match entry.value {
            Some(value) => builder.add(&entry.key, &value, entry.seq)?,
            None => {
                let still_needed = outside.iter().any(|seg| seg.might_contain(&entry.key));
                if still_needed {
                    builder.add_tombstone(&entry.key, entry.seq)?;
                }
            }
        }
    }

    Ok(())
}
