//! Storage Module
//!
//! Persistent storage layer: immutable sorted segments, the manifest that
//! names the live ones, and background compaction.
//!
//! ## Responsibilities
//! - Persist flushed memtables as sorted segment files
//! - Point lookups with bloom filters and sparse indexes
//! - Atomic manifest updates (write-to-temp, then rename)
//! - Size-tiered compaction to bound read amplification
//! - Reclaim superseded segments once no reader holds a reference
//!
//! ## Segment File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Header (8 bytes)                                            │
//! │   Magic: "SPDB" (4) | Version: u16 (2) | Reserved: u16 (2)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Data Block (variable, sorted by key)                        │
//! │   [KeyLen: u32][ValLen: u32][Seq: u64][Key][Value]          │
//! │   ... repeated for each entry ...                           │
//! │   (ValLen = u32::MAX means tombstone, no value bytes)       │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Index Block (variable, sparse: every Nth entry)             │
//! │   [KeyLen: u32][Offset: u64][Key]                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Bloom Block (variable)                                      │
//! │   [BitLen: u32][Bits]                                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Footer (32 bytes)                                           │
//! │   IndexOffset: u64 | BloomOffset: u64 | EntryCount: u64 |   │
//! │   FileCRC: u32 | Reserved: u32                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! `FileCRC` covers every byte before the footer and is validated when a
//! segment is opened.

mod segment;
mod manifest;
mod manager;
mod compaction;

pub use segment::{
    BloomFilter, SegmentBuilder, SegmentIterator, SegmentLookup, SegmentMeta, SegmentReader,
};
pub use manifest::Manifest;
pub use manager::SegmentStore;
pub use compaction::{compaction_worker, CompactionMessage};
