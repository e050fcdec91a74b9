//! # SpruceDB
//!
//! An embedded, single-process, persistent key-value storage engine with:
//! - Write-Ahead Logging (WAL) for durability
//! - Crash recovery with partial write handling
//! - Single-writer/multi-reader concurrency model
//! - Immutable sorted segments with sparse indexes and bloom filters
//! - Background size-tiered compaction
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Engine                                │
//! │            (Single Writer / Multi Reader)                    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │     WAL     │          │  MemTable   │
//!   │  (Append)   │          │  (RwLock)   │
//!   └─────────────┘          └──────┬──────┘
//!                                   │ flush
//!                                   ▼
//!                           ┌─────────────┐     ┌────────────┐
//!                           │  Segments   │◄────│ Compaction │
//!                           │ + Manifest  │     │  (worker)  │
//!                           └─────────────┘     └────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod wal;
pub mod memtable;
pub mod storage;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, SpruceError};
pub use config::Config;
pub use engine::{Engine, ScanIterator};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of SpruceDB
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
