//! Write-Ahead Log (WAL) Module
//!
//! Provides durability guarantees through append-only logging.
//!
//! ## Responsibilities
//! - Append log records before any mutation becomes visible
//! - CRC32 checksums for corruption detection
//! - Globally monotonic sequence numbers for ordering
//! - File rotation and truncation after flushes
//! - Crash recovery and replay
//!
//! ## File Format
//!
//! The log directory holds rotating files (`wal_000001.log`, ...) named by a
//! monotonically increasing rotation index. Each file is a sequence of frames:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Frame 1                                 │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ Seq (8) │ CRC (4) │Len (4) │Payload │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Frame 2                                 │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ Seq (8) │ CRC (4) │Len (4) │Payload │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The payload is the bincode encoding of the operation plus a timestamp; the
//! CRC covers the seq bytes, the length bytes, and the payload. A corrupt or
//! partial trailing frame is cut during recovery — everything before it is
//! trusted, everything after it is unrecoverable by design.

mod record;
mod writer;
mod reader;
mod recovery;

pub use record::{Operation, WalRecord, FRAME_HEADER_SIZE};
pub use writer::WalWriter;
pub use reader::WalReader;
pub use recovery::{RecoveryResult, WalRecovery};
