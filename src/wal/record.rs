//! WAL record definitions
//!
//! Defines the structure and wire framing of individual WAL records.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Frame header size: seq (8) + crc (4) + len (4)
pub const FRAME_HEADER_SIZE: usize = 16;

/// Upper bound on a single frame payload. Anything larger in a frame header
/// is treated as corruption rather than attempted as an allocation.
pub(crate) const MAX_PAYLOAD_LEN: u32 = 64 * 1024 * 1024;

/// A single record in the WAL
#[derive(Debug, Clone)]
pub struct WalRecord {
    /// Sequence number — globally monotonic, assigned by the writer
    pub seq: u64,

    /// The operation to perform
    pub operation: Operation,

    /// Timestamp (unix millis) when the record was created
    pub timestamp_ms: u64,
}

/// Operations that can be logged
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operation {
    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { key: Vec<u8> },
}

impl Operation {
    /// The key this operation touches
    pub fn key(&self) -> &[u8] {
        match self {
            Operation::Put { key, .. } => key,
            Operation::Delete { key } => key,
        }
    }
}

/// Frame payload: everything except the seq, which lives in the frame header
#[derive(Debug, Serialize, Deserialize)]
struct RecordBody {
    operation: Operation,
    timestamp_ms: u64,
}

impl WalRecord {
    /// Create a record stamped with the current wall-clock time
    pub fn new(seq: u64, operation: Operation) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self { seq, operation, timestamp_ms }
    }

    /// Serialize to a complete frame: `[seq][crc][len][payload]`
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(&RecordBody {
            operation: self.operation.clone(),
            timestamp_ms: self.timestamp_ms,
        })?;

        let seq_bytes = self.seq.to_le_bytes();
        let len_bytes = (payload.len() as u32).to_le_bytes();

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&seq_bytes);
        hasher.update(&len_bytes);
        hasher.update(&payload);
        let crc = hasher.finalize();

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&seq_bytes);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame.extend_from_slice(&len_bytes);
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Reassemble a record from frame header fields and a verified payload
    pub(crate) fn decode(seq: u64, payload: &[u8]) -> Result<Self> {
        let body: RecordBody = bincode::deserialize(payload)?;
        Ok(Self {
            seq,
            operation: body.operation,
            timestamp_ms: body.timestamp_ms,
        })
    }

    /// Verify the CRC for a frame's header fields and payload
    pub(crate) fn verify_crc(seq: u64, len: u32, crc: u32, payload: &[u8]) -> bool {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&seq.to_le_bytes());
        hasher.update(&len.to_le_bytes());
        hasher.update(payload);
        hasher.finalize() == crc
    }
}
