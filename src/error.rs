//! Error types for SpruceDB
//!
//! Provides a unified error type for all operations.
//!
//! A `get` miss is NOT an error — it is `Ok(None)`. Errors here are reserved
//! for failures: disk I/O, corruption, exhausted capacity, bad configuration.

use thiserror::Error;

/// Result type alias using SpruceError
pub type Result<T> = std::result::Result<T, SpruceError>;

/// Unified error type for SpruceDB operations
#[derive(Debug, Error)]
pub enum SpruceError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Disk full during flush or compaction. The in-memory and WAL state is
    /// left intact so the operation can be retried after space is freed.
    #[error("capacity exhausted: {0}")]
    Capacity(String),

    // -------------------------------------------------------------------------
    // Corruption
    // -------------------------------------------------------------------------
    /// Checksum or framing mismatch in a WAL frame or segment file.
    #[error("corruption detected: {0}")]
    Corruption(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("storage error: {0}")]
    Storage(String),

    #[error("manifest error: {0}")]
    Manifest(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("configuration error: {0}")]
    Config(String),
}

impl SpruceError {
    /// Map an I/O error, promoting disk-full conditions to `Capacity`.
    pub fn from_io(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::StorageFull {
            SpruceError::Capacity(err.to_string())
        } else {
            SpruceError::Io(err)
        }
    }
}

impl From<bincode::Error> for SpruceError {
    fn from(err: bincode::Error) -> Self {
        SpruceError::Serialization(err.to_string())
    }
}
