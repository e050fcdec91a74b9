//! Configuration for SpruceDB
//!
//! Centralized configuration with sensible defaults. All thresholds here are
//! policy, not wire format — changing them does not invalidate existing data.

use std::path::PathBuf;

/// Main configuration for a SpruceDB instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files (WAL, segments, manifest).
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── wal/             (rotating WAL files)
    ///     ├── segments/        (immutable segment files)
    ///     └── MANIFEST         (live segment list + last applied seq)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the WAL
    pub wal_sync_strategy: WalSyncStrategy,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Max size of the memtable before flush (in bytes)
    pub memtable_size_limit: usize,

    // -------------------------------------------------------------------------
    // Segment Configuration
    // -------------------------------------------------------------------------
    /// One sparse index entry is recorded every `index_interval` data entries
    pub index_interval: usize,

    /// Bloom filter budget per key, in bits
    pub bloom_bits_per_key: usize,

    /// Segments per size tier before that tier is compacted
    pub compaction_fan_out: usize,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./spruce_data"),
            wal_sync_strategy: WalSyncStrategy::EveryWrite,
            memtable_size_limit: 4 * 1024 * 1024, // 4 MiB
            index_interval: 16,
            bloom_bits_per_key: 10,
            compaction_fan_out: 4,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.memtable_size_limit = size;
        self
    }

    /// Set the sparse index interval (entries per index record)
    pub fn index_interval(mut self, interval: usize) -> Self {
        self.config.index_interval = interval.max(1);
        self
    }

    /// Set the bloom filter size in bits per key
    pub fn bloom_bits_per_key(mut self, bits: usize) -> Self {
        self.config.bloom_bits_per_key = bits.max(1);
        self
    }

    /// Set the compaction fan-out (segments per tier before merging)
    pub fn compaction_fan_out(mut self, fan_out: usize) -> Self {
        self.config.compaction_fan_out = fan_out.max(2);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
