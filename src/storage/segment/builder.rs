//! Segment Builder
//!
//! Writes sorted key-value entries to a new segment file, accumulating the
//! sparse index, the bloom filter, and the whole-file checksum as it goes.
//! The entry count lives in the footer, so nothing is ever patched in place
//! and the checksum covers the header too.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::error::{Result, SpruceError};

use super::bloom::BloomFilter;
use super::{SegmentMeta, FOOTER_SIZE, MAGIC, TOMBSTONE_MARKER, VERSION};

/// Builder for creating new segments from sorted entries
pub struct SegmentBuilder {
    /// Segment identifier, recorded in the returned metadata
    id: u64,
    /// Output file path
    path: PathBuf,
    /// Buffered writer for performance
    writer: BufWriter<File>,
    /// Number of entries written
    entry_count: u64,
    /// Current write position (for the index)
    current_offset: u64,
    /// Sparse index: every Nth key → file offset of its entry
    index: Vec<(Vec<u8>, u64)>,
    /// One index record per this many data entries
    index_interval: usize,
    /// Bloom filter over all keys
    bloom: BloomFilter,
    /// Track min/max keys for metadata
    min_key: Option<Vec<u8>>,
    max_key: Option<Vec<u8>>,
    /// Highest sequence number seen
    max_seq: u64,
    /// Last key added, for enforcing sort order
    last_key: Option<Vec<u8>>,
    /// Running CRC hasher over every byte before the footer
    file_hasher: crc32fast::Hasher,
}

impl SegmentBuilder {
    /// Create a new segment builder
    ///
    /// Writes the header immediately; call `add()`/`add_tombstone()` in
    /// strictly ascending key order, then `finish()` to write the index,
    /// bloom filter, and footer.
    pub fn new(
        path: &Path,
        id: u64,
        expected_entries: usize,
        index_interval: usize,
        bloom_bits_per_key: usize,
    ) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(SpruceError::from_io)?;

        let mut writer = BufWriter::new(file);
        let mut file_hasher = crc32fast::Hasher::new();

        let mut header = Vec::with_capacity(8);
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&VERSION.to_le_bytes());
        header.extend_from_slice(&0u16.to_le_bytes());
        writer.write_all(&header).map_err(SpruceError::from_io)?;
        file_hasher.update(&header);

        Ok(Self {
            id,
            path: path.to_path_buf(),
            writer,
            entry_count: 0,
            current_offset: header.len() as u64,
            index: Vec::new(),
            index_interval: index_interval.max(1),
            bloom: BloomFilter::with_capacity(expected_entries, bloom_bits_per_key),
            min_key: None,
            max_key: None,
            max_seq: 0,
            last_key: None,
            file_hasher,
        })
    }

    /// Add a key-value pair (must be called in ascending key order)
    pub fn add(&mut self, key: &[u8], value: &[u8], seq: u64) -> Result<()> {
        self.write_entry(key, Some(value), seq)
    }

    /// Add a tombstone (must be called in ascending key order)
    pub fn add_tombstone(&mut self, key: &[u8], seq: u64) -> Result<()> {
        self.write_entry(key, None, seq)
    }

    /// Internal: write an entry (value=None means tombstone)
    fn write_entry(&mut self, key: &[u8], value: Option<&[u8]>, seq: u64) -> Result<()> {
        if let Some(last) = &self.last_key {
            if last.as_slice() >= key {
                return Err(SpruceError::Storage(format!(
                    "entries not in strictly ascending key order: {:?} after {:?}",
                    key, last
                )));
            }
        }

        // Sparse index: record the first entry of every interval
        if self.entry_count % self.index_interval as u64 == 0 {
            self.index.push((key.to_vec(), self.current_offset));
        }

        self.bloom.insert(key);

        if self.min_key.is_none() {
            self.min_key = Some(key.to_vec());
        }
        self.max_key = Some(key.to_vec());
        self.max_seq = self.max_seq.max(seq);
        self.last_key = Some(key.to_vec());

        // Entry: [key_len(4)][val_len(4)][seq(8)][key][value]
        let key_len = key.len() as u32;
        let val_len = match value {
            Some(v) => v.len() as u32,
            None => TOMBSTONE_MARKER,
        };

        self.write_hashed(&key_len.to_le_bytes())?;
        self.write_hashed(&val_len.to_le_bytes())?;
        self.write_hashed(&seq.to_le_bytes())?;
        self.write_hashed(key)?;

        let mut entry_size = 16 + key.len() as u64;
        if let Some(v) = value {
            self.write_hashed(v)?;
            entry_size += v.len() as u64;
        }

        self.current_offset += entry_size;
        self.entry_count += 1;

        Ok(())
    }

    /// Finish building: write index, bloom, and footer; fsync; return metadata
    pub fn finish(mut self) -> Result<SegmentMeta> {
        // Index block: [key_len(4)][offset(8)][key] per sparse entry
        let index_offset = self.current_offset;
        let index = std::mem::take(&mut self.index);
        for (key, offset) in &index {
            let key_len = key.len() as u32;
            self.write_hashed(&key_len.to_le_bytes())?;
            self.write_hashed(&offset.to_le_bytes())?;
            self.write_hashed(key)?;
            self.current_offset += 12 + key.len() as u64;
        }

        // Bloom block: [bit_len(4)][bits]
        let bloom_offset = self.current_offset;
        let bloom_bits = self.bloom.data().to_vec();
        self.write_hashed(&(bloom_bits.len() as u32).to_le_bytes())?;
        self.write_hashed(&bloom_bits)?;
        self.current_offset += 4 + bloom_bits.len() as u64;

        // Footer (not covered by the file CRC)
        let file_crc = self.file_hasher.clone().finalize();
        let mut footer = Vec::with_capacity(FOOTER_SIZE as usize);
        footer.extend_from_slice(&index_offset.to_le_bytes());
        footer.extend_from_slice(&bloom_offset.to_le_bytes());
        footer.extend_from_slice(&self.entry_count.to_le_bytes());
        footer.extend_from_slice(&file_crc.to_le_bytes());
        footer.extend_from_slice(&0u32.to_le_bytes());
        self.writer.write_all(&footer).map_err(SpruceError::from_io)?;

        self.writer.flush().map_err(SpruceError::from_io)?;
        let file = self.writer.into_inner().map_err(|e| {
            SpruceError::Storage(format!("failed to flush segment: {}", e))
        })?;
        file.sync_all().map_err(SpruceError::from_io)?;

        let file_size = file.metadata()?.len();

        Ok(SegmentMeta {
            id: self.id,
            entry_count: self.entry_count,
            min_key: Bytes::from(self.min_key.unwrap_or_default()),
            max_key: Bytes::from(self.max_key.unwrap_or_default()),
            max_seq: self.max_seq,
            size_bytes: file_size,
        })
    }

    /// Remove a partially-written segment after a failure
    pub fn discard(self) {
        let path = self.path.clone();
        drop(self);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove partial segment");
            }
        }
    }

    fn write_hashed(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).map_err(SpruceError::from_io)?;
        self.file_hasher.update(bytes);
        Ok(())
    }
}
