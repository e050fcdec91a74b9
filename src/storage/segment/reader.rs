//! Segment Reader
//!
//! Opens segment files, validates the whole-file checksum, and serves point
//! lookups: bloom filter short-circuit, sparse-index binary search, then a
//! bounded linear scan of one index interval.

use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::{Result, SpruceError};

use super::bloom::BloomFilter;
use super::iterator::SegmentIterator;
use super::{
    SegmentLookup, SegmentMeta, ENTRY_HEADER_SIZE, FOOTER_SIZE, HEADER_SIZE, MAGIC,
    TOMBSTONE_MARKER, VERSION,
};

/// Reader for one immutable segment file
///
/// Lookups take `&self`: the file handle sits behind a Mutex so any number of
/// threads can share one reader through an `Arc`. Scans open their own handle
/// (see `iter`) and never contend with point lookups.
///
/// A reader marked obsolete deletes its file when the last reference drops —
/// in-flight readers keep superseded segments alive until they finish.
pub struct SegmentReader {
    /// Manifest metadata for this segment
    meta: SegmentMeta,
    /// File path, kept for iterators and deferred deletion
    path: PathBuf,
    /// Shared file handle for point lookups
    file: Mutex<BufReader<File>>,
    /// In-memory sparse index: every Nth key → file offset
    index: Vec<(Vec<u8>, u64)>,
    /// Bloom filter over all keys
    bloom: BloomFilter,
    /// Start of the index block == end of the data block
    index_offset: u64,
    /// Set when a compaction supersedes this segment
    obsolete: AtomicBool,
}

impl SegmentReader {
    /// Open a segment for reading
    ///
    /// Validates the header, footer, and whole-file checksum, then loads the
    /// sparse index and bloom filter into memory.
    pub fn open(path: &Path, meta: SegmentMeta) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(SpruceError::Corruption(format!(
                "segment {} too short: {} bytes",
                path.display(),
                file_size
            )));
        }

        // Footer first: locate the blocks
        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;

        let index_offset = u64::from_le_bytes(footer[0..8].try_into().unwrap());
        let bloom_offset = u64::from_le_bytes(footer[8..16].try_into().unwrap());
        let entry_count = u64::from_le_bytes(footer[16..24].try_into().unwrap());
        let file_crc = u32::from_le_bytes(footer[24..28].try_into().unwrap());

        let body_len = file_size - FOOTER_SIZE;
        if index_offset < HEADER_SIZE || bloom_offset < index_offset || bloom_offset > body_len {
            return Err(SpruceError::Corruption(format!(
                "segment {} has inconsistent block offsets",
                path.display()
            )));
        }

        // Whole-file checksum over everything before the footer
        file.seek(SeekFrom::Start(0))?;
        let mut hasher = crc32fast::Hasher::new();
        let mut remaining = body_len;
        let mut buf = vec![0u8; 64 * 1024];
        while remaining > 0 {
            let chunk = remaining.min(buf.len() as u64) as usize;
            file.read_exact(&mut buf[..chunk])?;
            hasher.update(&buf[..chunk]);
            remaining -= chunk as u64;
        }
        if hasher.finalize() != file_crc {
            return Err(SpruceError::Corruption(format!(
                "segment {} failed checksum",
                path.display()
            )));
        }

        // Header sanity (covered by the checksum, but verify identity)
        file.seek(SeekFrom::Start(0))?;
        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;
        if &header[0..4] != MAGIC {
            return Err(SpruceError::Corruption(format!(
                "invalid segment magic in {}",
                path.display()
            )));
        }
        let version = u16::from_le_bytes(header[4..6].try_into().unwrap());
        if version != VERSION {
            return Err(SpruceError::Storage(format!(
                "unsupported segment version: {}",
                version
            )));
        }

        // Load the sparse index
        file.seek(SeekFrom::Start(index_offset))?;
        let mut index_data = vec![0u8; (bloom_offset - index_offset) as usize];
        file.read_exact(&mut index_data)?;
        let index = parse_index(&index_data, path)?;

        // Load the bloom filter
        let mut bloom_len_bytes = [0u8; 4];
        file.read_exact(&mut bloom_len_bytes)?;
        let bloom_len = u32::from_le_bytes(bloom_len_bytes) as usize;
        if bloom_offset + 4 + bloom_len as u64 > body_len {
            return Err(SpruceError::Corruption(format!(
                "segment {} bloom block overruns file",
                path.display()
            )));
        }
        let mut bloom_bits = vec![0u8; bloom_len];
        file.read_exact(&mut bloom_bits)?;

        let mut meta = meta;
        meta.entry_count = entry_count;

        Ok(Self {
            meta,
            path: path.to_path_buf(),
            file: Mutex::new(BufReader::new(file)),
            index,
            bloom: BloomFilter::from_bytes(bloom_bits),
            index_offset,
            obsolete: AtomicBool::new(false),
        })
    }

    /// Look up a key in this segment
    ///
    /// Misses short-circuit on the key range, then the bloom filter; a
    /// surviving probe binary-searches the sparse index and scans at most one
    /// index interval of the data block.
    pub fn get(&self, key: &[u8]) -> Result<SegmentLookup> {
        if !self.meta.might_contain(key) || !self.bloom.might_contain(key) {
            return Ok(SegmentLookup::NotFound);
        }

        // Rightmost sparse entry with key <= target
        let slot = self.index.partition_point(|(k, _)| k.as_slice() <= key);
        if slot == 0 {
            return Ok(SegmentLookup::NotFound);
        }
        let start = self.index[slot - 1].1;
        let end = self
            .index
            .get(slot)
            .map(|(_, offset)| *offset)
            .unwrap_or(self.index_offset);

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(start))?;

        let mut offset = start;
        while offset < end {
            let mut header = [0u8; ENTRY_HEADER_SIZE as usize];
            file.read_exact(&mut header)?;

            let key_len = u32::from_le_bytes(header[0..4].try_into().unwrap()) as usize;
            let val_len = u32::from_le_bytes(header[4..8].try_into().unwrap());
            let seq = u64::from_le_bytes(header[8..16].try_into().unwrap());

            let mut entry_key = vec![0u8; key_len];
            file.read_exact(&mut entry_key)?;

            let value_len = if val_len == TOMBSTONE_MARKER { 0 } else { val_len as u64 };

            match entry_key.as_slice().cmp(key) {
                std::cmp::Ordering::Equal => {
                    if val_len == TOMBSTONE_MARKER {
                        return Ok(SegmentLookup::Tombstone { seq });
                    }
                    let mut value = vec![0u8; val_len as usize];
                    file.read_exact(&mut value)?;
                    return Ok(SegmentLookup::Value { value, seq });
                }
                std::cmp::Ordering::Greater => return Ok(SegmentLookup::NotFound),
                std::cmp::Ordering::Less => {
                    file.seek(SeekFrom::Current(value_len as i64))?;
                    offset += ENTRY_HEADER_SIZE + key_len as u64 + value_len;
                }
            }
        }

        Ok(SegmentLookup::NotFound)
    }

    /// Create an iterator over all entries, with its own file handle
    pub fn iter(&self) -> Result<SegmentIterator> {
        SegmentIterator::open(&self.path, self.index_offset)
    }

    /// Manifest metadata for this segment
    pub fn meta(&self) -> &SegmentMeta {
        &self.meta
    }

    /// Segment identifier
    pub fn id(&self) -> u64 {
        self.meta.id
    }

    /// Highest sequence number contained in this segment
    pub fn max_seq(&self) -> u64 {
        self.meta.max_seq
    }

    /// Number of entries
    pub fn entry_count(&self) -> u64 {
        self.meta.entry_count
    }

    /// Whether a key could be present (range + bloom check, no I/O)
    pub fn might_contain(&self, key: &[u8]) -> bool {
        self.meta.might_contain(key) && self.bloom.might_contain(key)
    }

    /// File path of this segment
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mark this segment superseded; its file is removed when the last
    /// reference drops
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }
}

impl Drop for SegmentReader {
    fn drop(&mut self) {
        if self.obsolete.load(Ordering::Acquire) {
            match fs::remove_file(&self.path) {
                Ok(()) => {
                    tracing::debug!(path = %self.path.display(), "removed superseded segment");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "failed to remove superseded segment");
                }
            }
        }
    }
}

/// Parse index block bytes: [key_len(4)][offset(8)][key] repeated
fn parse_index(data: &[u8], path: &Path) -> Result<Vec<(Vec<u8>, u64)>> {
    let mut index = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        if pos + 12 > data.len() {
            return Err(SpruceError::Corruption(format!(
                "segment {} has a truncated index block",
                path.display()
            )));
        }
        let key_len = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
        let offset = u64::from_le_bytes(data[pos + 4..pos + 12].try_into().unwrap());
        pos += 12;

        if pos + key_len > data.len() {
            return Err(SpruceError::Corruption(format!(
                "segment {} has a truncated index key",
                path.display()
            )));
        }
        index.push((data[pos..pos + key_len].to_vec(), offset));
        pos += key_len;
    }
    Ok(index)
}
