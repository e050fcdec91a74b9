//! Segment Iterator
//!
//! Sequential iteration over all entries in a segment's data block, in key
//! order. Each iterator owns its own file handle, so long scans never
//! contend with point lookups on the shared reader handle, and dropping the
//! iterator mid-scan releases the handle immediately.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{Result, SpruceError};

use super::{ENTRY_HEADER_SIZE, HEADER_SIZE, TOMBSTONE_MARKER};

/// Iterator over segment entries in sorted key order
///
/// Yields `(key, seq, value)` where a `None` value is a tombstone.
pub struct SegmentIterator {
    file: BufReader<File>,
    /// Stop reading at this offset (start of the index block)
    end_offset: u64,
    /// Current position in the file
    current_offset: u64,
}

impl SegmentIterator {
    /// Open a dedicated handle positioned at the start of the data block
    pub(super) fn open(path: &Path, end_offset: u64) -> Result<Self> {
        let file = File::open(path)?;
        let mut file = BufReader::new(file);
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        Ok(Self {
            file,
            end_offset,
            current_offset: HEADER_SIZE,
        })
    }
}

impl Iterator for SegmentIterator {
    /// (key, seq, Option<value>) — None value means tombstone
    type Item = Result<(Vec<u8>, u64, Option<Vec<u8>>)>;

    fn next(&mut self) -> Option<Self::Item> {
        // Stop at the index block
        if self.current_offset >= self.end_offset {
            return None;
        }

        let mut header = [0u8; ENTRY_HEADER_SIZE as usize];
        if let Err(e) = self.file.read_exact(&mut header) {
            return Some(Err(SpruceError::Io(e)));
        }

        let key_len = u32::from_le_bytes(header[0..4].try_into().unwrap()) as usize;
        let val_len = u32::from_le_bytes(header[4..8].try_into().unwrap());
        let seq = u64::from_le_bytes(header[8..16].try_into().unwrap());

        let mut key = vec![0u8; key_len];
        if let Err(e) = self.file.read_exact(&mut key) {
            return Some(Err(SpruceError::Io(e)));
        }

        let mut entry_size = ENTRY_HEADER_SIZE + key_len as u64;

        let value = if val_len == TOMBSTONE_MARKER {
            None
        } else {
            let mut v = vec![0u8; val_len as usize];
            if let Err(e) = self.file.read_exact(&mut v) {
                return Some(Err(SpruceError::Io(e)));
            }
            entry_size += val_len as u64;
            Some(v)
        };

        self.current_offset += entry_size;

        Some(Ok((key, seq, value)))
    }
}
