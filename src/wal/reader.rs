//! WAL Reader
//!
//! Reads frames back from a single rotation file.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{Result, SpruceError};

use super::record::{WalRecord, FRAME_HEADER_SIZE, MAX_PAYLOAD_LEN};

/// Outcome of reading one frame, distinguishing the two trailing-damage cases
/// recovery cares about.
pub(crate) enum RawFrame {
    /// A complete, CRC-verified record
    Record(WalRecord),
    /// The file ends mid-frame (torn write from a crash)
    Partial,
    /// The frame is complete but fails CRC or decode
    Corrupt,
}

/// Reads records from a single WAL rotation file
pub struct WalReader {
    reader: BufReader<File>,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self { reader: BufReader::new(file) })
    }

    /// Read the next frame without failing on trailing damage
    pub(crate) fn read_frame(&mut self) -> Result<Option<RawFrame>> {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        match read_full(&mut self.reader, &mut header)? {
            ReadFull::Eof => return Ok(None),
            ReadFull::Short => return Ok(Some(RawFrame::Partial)),
            ReadFull::Complete => {}
        }

        let seq = u64::from_le_bytes(header[0..8].try_into().unwrap());
        let crc = u32::from_le_bytes(header[8..12].try_into().unwrap());
        let len = u32::from_le_bytes(header[12..16].try_into().unwrap());

        if len > MAX_PAYLOAD_LEN {
            return Ok(Some(RawFrame::Corrupt));
        }

        let mut payload = vec![0u8; len as usize];
        match read_full(&mut self.reader, &mut payload)? {
            ReadFull::Eof | ReadFull::Short => return Ok(Some(RawFrame::Partial)),
            ReadFull::Complete => {}
        }

        if !WalRecord::verify_crc(seq, len, crc, &payload) {
            return Ok(Some(RawFrame::Corrupt));
        }

        match WalRecord::decode(seq, &payload) {
            Ok(record) => Ok(Some(RawFrame::Record(record))),
            Err(_) => Ok(Some(RawFrame::Corrupt)),
        }
    }

    /// Read the next record, failing on any trailing damage
    pub fn next_record(&mut self) -> Result<Option<WalRecord>> {
        match self.read_frame()? {
            None => Ok(None),
            Some(RawFrame::Record(record)) => Ok(Some(record)),
            Some(RawFrame::Partial) => {
                Err(SpruceError::Corruption("partial WAL frame at end of file".to_string()))
            }
            Some(RawFrame::Corrupt) => {
                Err(SpruceError::Corruption("WAL frame failed checksum".to_string()))
            }
        }
    }

    /// Iterate over all valid records
    pub fn records(self) -> WalIterator {
        WalIterator { reader: self, done: false }
    }
}

/// Iterator over WAL records in one file
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = Result<WalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

enum ReadFull {
    Complete,
    Short,
    Eof,
}

/// Fill `buf` completely, reporting a clean EOF and a short read differently
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<ReadFull> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Ok(if filled == 0 { ReadFull::Eof } else { ReadFull::Short });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SpruceError::Io(e)),
        }
    }
    Ok(ReadFull::Complete)
}
