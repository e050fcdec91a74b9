//! WAL Writer
//!
//! Appends frames to the current rotation file, rotates files on flush, and
//! deletes sealed files once their contents are durable in a segment.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::WalSyncStrategy;
use crate::error::{Result, SpruceError};

use super::record::{Operation, WalRecord};

/// A rotation file that is no longer written to
struct SealedFile {
    path: PathBuf,
    /// Highest sequence number contained in the file
    last_seq: u64,
}

/// Writes records to the WAL
///
/// Sequence numbers are allocated here, under the engine's write lock, so the
/// append order IS the global sequence order. They are never reset: truncation
/// deletes whole sealed files, it does not rewind the counter.
pub struct WalWriter {
    /// Log directory holding the rotation files
    dir: PathBuf,

    /// Buffered writer for the current rotation file
    writer: BufWriter<File>,

    /// Rotation index of the current file
    rotation_index: u64,

    /// Next sequence number to assign
    next_seq: u64,

    /// Highest sequence number written to the current file (None if empty)
    current_last_seq: Option<u64>,

    /// Rotated-out files awaiting truncation
    sealed: Vec<SealedFile>,

    /// Frames written since the last fsync
    uncommitted: usize,

    sync_strategy: WalSyncStrategy,
}

impl WalWriter {
    /// Open the log directory and start a fresh rotation file
    ///
    /// Pre-existing rotation files (from before a restart) are tracked as
    /// sealed: every record they hold carries a sequence number below
    /// `start_seq`, so the first flush at or above `start_seq` deletes them.
    pub fn open(dir: &Path, start_seq: u64, sync_strategy: WalSyncStrategy) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let mut max_index = 0u64;
        let mut sealed = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if let Some(index) = Self::parse_rotation_index(&path) {
                max_index = max_index.max(index);
                sealed.push(SealedFile {
                    path,
                    last_seq: start_seq.saturating_sub(1),
                });
            }
        }

        let rotation_index = max_index + 1;
        let writer = Self::open_rotation_file(dir, rotation_index)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            writer,
            rotation_index,
            next_seq: start_seq,
            current_last_seq: None,
            sealed,
            uncommitted: 0,
            sync_strategy,
        })
    }

    /// Append an operation, durable per the sync strategy before returning
    pub fn append(&mut self, operation: Operation) -> Result<u64> {
        let seq = self.next_seq;
        let record = WalRecord::new(seq, operation);
        let frame = record.encode()?;

        self.writer.write_all(&frame).map_err(SpruceError::from_io)?;

        self.next_seq += 1;
        self.current_last_seq = Some(seq);
        self.uncommitted += 1;

        match self.sync_strategy {
            WalSyncStrategy::EveryWrite => self.sync()?,
            WalSyncStrategy::EveryNEntries { count } => {
                if self.uncommitted >= count {
                    self.sync()?;
                }
            }
        }

        Ok(seq)
    }

    /// Force the current file to disk
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush().map_err(SpruceError::from_io)?;
        self.writer.get_ref().sync_data().map_err(SpruceError::from_io)?;
        self.uncommitted = 0;
        Ok(())
    }

    /// Seal the current file and open the next rotation index
    ///
    /// Called at the start of a flush, so the sealed file holds exactly the
    /// records the flush is about to make durable in a segment.
    pub fn rotate(&mut self) -> Result<()> {
        self.sync()?;

        let old_path = Self::rotation_path(&self.dir, self.rotation_index);
        self.sealed.push(SealedFile {
            path: old_path,
            last_seq: self.current_last_seq.unwrap_or(self.next_seq.saturating_sub(1)),
        });

        self.rotation_index += 1;
        self.writer = Self::open_rotation_file(&self.dir, self.rotation_index)?;
        self.current_last_seq = None;
        self.uncommitted = 0;
        Ok(())
    }

    /// Delete sealed files whose records are all flushed (`<= up_to_seq`)
    ///
    /// Must not run concurrently with `append` — the engine guarantees this by
    /// holding the write lock across the flush.
    pub fn truncate(&mut self, up_to_seq: u64) -> Result<()> {
        let mut kept = Vec::new();
        for file in self.sealed.drain(..) {
            if file.last_seq <= up_to_seq {
                match fs::remove_file(&file.path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        // Leave it for the next truncation attempt
                        tracing::warn!(path = %file.path.display(), error = %e, "failed to remove sealed WAL file");
                        kept.push(file);
                    }
                }
            } else {
                kept.push(file);
            }
        }
        self.sealed = kept;
        Ok(())
    }

    /// Next sequence number that will be assigned
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Frames written since the last fsync
    pub fn uncommitted_count(&self) -> usize {
        self.uncommitted
    }

    /// Rotation index of the file currently being written
    pub fn rotation_index(&self) -> u64 {
        self.rotation_index
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn open_rotation_file(dir: &Path, index: u64) -> Result<BufWriter<File>> {
        let path = Self::rotation_path(dir, index);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(SpruceError::from_io)?;
        Ok(BufWriter::new(file))
    }

    /// Generate the file path for a rotation index
    pub(crate) fn rotation_path(dir: &Path, index: u64) -> PathBuf {
        dir.join(format!("wal_{:06}.log", index))
    }

    /// Parse a rotation index from a filename
    /// "wal_000042.log" → Some(42)
    pub(crate) fn parse_rotation_index(path: &Path) -> Option<u64> {
        let name = path.file_stem()?.to_string_lossy();
        let index_str = name.strip_prefix("wal_")?;
        index_str.parse().ok()
    }
}
