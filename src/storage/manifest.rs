//! Manifest
//!
//! The durable record of which segments constitute the live dataset, plus the
//! last sequence number made durable in a segment. The manifest is the single
//! source of truth for recovery: a segment file not named here does not exist
//! as far as the store is concerned.
//!
//! Updates are atomic: the new contents are written to a temp file, fsynced,
//! renamed over the old manifest, and the directory is fsynced. A crash at
//! any point leaves either the old or the new manifest, never a mix.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpruceError};

use super::segment::SegmentMeta;

/// On-disk name of the manifest file
pub const MANIFEST_FILENAME: &str = "MANIFEST";

/// Live segment list and flush high-water mark
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// Highest sequence number durably flushed into a segment. WAL records at
    /// or below this are redundant; recovery replays only what lies above it.
    pub last_applied_seq: u64,

    /// Metadata for every live segment, in creation (id) order
    pub segments: Vec<SegmentMeta>,
}

impl Manifest {
    /// Load the manifest, or an empty one if the file does not exist yet
    pub fn load(path: &Path) -> Result<Self> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => return Err(SpruceError::Io(e)),
        };

        if data.len() < 4 {
            return Err(SpruceError::Manifest("manifest file too short".to_string()));
        }
        let (body, crc_bytes) = data.split_at(data.len() - 4);
        let stored_crc = u32::from_le_bytes(crc_bytes.try_into().unwrap());
        if crc32fast::hash(body) != stored_crc {
            return Err(SpruceError::Corruption("manifest failed checksum".to_string()));
        }

        bincode::deserialize(body)
            .map_err(|e| SpruceError::Manifest(format!("manifest decode failed: {}", e)))
    }

    /// Atomically replace the manifest on disk
    ///
    /// This must be the LAST step of any segment-creating operation: a crash
    /// before the rename leaves the old manifest pointing only at old, fully
    /// written segments.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut body = bincode::serialize(self)?;
        let crc = crc32fast::hash(&body);
        body.extend_from_slice(&crc.to_le_bytes());

        let tmp_path = path.with_extension("tmp");
        {
            let mut tmp = File::create(&tmp_path).map_err(SpruceError::from_io)?;
            tmp.write_all(&body).map_err(SpruceError::from_io)?;
            tmp.sync_all().map_err(SpruceError::from_io)?;
        }
        fs::rename(&tmp_path, path).map_err(SpruceError::from_io)?;

        // Make the rename itself durable
        if let Some(parent) = path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(())
    }

    /// Metadata for a segment id, if live
    pub fn segment(&self, id: u64) -> Option<&SegmentMeta> {
        self.segments.iter().find(|meta| meta.id == id)
    }

    /// Highest live segment id (0 if none)
    pub fn max_segment_id(&self) -> u64 {
        self.segments.iter().map(|meta| meta.id).max().unwrap_or(0)
    }
}
