use std::path::PathBuf;

use crate::chrono::{DateTime, Utc};

/// A file found by the discovery traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscoveredEntry {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub hidden: bool,
    /// Content location the entry was found under.
    pub root: PathBuf,
    /// Number of directories between the root and the entry (0 = directly
    /// inside the root).
    pub depth: usize,
}

impl DiscoveredEntry {
    pub fn signature(&self) -> FileSignature {
        FileSignature {
            size: self.size,
            modified: self.modified,
        }
    }
}

/// Cheap change-detection signature: size plus modification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileSignature {
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}
