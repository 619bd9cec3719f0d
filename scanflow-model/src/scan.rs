use std::path::PathBuf;

use crate::entry::FileSignature;
use crate::ids::{LibraryId, ScanIdentity};

/// A request to scan one library on behalf of one user.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanRequest {
    pub library_id: LibraryId,
    pub identity: ScanIdentity,
    /// Overrides the configured hidden-elements flag when set.
    #[cfg_attr(feature = "serde", serde(default))]
    pub include_hidden: Option<bool>,
}

impl ScanRequest {
    pub fn new(library_id: LibraryId, identity: ScanIdentity) -> Self {
        Self {
            library_id,
            identity,
            include_hidden: None,
        }
    }

    pub fn with_hidden(mut self, include_hidden: bool) -> Self {
        self.include_hidden = Some(include_hidden);
        self
    }
}

/// File row written back to the library by the save stage.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileRecord {
    pub path: PathBuf,
    pub location_index: usize,
    pub signature: FileSignature,
}

/// Changes produced by one scan run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanDelta {
    pub upserts: Vec<FileRecord>,
    pub removals: Vec<PathBuf>,
}

impl ScanDelta {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }
}
