//! Core data model definitions shared across scanflow crates.
//!
//! Everything in here is plain data: identifiers, the validated
//! [`ScanProgress`] snapshot, the library record/aggregate pair, discovered
//! file entries and the domain events a scan run emits. Execution logic lives
//! in `scanflow-core`.
#![allow(missing_docs)]

pub use ::chrono;

pub mod entry;
pub mod error;
pub mod events;
pub mod ids;
pub mod library;
pub mod progress;
pub mod scan;
pub mod status;

// Intentionally curated re-exports for downstream consumers.
pub use entry::{DiscoveredEntry, FileSignature};
pub use error::{ModelError, Result as ModelResult};
pub use events::{
    EventMeta, JobProgressChanged, ScanEvent, ScanFailed, ScanFinished,
    ScanProgressChanged,
};
pub use ids::{EventId, LibraryId, ScanId, ScanIdentity, StageId, UserId};
pub use library::{
    ContentLocation, IndexedFile, LibraryAggregate, LibraryRecord,
};
pub use progress::ScanProgress;
pub use scan::{FileRecord, ScanDelta, ScanRequest};
pub use status::JobStatus;
