//! Job-graph execution for library scans.
//!
//! Stages are plain [`job::StageHandler`] implementations. A validated
//! [`graph::JobGraph`] template wires them together, and every scan request
//! gets its own [`graph::ScanRun`] of [`job::JobNode`]s so fan-in state is
//! never shared between runs. [`coordinator::ScanCoordinator`] resolves the
//! library and drives the run.

pub mod coordinator;
pub mod events;
pub mod graph;
pub mod job;
pub mod progress;
pub mod repository;
pub mod stages;

pub use coordinator::*;
pub use events::*;
pub use graph::*;
pub use job::*;
pub use progress::*;
pub use repository::*;
pub use stages::{
    ComparisonReport, ComparisonStage, DiscoveryReport, DiscoveryStage, LookupReport,
    MetadataSaveStage, RepositoryLookupStage, SaveReport, library_scan_handlers,
};
