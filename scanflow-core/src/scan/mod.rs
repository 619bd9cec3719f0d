//! Scan domain modules: traversal, orchestration and their tuning knobs.

pub mod config;
pub mod discovery;
pub mod orchestration;

pub use config::*;
pub use discovery::{
    DiscoveryPlan, DiscoveryTraversal, EntryKind, FileSystem, FsEntry,
    InMemoryFs, RealFs, TraversalStats,
};
pub use orchestration::*;
