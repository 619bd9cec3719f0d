//! Built-in stages of the library scan pipeline.

pub mod comparison;
pub mod discovery;
pub mod lookup;
pub mod save;

use std::sync::Arc;

pub use comparison::{ComparisonReport, ComparisonStage};
pub use discovery::{DiscoveryReport, DiscoveryStage};
pub use lookup::{LookupReport, RepositoryLookupStage};
pub use save::{MetadataSaveStage, SaveReport, build_delta};

use super::job::StageHandler;

/// Handlers for every stage of [`super::graph::JobGraph::library_scan`].
pub fn library_scan_handlers() -> Vec<Arc<dyn StageHandler>> {
    vec![
        Arc::new(DiscoveryStage),
        Arc::new(ComparisonStage),
        Arc::new(RepositoryLookupStage),
        Arc::new(MetadataSaveStage),
    ]
}
