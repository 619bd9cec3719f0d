use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use scanflow_model::{DiscoveredEntry, StageId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::Result;
use crate::scan::discovery::DiscoveryPlan;
use crate::scan::orchestration::job::{
    StageContext, StageHandler, StageInputs, StagePayload, ensure_active,
};
use crate::scan::orchestration::repository::resolve_library;

/// Files found by one traversal, plus the directories it could not list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub entries: Vec<DiscoveredEntry>,
    /// Unreadable directories and roots; nothing below them was observed.
    pub skipped_dirs: Vec<PathBuf>,
}

impl DiscoveryReport {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DiscoveredEntry> {
        self.entries.iter()
    }

    /// True when `path` lies under a directory the traversal skipped, so its
    /// absence from `entries` says nothing.
    pub fn is_unobserved(&self, path: &Path) -> bool {
        self.skipped_dirs.iter().any(|dir| path.starts_with(dir))
    }
}

/// Walks every content location of the library and forwards the discovered
/// files.
///
/// The traversal is synchronous, so it runs on a blocking task and streams
/// entries back over a bounded channel; this task only counts, heartbeats
/// and collects.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscoveryStage;

#[async_trait]
impl StageHandler for DiscoveryStage {
    fn id(&self) -> StageId {
        StageId::DISCOVERY
    }

    async fn run(
        &self,
        ctx: Arc<StageContext>,
        _inputs: StageInputs,
        cancel: CancellationToken,
    ) -> Result<StagePayload> {
        let stage = self.id();
        let library = resolve_library(ctx.repository.as_ref(), ctx.library_id).await?;

        let mut reporter = ctx.reporter(stage.clone());
        reporter.begin(0).await?;
        ensure_active(&stage, &cancel)?;

        let plan = DiscoveryPlan::new(
            library.roots().map(Path::to_path_buf).collect(),
            ctx.include_hidden,
        );
        let (tx, mut rx) = mpsc::channel(ctx.config.discovery.channel_capacity.max(1));
        let fs = ctx.fs.clone();
        let walk_cancel = cancel.clone();
        let walker = tokio::task::spawn_blocking(move || {
            let mut traversal = plan.traverse(fs, walk_cancel);
            for entry in traversal.by_ref() {
                if tx.blocking_send(entry).is_err() {
                    break;
                }
            }
            (traversal.stats(), traversal.into_skipped_directories())
        });

        let mut entries = Vec::new();
        while let Some(entry) = rx.recv().await {
            if cancel.is_cancelled() {
                break;
            }
            reporter.extend_total(1);
            reporter.advance(1).await?;
            entries.push(entry);
        }
        drop(rx);

        let (stats, skipped_dirs) = walker.await?;
        ensure_active(&stage, &cancel)?;
        reporter.finish().await?;

        debug!(
            target: "scan::discovery",
            library_id = %ctx.library_id,
            visited = stats.directories_visited,
            skipped = stats.directories_skipped,
            hidden_skipped = stats.hidden_skipped,
            "traversal stats"
        );
        info!(
            target: "scan::jobs",
            library_id = %ctx.library_id,
            scan_id = %ctx.identity.scan_id,
            roots = library.content_locations.len(),
            files = entries.len(),
            skipped_dirs = skipped_dirs.len(),
            "discovery complete"
        );
        Ok(StagePayload::Discovered(Arc::new(DiscoveryReport {
            entries,
            skipped_dirs,
        })))
    }
}
