use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use scanflow_model::{FileRecord, StageId};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;
use crate::scan::orchestration::job::{
    StageContext, StageHandler, StageInputs, StagePayload, ensure_active,
};
use crate::scan::orchestration::repository::resolve_library;

/// Discovered files assigned to the content location that owns them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupReport {
    pub located: HashMap<PathBuf, FileRecord>,
    /// Files whose content location is no longer configured on the library.
    pub orphaned: Vec<PathBuf>,
}

impl LookupReport {
    pub fn record_for(&self, path: &Path) -> Option<&FileRecord> {
        self.located.get(path)
    }
}

/// Re-reads the library and maps each discovered file onto one of its
/// content locations.
#[derive(Debug, Default, Clone, Copy)]
pub struct RepositoryLookupStage;

#[async_trait]
impl StageHandler for RepositoryLookupStage {
    fn id(&self) -> StageId {
        StageId::REPOSITORY_LOOKUP
    }

    async fn run(
        &self,
        ctx: Arc<StageContext>,
        inputs: StageInputs,
        cancel: CancellationToken,
    ) -> Result<StagePayload> {
        let stage = self.id();
        let discovered = inputs.discovered(&stage)?;
        let library = resolve_library(ctx.repository.as_ref(), ctx.library_id).await?;

        let mut reporter = ctx.reporter(stage.clone());
        reporter.begin(discovered.len() as u64).await?;

        let mut report = LookupReport {
            located: HashMap::with_capacity(discovered.len()),
            orphaned: Vec::new(),
        };
        for entry in discovered.iter() {
            ensure_active(&stage, &cancel)?;
            match library.locate(&entry.path) {
                Some(location) => {
                    report.located.insert(
                        entry.path.clone(),
                        FileRecord {
                            path: entry.path.clone(),
                            location_index: location.index,
                            signature: entry.signature(),
                        },
                    );
                }
                None => {
                    warn!(
                        target: "scan::jobs",
                        library_id = %ctx.library_id,
                        path = %entry.path.display(),
                        "discovered file outside every content location"
                    );
                    report.orphaned.push(entry.path.clone());
                }
            }
            reporter.advance(1).await?;
        }

        ensure_active(&stage, &cancel)?;
        reporter.finish().await?;
        info!(
            target: "scan::jobs",
            library_id = %ctx.library_id,
            located = report.located.len(),
            orphaned = report.orphaned.len(),
            "repository lookup complete"
        );
        Ok(StagePayload::Located(Arc::new(report)))
    }
}
