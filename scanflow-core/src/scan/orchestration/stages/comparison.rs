use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use scanflow_model::{DiscoveredEntry, FileSignature, StageId};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::Result;
use crate::scan::orchestration::job::{
    StageContext, StageHandler, StageInputs, StagePayload, ensure_active,
};
use crate::scan::orchestration::repository::resolve_library;

/// Discovered files classified against the library's index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComparisonReport {
    pub added: Vec<DiscoveredEntry>,
    pub modified: Vec<DiscoveredEntry>,
    pub unchanged: Vec<PathBuf>,
    /// Indexed files that were not discovered this time.
    pub missing: Vec<PathBuf>,
    /// Indexed files below a directory discovery could not list. They are
    /// neither confirmed nor missing and stay in the index untouched.
    pub unobserved: Vec<PathBuf>,
}

impl ComparisonReport {
    pub fn changed(&self) -> impl Iterator<Item = &DiscoveredEntry> + '_ {
        self.added.iter().chain(self.modified.iter())
    }
}

/// Size always counts; modification times only when both sides have one.
fn signature_changed(indexed: &FileSignature, current: &FileSignature) -> bool {
    if indexed.size != current.size {
        return true;
    }
    match (indexed.modified, current.modified) {
        (Some(before), Some(now)) => before != now,
        _ => false,
    }
}

/// Compares each discovered file's signature with the indexed one.
#[derive(Debug, Default, Clone, Copy)]
pub struct ComparisonStage;

#[async_trait]
impl StageHandler for ComparisonStage {
    fn id(&self) -> StageId {
        StageId::COMPARISON
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

        let indexed: HashMap<&Path, &FileSignature> = library
            .indexed_files
            .iter()
            .map(|file| (file.path.as_path(), &file.signature))
            .collect();
        let mut seen = HashSet::with_capacity(discovered.len());
        let mut report = ComparisonReport::default();

        for entry in discovered.iter() {
            ensure_active(&stage, &cancel)?;
            seen.insert(entry.path.as_path());
            match indexed.get(entry.path.as_path()) {
                None => report.added.push(entry.clone()),
                Some(signature) if signature_changed(signature, &entry.signature()) => {
                    report.modified.push(entry.clone())
                }
                Some(_) => report.unchanged.push(entry.path.clone()),
            }
            reporter.advance(1).await?;
        }

        for file in &library.indexed_files {
            if seen.contains(file.path.as_path()) {
                continue;
            }
            if discovered.is_unobserved(&file.path) {
                report.unobserved.push(file.path.clone());
            } else {
                report.missing.push(file.path.clone());
            }
        }

        ensure_active(&stage, &cancel)?;
        reporter.finish().await?;
        info!(
            target: "scan::jobs",
            library_id = %ctx.library_id,
            added = report.added.len(),
            modified = report.modified.len(),
            unchanged = report.unchanged.len(),
            missing = report.missing.len(),
            unobserved = report.unobserved.len(),
            "comparison complete"
        );
        Ok(StagePayload::Compared(Arc::new(report)))
    }
}
