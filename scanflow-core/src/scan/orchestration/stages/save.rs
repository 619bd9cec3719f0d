use std::sync::Arc;

use async_trait::async_trait;
use scanflow_model::{ScanDelta, StageId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::comparison::ComparisonReport;
use super::lookup::LookupReport;
use crate::error::Result;
use crate::scan::orchestration::job::{
    StageContext, StageHandler, StageInputs, StagePayload, ensure_active,
};

/// Summary of what the save stage wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub upserts: usize,
    pub removals: usize,
    /// Changed files left out because no content location owns them.
    pub skipped: usize,
    /// False when there was nothing to write.
    pub persisted: bool,
}

/// Builds the delta for a run: changed files that resolved to a content
/// location are upserted, missing files are removed.
pub fn build_delta(comparison: &ComparisonReport, lookup: &LookupReport) -> (ScanDelta, usize) {
    let mut delta = ScanDelta::default();
    let mut skipped = 0;
    for entry in comparison.changed() {
        match lookup.record_for(&entry.path) {
            Some(record) => delta.upserts.push(record.clone()),
            None => skipped += 1,
        }
    }
    delta.removals = comparison.missing.clone();
    (delta, skipped)
}

/// Terminal stage: merges comparison and lookup outputs and persists them.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetadataSaveStage;

#[async_trait]
impl StageHandler for MetadataSaveStage {
    fn id(&self) -> StageId {
        StageId::METADATA_SAVE
    }

    async fn run(
        &self,
        ctx: Arc<StageContext>,
        inputs: StageInputs,
        cancel: CancellationToken,
    ) -> Result<StagePayload> {
        let stage = self.id();
        let comparison = inputs.compared(&stage)?;
        let lookup = inputs.located(&stage)?;

        let (delta, skipped) = build_delta(&comparison, &lookup);
        let mut reporter = ctx.reporter(stage.clone());
        let work = (delta.upserts.len() + delta.removals.len()) as u64;
        reporter.begin(work).await?;
        ensure_active(&stage, &cancel)?;

        let mut report = SaveReport {
            upserts: delta.upserts.len(),
            removals: delta.removals.len(),
            skipped,
            persisted: false,
        };
        if delta.is_empty() {
            debug!(target: "scan::jobs", library_id = %ctx.library_id, "nothing to save");
        } else {
            ctx.repository
                .save_scan_results(ctx.library_id, delta)
                .await?;
            report.persisted = true;
            reporter.advance(work).await?;
        }

        reporter.finish().await?;
        info!(
            target: "scan::jobs",
            library_id = %ctx.library_id,
            upserts = report.upserts,
            removals = report.removals,
            skipped = report.skipped,
            "scan results saved"
        );
        Ok(StagePayload::Saved(report))
    }
}
