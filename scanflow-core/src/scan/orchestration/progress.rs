//! Throttled progress reporting for running jobs.
//!
//! Each job publishes a zero-progress `JobProgressChanged` before it starts
//! working and a final one when it is done. In between, [`ProgressReporter`]
//! counts units of work and only evaluates whether to publish on a sampling
//! boundary (`sample_every` units); on a boundary it publishes only if the
//! heartbeat interval elapsed since the last publish.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use scanflow_model::{LibraryId, ScanEvent, ScanIdentity, ScanProgress, StageId};
use tokio::time::Instant;
use tracing::warn;

use super::events::EventPublisher;
use crate::error::Result;
use crate::scan::config::ProgressConfig;

/// Count-based sampling combined with a time-based throttle.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    sample_every: u64,
    heartbeat: Duration,
    last_publish: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(config: ProgressConfig) -> Self {
        Self {
            sample_every: config.sample_every.max(1),
            heartbeat: config.heartbeat(),
            last_publish: None,
        }
    }

    /// `units` is the running counter after the latest increment.
    pub fn should_publish(&self, units: u64, now: Instant) -> bool {
        if units == 0 || units % self.sample_every != 0 {
            return false;
        }
        match self.last_publish {
            Some(last) => now.saturating_duration_since(last) >= self.heartbeat,
            None => true,
        }
    }

    pub fn mark_published(&mut self, now: Instant) {
        self.last_publish = Some(now);
    }
}

/// Publishes `JobProgressChanged` events for one stage of one scan run.
pub struct ProgressReporter {
    publisher: Arc<dyn EventPublisher>,
    identity: ScanIdentity,
    library_id: LibraryId,
    stage: StageId,
    completed: u64,
    total: u64,
    throttle: ProgressThrottle,
    published: u64,
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("stage", &self.stage)
            .field("scan_id", &self.identity.scan_id)
            .field("completed", &self.completed)
            .field("total", &self.total)
            .field("published", &self.published)
            .finish()
    }
}

fn as_signed(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl ProgressReporter {
    pub fn new(
        publisher: Arc<dyn EventPublisher>,
        identity: ScanIdentity,
        library_id: LibraryId,
        stage: StageId,
        config: ProgressConfig,
    ) -> Self {
        Self {
            publisher,
            identity,
            library_id,
            stage,
            completed: 0,
            total: 0,
            throttle: ProgressThrottle::new(config),
            published: 0,
        }
    }

    /// Publish the zero-progress snapshot for a stage expecting `total` units.
    pub async fn begin(&mut self, total: u64) -> Result<()> {
        self.completed = 0;
        self.total = total;
        let progress = ScanProgress::new(0, as_signed(total), self.stage.as_str())?;
        self.emit(progress).await;
        Ok(())
    }

    /// Grow the expected amount of work, for stages that only learn their
    /// size while running.
    pub fn extend_total(&mut self, units: u64) {
        self.total = self.total.saturating_add(units);
    }

    /// Record `units` of finished work and publish a heartbeat when both the
    /// sampling boundary and the heartbeat interval allow it.
    pub async fn advance(&mut self, units: u64) -> Result<()> {
        for _ in 0..units {
            self.completed = self.completed.saturating_add(1);
            let now = Instant::now();
            if self.throttle.should_publish(self.completed, now) {
                let progress = self.snapshot()?;
                self.emit(progress).await;
            }
        }
        Ok(())
    }

    /// Publish the final snapshot for this stage.
    pub async fn finish(&mut self) -> Result<()> {
        let progress = self.snapshot()?;
        self.emit(progress).await;
        Ok(())
    }

    /// Current snapshot; fails when more units were completed than expected.
    pub fn snapshot(&self) -> Result<ScanProgress> {
        Ok(ScanProgress::new(
            as_signed(self.completed),
            as_signed(self.total),
            self.stage.as_str(),
        )?)
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of `JobProgressChanged` events published so far.
    pub fn published(&self) -> u64 {
        self.published
    }

    async fn emit(&mut self, progress: ScanProgress) {
        let now = Instant::now();
        self.throttle.mark_published(now);
        self.published += 1;
        let event = ScanEvent::job_progress(self.identity, self.library_id, progress);
        if let Err(err) = self.publisher.publish(event).await {
            warn!(
                target: "scan::jobs",
                stage = %self.stage,
                scan_id = %self.identity.scan_id,
                error = %err,
                "failed to publish job progress"
            );
        }
    }
}
