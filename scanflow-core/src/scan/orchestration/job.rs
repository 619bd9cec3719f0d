//! Generic DAG node wrapper and the stage capability it drives.
//!
//! A [`JobNode`] owns only fan-in mechanics: an atomic count of completed
//! parents, a one-shot claim, an inbox collecting parent outputs, a status
//! word and its edges. The work itself comes from a [`StageHandler`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use once_cell::sync::OnceCell;
use scanflow_model::{JobStatus, LibraryId, ScanEvent, ScanIdentity, StageId};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::events::EventPublisher;
use super::progress::ProgressReporter;
use super::repository::LibraryRepository;
use super::stages::{ComparisonReport, DiscoveryReport, LookupReport, SaveReport};
use crate::error::{Result, ScanError};
use crate::scan::config::ScanConfig;
use crate::scan::discovery::FileSystem;

/// Output handed from a stage to its children.
#[derive(Debug, Clone, Default)]
pub enum StagePayload {
    #[default]
    Empty,
    Discovered(Arc<DiscoveryReport>),
    Compared(Arc<ComparisonReport>),
    Located(Arc<LookupReport>),
    Saved(SaveReport),
}

impl StagePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            StagePayload::Empty => "empty",
            StagePayload::Discovered(_) => "discovered",
            StagePayload::Compared(_) => "compared",
            StagePayload::Located(_) => "located",
            StagePayload::Saved(_) => "saved",
        }
    }
}

/// Outputs of every parent of a node, keyed by the parent's stage.
#[derive(Debug, Clone, Default)]
pub struct StageInputs {
    by_parent: BTreeMap<StageId, StagePayload>,
}

impl StageInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, from: StageId, payload: StagePayload) {
        self.by_parent.insert(from, payload);
    }

    pub fn get(&self, stage: &StageId) -> Option<&StagePayload> {
        self.by_parent.get(stage)
    }

    pub fn len(&self) -> usize {
        self.by_parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_parent.is_empty()
    }

    pub fn parents(&self) -> impl Iterator<Item = &StageId> + '_ {
        self.by_parent.keys()
    }

    /// Discovery output from whichever parent produced it.
    pub fn discovered(&self, consumer: &StageId) -> Result<Arc<DiscoveryReport>> {
        self.by_parent
            .values()
            .find_map(|payload| match payload {
                StagePayload::Discovered(report) => Some(report.clone()),
                _ => None,
            })
            .ok_or_else(|| missing_input(consumer, "discovered entries"))
    }

    pub fn compared(&self, consumer: &StageId) -> Result<Arc<ComparisonReport>> {
        self.by_parent
            .values()
            .find_map(|payload| match payload {
                StagePayload::Compared(report) => Some(report.clone()),
                _ => None,
            })
            .ok_or_else(|| missing_input(consumer, "comparison report"))
    }

    pub fn located(&self, consumer: &StageId) -> Result<Arc<LookupReport>> {
        self.by_parent
            .values()
            .find_map(|payload| match payload {
                StagePayload::Located(report) => Some(report.clone()),
                _ => None,
            })
            .ok_or_else(|| missing_input(consumer, "lookup report"))
    }
}

fn missing_input(consumer: &StageId, what: &str) -> ScanError {
    ScanError::StageFailed {
        stage: consumer.clone(),
        reason: format!("no parent provided {what}"),
    }
}

/// Shared context of one scan run.
pub struct StageContext {
    pub identity: ScanIdentity,
    pub library_id: LibraryId,
    pub include_hidden: bool,
    pub repository: Arc<dyn LibraryRepository>,
    pub publisher: Arc<dyn EventPublisher>,
    pub fs: Arc<dyn FileSystem>,
    pub config: ScanConfig,
    failure_reported: AtomicBool,
}

impl fmt::Debug for StageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageContext")
            .field("identity", &self.identity)
            .field("library_id", &self.library_id)
            .field("include_hidden", &self.include_hidden)
            .field("config", &self.config)
            .field("failure_reported", &self.failure_reported())
            .finish_non_exhaustive()
    }
}

impl StageContext {
    pub fn new(
        identity: ScanIdentity,
        library_id: LibraryId,
        include_hidden: bool,
        repository: Arc<dyn LibraryRepository>,
        publisher: Arc<dyn EventPublisher>,
        fs: Arc<dyn FileSystem>,
        config: ScanConfig,
    ) -> Self {
        Self {
            identity,
            library_id,
            include_hidden,
            repository,
            publisher,
            fs,
            config,
            failure_reported: AtomicBool::new(false),
        }
    }

    /// True once some stage of this run published `ScanFailed`.
    pub fn failure_reported(&self) -> bool {
        self.failure_reported.load(Ordering::Acquire)
    }

    /// Claims the run's single `ScanFailed` slot. Only the first caller wins.
    fn claim_failure_report(&self) -> bool {
        self.failure_reported
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Heartbeat reporter for `stage`, bound to this run's identity.
    pub fn reporter(&self, stage: StageId) -> ProgressReporter {
        ProgressReporter::new(
            self.publisher.clone(),
            self.identity,
            self.library_id,
            stage,
            self.config.progress,
        )
    }
}

/// Returns `Err(ScanError::Cancelled)` once `cancel` fired.
pub fn ensure_active(stage: &StageId, cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(ScanError::Cancelled(format!("{stage} cancelled")))
    } else {
        Ok(())
    }
}

/// Work performed by one kind of job.
#[async_trait]
pub trait StageHandler: Send + Sync + 'static {
    fn id(&self) -> StageId;

    /// Runs on its own task. Implementations check `cancel` at every
    /// suspension point and return `ScanError::Cancelled` when it fired.
    async fn run(
        &self,
        ctx: Arc<StageContext>,
        inputs: StageInputs,
        cancel: CancellationToken,
    ) -> Result<StagePayload>;
}

/// Run-scoped node of a job graph.
pub struct JobNode {
    stage: StageId,
    handler: Arc<dyn StageHandler>,
    context: Arc<StageContext>,
    status: AtomicU8,
    parents_completed: AtomicUsize,
    claimed: AtomicBool,
    payload_runs: AtomicUsize,
    inbox: Mutex<StageInputs>,
    parents: OnceCell<Vec<Weak<JobNode>>>,
    children: OnceCell<Vec<Arc<JobNode>>>,
}

impl fmt::Debug for JobNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobNode")
            .field("stage", &self.stage)
            .field("status", &self.status())
            .field("parents", &self.parent_count())
            .field("children", &self.children().len())
            .field(
                "parents_completed",
                &self.parents_completed.load(Ordering::Acquire),
            )
            .finish()
    }
}

impl JobNode {
    pub(crate) fn new(
        stage: StageId,
        handler: Arc<dyn StageHandler>,
        context: Arc<StageContext>,
    ) -> Self {
        Self {
            stage,
            handler,
            context,
            status: AtomicU8::new(JobStatus::Pending.as_u8()),
            parents_completed: AtomicUsize::new(0),
            claimed: AtomicBool::new(false),
            payload_runs: AtomicUsize::new(0),
            inbox: Mutex::new(StageInputs::new()),
            parents: OnceCell::new(),
            children: OnceCell::new(),
        }
    }

    /// Wires edges once, right after every node of the run exists.
    pub(crate) fn connect(
        &self,
        parents: Vec<Weak<JobNode>>,
        children: Vec<Arc<JobNode>>,
    ) -> Result<()> {
        self.parents.set(parents).map_err(|_| {
            ScanError::Internal(format!("{} wired twice", self.stage))
        })?;
        self.children.set(children).map_err(|_| {
            ScanError::Internal(format!("{} wired twice", self.stage))
        })?;
        Ok(())
    }

    pub fn stage(&self) -> &StageId {
        &self.stage
    }

    pub fn status(&self) -> JobStatus {
        JobStatus::from_u8(self.status.load(Ordering::Acquire))
            .unwrap_or(JobStatus::Failed)
    }

    pub fn parent_count(&self) -> usize {
        self.parents.get().map_or(0, Vec::len)
    }

    pub fn parents(&self) -> Vec<Arc<JobNode>> {
        self.parents
            .get()
            .map(|parents| parents.iter().filter_map(Weak::upgrade).collect())
            .unwrap_or_default()
    }

    pub fn children(&self) -> &[Arc<JobNode>] {
        self.children.get().map_or(&[], Vec::as_slice)
    }

    /// How many times the stage payload started. Never exceeds one.
    pub fn payload_runs(&self) -> usize {
        self.payload_runs.load(Ordering::Acquire)
    }

    fn set_status(&self, status: JobStatus) {
        self.status.store(status.as_u8(), Ordering::Release);
    }

    /// Notify this node that a parent finished (or, for a root, that the
    /// run started).
    ///
    /// The parent's output is deposited before the counter moves, so the
    /// call that brings the count to the number of parents sees every
    /// output. That call runs the payload; every other call returns at once.
    ///
    /// `cancel` is treated as run-scoped: a failing stage cancels it so the
    /// rest of the run stops. Pass a child token to keep a caller's token
    /// untouched.
    pub fn execute(
        self: Arc<Self>,
        from: Option<(StageId, StagePayload)>,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<()>> {
        async move {
            if let Some((parent, payload)) = from {
                self.inbox.lock().await.insert(parent, payload);
            }

            let expected = self.parent_count();
            let arrived = self.parents_completed.fetch_add(1, Ordering::AcqRel) + 1;
            if expected != 0 && arrived != expected {
                trace!(
                    target: "scan::jobs",
                    stage = %self.stage,
                    arrived,
                    expected,
                    "waiting for remaining parents"
                );
                return Ok(());
            }

            if self
                .claimed
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                trace!(target: "scan::jobs", stage = %self.stage, "already claimed");
                return Ok(());
            }

            self.run(cancel).await
        }
        .boxed()
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let ctx = self.context.clone();
        if let Err(err) = ensure_active(&self.stage, &cancel) {
            self.set_status(JobStatus::Canceled);
            debug!(
                target: "scan::jobs",
                stage = %self.stage,
                scan_id = %ctx.identity.scan_id,
                "cancelled before start"
            );
            return Err(err);
        }

        self.set_status(JobStatus::Running);
        let inputs = std::mem::take(&mut *self.inbox.lock().await);
        self.payload_runs.fetch_add(1, Ordering::AcqRel);
        debug!(
            target: "scan::jobs",
            stage = %self.stage,
            scan_id = %ctx.identity.scan_id,
            library_id = %ctx.library_id,
            inputs = inputs.len(),
            "stage started"
        );

        let handler = self.handler.clone();
        let task_ctx = ctx.clone();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            handler.run(task_ctx, inputs, task_cancel).await
        });
        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(join) => Err(ScanError::from(join)),
        };

        let output = match outcome {
            Ok(output) if !cancel.is_cancelled() => output,
            Ok(_) => {
                self.set_status(JobStatus::Canceled);
                debug!(target: "scan::jobs", stage = %self.stage, "cancelled at completion");
                return Err(ScanError::Cancelled(format!("{} cancelled", self.stage)));
            }
            Err(err) if err.is_cancelled() => {
                self.set_status(JobStatus::Canceled);
                debug!(
                    target: "scan::jobs",
                    stage = %self.stage,
                    scan_id = %ctx.identity.scan_id,
                    "stage cancelled"
                );
                return Err(err);
            }
            Err(err) => return Err(self.fail(&ctx, err, &cancel).await),
        };

        self.set_status(JobStatus::Completed);
        publish(
            &ctx,
            ScanEvent::stage_completed(ctx.identity, ctx.library_id, self.stage.clone()),
        )
        .await;

        let children = self.children();
        if children.is_empty() {
            info!(
                target: "scan::jobs",
                stage = %self.stage,
                scan_id = %ctx.identity.scan_id,
                library_id = %ctx.library_id,
                "scan finished"
            );
            publish(&ctx, ScanEvent::finished(ctx.identity)).await;
            return Ok(());
        }

        debug!(
            target: "scan::jobs",
            stage = %self.stage,
            output = output.kind(),
            children = children.len(),
            "stage completed"
        );
        let notifications = children.iter().map(|child| {
            child
                .clone()
                .execute(Some((self.stage.clone(), output.clone())), cancel.clone())
        });
        merge_outcomes(join_all(notifications).await)
    }

    async fn fail(
        &self,
        ctx: &StageContext,
        err: ScanError,
        cancel: &CancellationToken,
    ) -> ScanError {
        self.set_status(JobStatus::Failed);
        let err = match err {
            err @ ScanError::StageFailed { .. } => err,
            other => ScanError::StageFailed {
                stage: self.stage.clone(),
                reason: other.to_string(),
            },
        };
        error!(
            target: "scan::jobs",
            stage = %self.stage,
            scan_id = %ctx.identity.scan_id,
            library_id = %ctx.library_id,
            error = %err,
            "stage failed"
        );
        if cancel.is_cancelled() {
            debug!(target: "scan::jobs", stage = %self.stage, "failure after cancellation not published");
        } else if ctx.claim_failure_report() {
            publish(
                ctx,
                ScanEvent::failed(
                    ctx.identity,
                    ctx.library_id,
                    Some(self.stage.clone()),
                    err.to_string(),
                ),
            )
            .await;
        } else {
            debug!(target: "scan::jobs", stage = %self.stage, "run failure already reported");
        }
        cancel.cancel();
        err
    }
}

async fn publish(ctx: &StageContext, event: ScanEvent) {
    let name = event.event_name();
    if let Err(err) = ctx.publisher.publish(event).await {
        warn!(
            target: "scan::jobs",
            event = name,
            scan_id = %ctx.identity.scan_id,
            error = %err,
            "failed to publish scan event"
        );
    }
}

/// Folds branch outcomes: any failure wins over cancellation, cancellation
/// wins over success.
pub(crate) fn merge_outcomes(results: Vec<Result<()>>) -> Result<()> {
    let mut cancelled = None;
    for result in results {
        match result {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => {
                cancelled.get_or_insert(err);
            }
            Err(err) => return Err(err),
        }
    }
    cancelled.map_or(Ok(()), Err)
}
