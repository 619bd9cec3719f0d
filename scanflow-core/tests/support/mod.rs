//! Shared harness for scan pipeline integration tests.
#![allow(dead_code)]

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use scanflow_core::scan::{
    EventPublisher, InMemoryFs, InMemoryLibraryRepository, ScanConfig,
    StageContext, StageHandler, StageInputs, StagePayload, ensure_active,
};
use scanflow_core::{Result, ScanError};
use scanflow_model::{
    LibraryId, LibraryRecord, ScanEvent, ScanIdentity, ScanProgress, StageId,
    UserId,
};
use tokio::sync::{Barrier, Mutex as AsyncMutex, Notify};
use tokio_util::sync::CancellationToken;

type CancelWhen = Box<dyn Fn(&ScanEvent) -> bool + Send + Sync>;

/// Publisher that records every event and can fire a cancellation token when
/// a given event arrives.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Arc<AsyncMutex<Vec<ScanEvent>>>,
    cancel: Option<(CancellationToken, CancelWhen)>,
    after_cancel: AtomicUsize,
}

impl fmt::Debug for RecordingPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.events.try_lock() {
            Ok(guard) => f
                .debug_struct("RecordingPublisher")
                .field("event_count", &guard.len())
                .finish(),
            Err(_) => f
                .debug_struct("RecordingPublisher")
                .field("event_count", &"<locked>")
                .finish(),
        }
    }
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels `token` right after recording the first event matching `when`.
    pub fn cancelling(
        token: CancellationToken,
        when: impl Fn(&ScanEvent) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            cancel: Some((token, Box::new(when))),
            ..Self::default()
        }
    }

    pub async fn events(&self) -> Vec<ScanEvent> {
        self.events.lock().await.clone()
    }

    pub async fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|event| event.event_name() == name)
            .count()
    }

    /// Fine-grained progress snapshots published by `stage`, in order.
    pub async fn progress_of(&self, stage: &StageId) -> Vec<ScanProgress> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|event| match event {
                ScanEvent::JobProgressChanged(changed)
                    if changed.progress.stage_name() == stage.as_str() =>
                {
                    Some(changed.progress.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Stages that published `ScanProgressChanged`, in completion order.
    pub async fn completed_stages(&self) -> Vec<StageId> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|event| match event {
                ScanEvent::ScanProgressChanged(changed) => Some(changed.stage.clone()),
                _ => None,
            })
            .collect()
    }

    /// Events recorded after the cancellation hook fired.
    pub fn published_after_cancel(&self) -> usize {
        self.after_cancel.load(Ordering::Acquire)
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: ScanEvent) -> Result<()> {
        if let Some((token, when)) = &self.cancel {
            if token.is_cancelled() {
                self.after_cancel.fetch_add(1, Ordering::AcqRel);
            } else if when(&event) {
                self.events.lock().await.push(event);
                token.cancel();
                return Ok(());
            }
        }
        self.events.lock().await.push(event);
        Ok(())
    }
}

/// What a [`ProbeStage`] does once it runs.
#[derive(Clone)]
pub enum Behaviour {
    Succeed,
    Sleep(Duration),
    /// Wait until every participant of the barrier is running.
    Rendezvous(Arc<Barrier>),
    Fail(&'static str),
    /// Wait for the barrier, then fail, so sibling failures overlap.
    FailTogether(Arc<Barrier>, &'static str),
    /// Report more finished units than the stage announced.
    OverrunProgress,
    /// Signal `started`, then wait for cancellation.
    BlockUntilCancelled(Arc<Notify>),
}

/// Counters shared between a probe stage and the test observing it.
#[derive(Clone, Default, Debug)]
pub struct Probe {
    runs: Arc<AtomicUsize>,
    inputs: Arc<AsyncMutex<Vec<Vec<StageId>>>>,
}

impl Probe {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::Acquire)
    }

    /// Parent stages seen by each run.
    pub async fn inputs(&self) -> Vec<Vec<StageId>> {
        self.inputs.lock().await.clone()
    }
}

/// Test stage that records how often it ran and what it received.
pub struct ProbeStage {
    id: StageId,
    probe: Probe,
    behaviour: Behaviour,
}

impl ProbeStage {
    pub fn new(id: &'static str, behaviour: Behaviour) -> (Arc<dyn StageHandler>, Probe) {
        let probe = Probe::default();
        let stage = Self {
            id: StageId::new(id),
            probe: probe.clone(),
            behaviour,
        };
        (Arc::new(stage), probe)
    }
}

#[async_trait]
impl StageHandler for ProbeStage {
    fn id(&self) -> StageId {
        self.id.clone()
    }

    async fn run(
        &self,
        ctx: Arc<StageContext>,
        inputs: StageInputs,
        cancel: CancellationToken,
    ) -> Result<StagePayload> {
        self.probe.runs.fetch_add(1, Ordering::AcqRel);
        self.probe
            .inputs
            .lock()
            .await
            .push(inputs.parents().cloned().collect());

        match &self.behaviour {
            Behaviour::Succeed => {}
            Behaviour::Sleep(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(*delay) => {}
                    _ = cancel.cancelled() => {}
                }
            }
            Behaviour::Rendezvous(barrier) => {
                barrier.wait().await;
            }
            Behaviour::Fail(reason) => {
                return Err(ScanError::Internal((*reason).to_string()));
            }
            Behaviour::FailTogether(barrier, reason) => {
                barrier.wait().await;
                return Err(ScanError::Internal((*reason).to_string()));
            }
            Behaviour::OverrunProgress => {
                let mut reporter = ctx.reporter(self.id.clone());
                reporter.begin(1).await?;
                reporter.advance(2).await?;
                reporter.finish().await?;
            }
            Behaviour::BlockUntilCancelled(started) => {
                started.notify_one();
                cancel.cancelled().await;
            }
        }
        ensure_active(&self.id, &cancel)?;
        Ok(StagePayload::Empty)
    }
}

pub fn identity() -> ScanIdentity {
    ScanIdentity::for_user(UserId::new())
}

/// Stage context for graphs of probe stages, which never touch the
/// repository or the filesystem.
pub fn probe_context(publisher: Arc<dyn EventPublisher>) -> Arc<StageContext> {
    Arc::new(StageContext::new(
        identity(),
        LibraryId::new(),
        false,
        Arc::new(InMemoryLibraryRepository::new()),
        publisher,
        Arc::new(InMemoryFs::new()),
        ScanConfig::default(),
    ))
}

pub fn library(roots: &[&str]) -> LibraryRecord {
    LibraryRecord {
        id: LibraryId::new(),
        name: "Movies".into(),
        content_locations: roots.iter().map(|root| root.to_string()).collect(),
        indexed_files: Vec::new(),
    }
}

/// Config that publishes a heartbeat for every unit of work.
pub fn chatty_config() -> ScanConfig {
    let mut config = ScanConfig::default();
    config.progress.sample_every = 1;
    config.progress.heartbeat_ms = 0;
    config
}
