use std::fmt;
use std::sync::Arc;

use scanflow_model::{ScanEvent, ScanIdentity, ScanRequest};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::events::EventPublisher;
use super::graph::{JobGraph, ScanRun};
use super::job::StageContext;
use super::repository::{LibraryRepository, resolve_library};
use crate::error::{Result, ScanError};
use crate::scan::config::ScanConfig;
use crate::scan::discovery::FileSystem;

/// Entry point for running scans: resolves the library, instantiates the job
/// graph for the request and drives it.
#[derive(Clone)]
pub struct ScanCoordinator {
    graph: Arc<JobGraph>,
    repository: Arc<dyn LibraryRepository>,
    publisher: Arc<dyn EventPublisher>,
    fs: Arc<dyn FileSystem>,
    config: ScanConfig,
}

impl fmt::Debug for ScanCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanCoordinator")
            .field("graph", &self.graph)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ScanCoordinator {
    /// Coordinator running the default library-scan pipeline.
    pub fn new(
        repository: Arc<dyn LibraryRepository>,
        publisher: Arc<dyn EventPublisher>,
        fs: Arc<dyn FileSystem>,
        config: ScanConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            graph: Arc::new(JobGraph::library_scan()?),
            repository,
            publisher,
            fs,
            config,
        })
    }

    /// Swap the pipeline for a custom graph template.
    pub fn with_graph(mut self, graph: Arc<JobGraph>) -> Self {
        self.graph = graph;
        self
    }

    pub fn graph(&self) -> &JobGraph {
        &self.graph
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Resolve the library and build a fresh run for `request`.
    ///
    /// When the library is missing or not convertible one `ScanFailed` is
    /// published and no node is created.
    pub async fn prepare(&self, request: &ScanRequest) -> Result<ScanRun> {
        let identity = request.identity;
        let library = match resolve_library(self.repository.as_ref(), request.library_id).await {
            Ok(library) => library,
            Err(err) => {
                warn!(
                    target: "scan::jobs",
                    library_id = %request.library_id,
                    scan_id = %identity.scan_id,
                    error = %err,
                    "scan rejected"
                );
                let event = ScanEvent::failed(identity, request.library_id, None, err.to_string());
                if let Err(publish_err) = self.publisher.publish(event).await {
                    warn!(
                        target: "scan::jobs",
                        scan_id = %identity.scan_id,
                        error = %publish_err,
                        "failed to publish scan failure"
                    );
                }
                return Err(err);
            }
        };

        let include_hidden = request
            .include_hidden
            .unwrap_or(self.config.discovery.include_hidden);
        info!(
            target: "scan::jobs",
            library_id = %library.id,
            library = %library.name,
            scan_id = %identity.scan_id,
            user_id = %identity.user_id,
            locations = library.content_locations.len(),
            include_hidden,
            "scan accepted"
        );

        let context = StageContext::new(
            identity,
            library.id,
            include_hidden,
            self.repository.clone(),
            self.publisher.clone(),
            self.fs.clone(),
            self.config.clone(),
        );
        self.graph.instantiate(Arc::new(context))
    }

    /// Prepare and execute one scan, waiting for the whole graph.
    pub async fn scan(&self, request: ScanRequest, cancel: CancellationToken) -> Result<()> {
        let run = self.prepare(&request).await?;
        run.execute(cancel).await
    }

    /// Run a scan on its own task; the handle cancels and joins it.
    pub fn spawn(&self, request: ScanRequest) -> ScanHandle {
        let cancel = CancellationToken::new();
        let identity = request.identity;
        let coordinator = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { coordinator.scan(request, token).await });
        ScanHandle {
            identity,
            cancel,
            task,
        }
    }
}

/// Supervised handle to a spawned scan.
#[derive(Debug)]
pub struct ScanHandle {
    identity: ScanIdentity,
    cancel: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl ScanHandle {
    pub fn identity(&self) -> ScanIdentity {
        self.identity
    }

    /// Request cancellation; running stages stop at their next check.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the scan; task panics surface as `ScanError::TaskJoin`.
    pub async fn join(self) -> Result<()> {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(err) => Err(ScanError::from(err)),
        }
    }
}
