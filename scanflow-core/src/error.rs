use scanflow_model::{ModelError, StageId};
use thiserror::Error;

use crate::scan::orchestration::graph::GraphError;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Library not found: {0}")]
    LibraryNotFound(String),

    #[error("Library not convertible: {0}")]
    LibraryUnconvertible(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Stage {stage} failed: {reason}")]
    StageFailed { stage: StageId, reason: String },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScanError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScanError::Cancelled(_))
    }
}

impl From<tokio::task::JoinError> for ScanError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            ScanError::Cancelled(format!("task aborted: {err}"))
        } else {
            ScanError::TaskJoin(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
