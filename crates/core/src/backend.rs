//! The execution backend seam.
//!
//! Both the external graph-execution service and the local direct path
//! implement [`ExecutionBackend`], so submission, progress tracking and
//! artifact retrieval are identical downstream of the router.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::progress::BackendEvent;
use crate::types::JobId;
use crate::workflow::WorkflowGraph;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend could not be reached at all.
    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    /// The backend refused a well-formed submission.
    #[error("Submission rejected: {0}")]
    Rejected(String),

    /// A request failed in transit or returned an unexpected response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// No progress stream is available; callers should poll.
    #[error("Progress stream unavailable: {0}")]
    StreamUnavailable(String),

    #[error("Unknown backend job {0}")]
    NotFound(String),

    /// Local execution failed.
    #[error("Execution error: {0}")]
    Execution(String),
}

/// Remote view of one job, as seen by a status poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemoteStatus {
    /// Accepted, not yet executing.
    Pending,
    Running,
    Completed,
    Failed {
        message: String,
        node_id: Option<String>,
    },
    /// The backend no longer knows the job (evicted or interrupted).
    Unknown,
}

impl RemoteStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RemoteStatus::Completed | RemoteStatus::Failed { .. })
    }
}

/// Where a produced file can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "location", rename_all = "snake_case")]
pub enum OutputRef {
    /// A file held by the remote service.
    Remote {
        filename: String,
        subfolder: String,
        folder_type: String,
    },
    /// A file on the local filesystem.
    Local { path: PathBuf },
}

impl OutputRef {
    pub fn file_name(&self) -> String {
        match self {
            OutputRef::Remote { filename, .. } => filename.clone(),
            OutputRef::Local { path } => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    /// Lowercased extension, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name();
        let (_, ext) = name.rsplit_once('.')?;
        (!ext.is_empty()).then(|| ext.to_lowercase())
    }
}

/// What the dispatcher hands a backend to run.
#[derive(Debug, Clone, Copy)]
pub struct Submission<'a> {
    pub job_id: JobId,
    pub graph: &'a WorkflowGraph,
}

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &'static str;

    /// Cheap reachability check. Callers bound it with their own timeout.
    async fn probe(&self) -> Result<(), BackendError>;

    /// Submit a compiled graph and return the backend's job id.
    async fn submit(&self, submission: Submission<'_>) -> Result<String, BackendError>;

    /// Open a progress stream for one job. The channel closes when the
    /// backend stops reporting (terminal event, or the transport gave up).
    async fn open_events(
        &self,
        job_id: JobId,
        backend_job_id: &str,
    ) -> Result<mpsc::Receiver<BackendEvent>, BackendError>;

    async fn poll_status(&self, backend_job_id: &str) -> Result<RemoteStatus, BackendError>;

    /// Best-effort cancellation.
    async fn cancel(&self, backend_job_id: &str) -> Result<(), BackendError>;

    /// Files produced by a completed job.
    async fn collect_outputs(&self, backend_job_id: &str) -> Result<Vec<OutputRef>, BackendError>;

    async fn fetch_output(&self, output: &OutputRef) -> Result<Vec<u8>, BackendError>;
}
