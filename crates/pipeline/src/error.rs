use std::path::PathBuf;

use forge_core::error::CoreError;
use forge_core::job::{FailureKind, Job, JobState};
use forge_core::types::JobId;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Request validation failed before any graph was built.
    #[error(transparent)]
    Validation(#[from] CoreError),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// The reachability probe failed; no job was created.
    #[error("Backend {backend} unreachable: {message}")]
    BackendUnreachable {
        backend: &'static str,
        message: String,
    },

    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),

    /// The backend failed the job, or the submit call itself failed.
    #[error("Execution failed{}: {message} (progress {:.0}%, started: {started})", node_suffix(.node_id), .last_progress * 100.0)]
    ExecutionFailed {
        message: String,
        node_id: Option<String>,
        last_progress: f64,
        started: bool,
    },

    #[error("Job timed out after {elapsed_ms} ms at {:.0}%", .last_progress * 100.0)]
    Timeout { elapsed_ms: i64, last_progress: f64 },

    #[error("Job cancelled")]
    Cancelled,

    /// The job completed but its outputs could not be retrieved.
    #[error("Artifact retrieval failed for job {job_id}: {message}")]
    ArtifactFetch { job_id: JobId, message: String },

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Store error at {path}: {message}")]
    Store { path: PathBuf, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// The error matching a terminal, unsuccessful job.
    pub fn from_terminal_job(job: &Job) -> Self {
        let failure = job.failure.as_ref();
        let message = failure.map(|f| f.message.clone()).unwrap_or_default();
        match job.state {
            JobState::Cancelled => EngineError::Cancelled,
            JobState::TimedOut => EngineError::Timeout {
                elapsed_ms: failure.map_or_else(|| job.elapsed_ms(), |f| f.elapsed_ms),
                last_progress: job.progress,
            },
            _ if failure.map(|f| f.kind) == Some(FailureKind::SubmissionRejected) => {
                EngineError::SubmissionRejected(message)
            }
            _ => EngineError::ExecutionFailed {
                message,
                node_id: failure.and_then(|f| f.node_id.clone()),
                last_progress: job.progress,
                started: failure.is_some_and(|f| f.started),
            },
        }
    }
}

fn node_suffix(node_id: &Option<String>) -> String {
    node_id
        .as_ref()
        .map(|id| format!(" at node {id}"))
        .unwrap_or_default()
}
