//! Job lifecycle feed backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] fans out every [`JobEvent`] to any number of
//! subscribers (UI, logs, tests). Publishing never blocks a job.

use forge_core::artifact::Artifact;
use forge_core::job::JobFailure;
use forge_core::types::{GenerationMode, JobId, MediaKind, Timestamp};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::progress::ProgressSnapshot;

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Queued {
        job_id: JobId,
        media_kind: MediaKind,
        mode: GenerationMode,
        model: String,
        at: Timestamp,
    },
    Submitted {
        job_id: JobId,
        backend_job_id: String,
    },
    /// The backend reported the job executing.
    Started { job_id: JobId },
    Progress(ProgressSnapshot),
    Completed { job_id: JobId },
    Failed { job_id: JobId, failure: JobFailure },
    TimedOut { job_id: JobId, failure: JobFailure },
    Cancelled { job_id: JobId },
    ArtifactsReady {
        job_id: JobId,
        artifacts: Vec<Artifact>,
    },
    /// Outputs of a completed job could not be retrieved.
    ArtifactsFailed { job_id: JobId, message: String },
    /// Artifacts were written but the history entry was not persisted.
    HistoryFailed { job_id: JobId, message: String },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Queued { job_id, .. }
            | JobEvent::Submitted { job_id, .. }
            | JobEvent::Started { job_id }
            | JobEvent::Completed { job_id }
            | JobEvent::Failed { job_id, .. }
            | JobEvent::TimedOut { job_id, .. }
            | JobEvent::Cancelled { job_id }
            | JobEvent::ArtifactsReady { job_id, .. }
            | JobEvent::ArtifactsFailed { job_id, .. }
            | JobEvent::HistoryFailed { job_id, .. } => *job_id,
            JobEvent::Progress(snapshot) => snapshot.job_id,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast channel capacity for job events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// In-process fan-out of job events.
///
/// Slow receivers observe `RecvError::Lagged` once the buffer is full.
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: JobEvent) {
        // Ignore the SendError; it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}
