//! Job lifecycle: state machine and the per-job record.
//!
//! ```text
//! Queued -> Submitted -> Running -> {Completed | Failed | TimedOut | Cancelled}
//! ```
//!
//! `Submitted -> Failed` covers outright rejection. Cancellation and
//! timeouts may also arrive before the first progress event, so they are
//! reachable from `Queued`/`Submitted` too. Terminal states are absorbing.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::registry::ModelEntry;
use crate::types::{GenerationMode, JobId, MediaKind, Timestamp};
use crate::workflow::{GenerationRequest, WorkflowGraph};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Submitted,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::TimedOut | JobState::Cancelled
        )
    }

    /// Position in the lifecycle; later states rank higher.
    pub fn rank(self) -> u8 {
        match self {
            JobState::Queued => 0,
            JobState::Submitted => 1,
            JobState::Running => 2,
            JobState::Completed | JobState::Failed | JobState::TimedOut | JobState::Cancelled => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Submitted => "submitted",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::TimedOut => "timed_out",
            JobState::Cancelled => "cancelled",
        }
    }
}

/// Job state transition rules.
pub mod state_machine {
    use super::JobState::{self, *};

    /// States reachable from `from`. Terminal states return an empty slice.
    pub fn valid_transitions(from: JobState) -> &'static [JobState] {
        match from {
            Queued => &[Submitted, Failed, Cancelled],
            Submitted => &[Running, Failed, TimedOut, Cancelled],
            Running => &[Completed, Failed, TimedOut, Cancelled],
            Completed | Failed | TimedOut | Cancelled => &[],
        }
    }

    pub fn can_transition(from: JobState, to: JobState) -> bool {
        valid_transitions(from).contains(&to)
    }

    /// Validate a transition, returning a message for invalid ones.
    pub fn validate_transition(from: JobState, to: JobState) -> Result<(), String> {
        if can_transition(from, to) {
            Ok(())
        } else {
            Err(format!(
                "Invalid transition: {} -> {}",
                from.as_str(),
                to.as_str()
            ))
        }
    }
}

/// Why a job ended without output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The backend refused the graph.
    SubmissionRejected,
    /// The submit call itself failed; the work never started.
    SubmitError,
    /// A node failed mid-run.
    ExecutionFailed,
    Timeout,
    Cancelled,
}

/// Context preserved for a failed, timed-out or cancelled job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
    pub node_id: Option<String>,
    pub last_progress: f64,
    pub elapsed_ms: i64,
    /// Whether the backend ever reported the job running.
    pub started: bool,
}

/// One generation job, owned by the dispatcher.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub request: Arc<GenerationRequest>,
    /// Snapshot of the entry the graph was compiled from.
    pub model: ModelEntry,
    pub graph: Arc<WorkflowGraph>,
    pub state: JobState,
    pub progress: f64,
    pub current_node: Option<String>,
    pub backend_job_id: Option<String>,
    pub created_at: Timestamp,
    pub submitted_at: Option<Timestamp>,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub failure: Option<JobFailure>,
    /// Backend-reported error lines, kept for failed jobs.
    pub log: Vec<String>,
}

impl Job {
    pub fn new(
        id: JobId,
        request: Arc<GenerationRequest>,
        model: ModelEntry,
        graph: Arc<WorkflowGraph>,
    ) -> Self {
        Self {
            id,
            request,
            model,
            graph,
            state: JobState::Queued,
            progress: 0.0,
            current_node: None,
            backend_job_id: None,
            created_at: chrono::Utc::now(),
            submitted_at: None,
            started_at: None,
            finished_at: None,
            failure: None,
            log: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move to `to`, stamping the matching timestamp.
    pub fn transition(&mut self, to: JobState) -> Result<(), CoreError> {
        state_machine::validate_transition(self.state, to).map_err(CoreError::InvalidTransition)?;
        let now = chrono::Utc::now();
        match to {
            JobState::Submitted => self.submitted_at = Some(now),
            JobState::Running => self.started_at = Some(now),
            JobState::Completed => {
                self.finished_at = Some(now);
                self.progress = 1.0;
            }
            JobState::Failed | JobState::TimedOut | JobState::Cancelled => {
                self.finished_at = Some(now)
            }
            JobState::Queued => {}
        }
        self.state = to;
        Ok(())
    }

    /// Record a progress report. Terminal jobs ignore it and the stored
    /// value never decreases. Returns whether the value changed.
    pub fn record_progress(&mut self, fraction: f64) -> bool {
        if self.is_terminal() || !fraction.is_finite() {
            return false;
        }
        let clamped = fraction.clamp(0.0, 1.0);
        if clamped > self.progress {
            self.progress = clamped;
            true
        } else {
            false
        }
    }

    /// Milliseconds from creation until finish (or now).
    pub fn elapsed_ms(&self) -> i64 {
        let end = self.finished_at.unwrap_or_else(chrono::Utc::now);
        (end - self.created_at).num_milliseconds().max(0)
    }

    /// Terminate with failure context.
    pub fn fail(
        &mut self,
        to: JobState,
        kind: FailureKind,
        message: impl Into<String>,
        node_id: Option<String>,
    ) -> Result<(), CoreError> {
        let started = self.started_at.is_some();
        self.transition(to)?;
        self.failure = Some(JobFailure {
            kind,
            message: message.into(),
            node_id,
            last_progress: self.progress,
            elapsed_ms: self.elapsed_ms(),
            started,
        });
        Ok(())
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            media_kind: self.request.media_kind,
            mode: self.request.mode,
            model: self.model.name.clone(),
            state: self.state,
            progress: self.progress,
            created_at: self.created_at,
            finished_at: self.finished_at,
            elapsed_ms: self.elapsed_ms(),
        }
    }
}

/// Serializable view of a job for history and event feeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub media_kind: MediaKind,
    pub mode: GenerationMode,
    pub model: String,
    pub state: JobState,
    pub progress: f64,
    pub created_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub elapsed_ms: i64,
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use assert_matches::assert_matches;

    use super::state_machine::*;
    use super::*;
    use crate::registry::Family;
    use crate::workflow::graph::GraphBuilder;

    const ALL: [JobState; 7] = [
        JobState::Queued,
        JobState::Submitted,
        JobState::Running,
        JobState::Completed,
        JobState::Failed,
        JobState::TimedOut,
        JobState::Cancelled,
    ];

    fn job() -> Job {
        let request = GenerationRequest::new(
            MediaKind::Image,
            GenerationMode::Create,
            "sd15",
            "a cat",
        );
        let model = ModelEntry::from_file(
            PathBuf::from("/m/sd15.safetensors"),
            "sd15.safetensors".into(),
            Family::Standard,
            1,
        )
        .unwrap();
        let graph = GraphBuilder::new("image/create/standard").finish(1);
        Job::new(uuid::Uuid::new_v4(), Arc::new(request), model, Arc::new(graph))
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    #[test]
    fn happy_path() {
        assert!(can_transition(JobState::Queued, JobState::Submitted));
        assert!(can_transition(JobState::Submitted, JobState::Running));
        assert!(can_transition(JobState::Running, JobState::Completed));
    }

    #[test]
    fn rejection_shortcut() {
        assert!(can_transition(JobState::Submitted, JobState::Failed));
    }

    #[test]
    fn running_to_cancelled() {
        assert!(can_transition(JobState::Running, JobState::Cancelled));
    }

    #[test]
    fn terminal_states_are_absorbing() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            assert!(valid_transitions(*from).is_empty(), "{from:?}");
        }
    }

    #[test]
    fn no_transition_regresses() {
        for from in ALL {
            for to in valid_transitions(from) {
                assert!(to.rank() > from.rank(), "{from:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn cannot_complete_without_running() {
        assert!(!can_transition(JobState::Queued, JobState::Completed));
        assert!(!can_transition(JobState::Submitted, JobState::Completed));
        assert!(validate_transition(JobState::Submitted, JobState::Completed)
            .unwrap_err()
            .contains("submitted -> completed"));
    }

    // -----------------------------------------------------------------------
    // Job record
    // -----------------------------------------------------------------------

    #[test]
    fn transition_stamps_timestamps() {
        let mut j = job();
        j.transition(JobState::Submitted).unwrap();
        assert!(j.submitted_at.is_some());
        j.transition(JobState::Running).unwrap();
        assert!(j.started_at.is_some());
        j.transition(JobState::Completed).unwrap();
        assert!(j.finished_at.is_some());
        assert_eq!(j.progress, 1.0);
        assert_matches!(
            j.transition(JobState::Failed),
            Err(CoreError::InvalidTransition(_))
        );
    }

    #[test]
    fn progress_never_decreases_and_stops_at_terminal() {
        let mut j = job();
        assert!(j.record_progress(0.4));
        assert!(!j.record_progress(0.2));
        assert_eq!(j.progress, 0.4);
        assert!(j.record_progress(7.0));
        assert_eq!(j.progress, 1.0);

        let mut k = job();
        k.record_progress(0.3);
        k.transition(JobState::Cancelled).unwrap();
        assert!(!k.record_progress(0.9));
        assert_eq!(k.progress, 0.3);
    }

    #[test]
    fn fail_preserves_context() {
        let mut j = job();
        j.transition(JobState::Submitted).unwrap();
        j.transition(JobState::Running).unwrap();
        j.record_progress(0.6);
        j.fail(
            JobState::Failed,
            FailureKind::ExecutionFailed,
            "CUDA out of memory",
            Some("5".into()),
        )
        .unwrap();
        let failure = j.failure.unwrap();
        assert_eq!(failure.last_progress, 0.6);
        assert!(failure.started);
        assert_eq!(failure.node_id.as_deref(), Some("5"));
    }

    #[test]
    fn rejected_job_never_started() {
        let mut j = job();
        j.transition(JobState::Submitted).unwrap();
        j.fail(JobState::Failed, FailureKind::SubmissionRejected, "bad node", None)
            .unwrap();
        assert!(!j.failure.unwrap().started);
    }
}
