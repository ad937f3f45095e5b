//! Per-job execution: submit, track, resolve.
//!
//! Every dispatched job gets its own task and its own child
//! [`CancellationToken`]. The job record lives behind a [`watch`] channel
//! so waiters can block on "settled" without polling. All updates go
//! through a guard that ignores terminal jobs: once a job is cancelled,
//! timed out or failed, late results from the backend are discarded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use forge_core::artifact::Artifact;
use forge_core::backend::{BackendError, ExecutionBackend, Submission};
use forge_core::config::TimeoutCeilings;
use forge_core::job::{FailureKind, Job, JobState, JobSummary};
use forge_core::registry::ModelEntry;
use forge_core::types::JobId;
use forge_core::workflow::{GenerationRequest, WorkflowGraph};
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::EngineError;
use crate::events::{EventBus, JobEvent};
use crate::progress::{ProgressTracker, TrackOutcome, TrackerUpdate};
use crate::resolver::{ArtifactResolver, ResolvedOutputs};

/// How long shutdown waits for in-flight jobs to wind down.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Timing knobs for job execution.
#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub submit_timeout: Duration,
    pub poll_interval: Duration,
    pub timeouts: TimeoutCeilings,
}

/// State of artifact retrieval for a job.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Not attempted yet.
    Pending,
    Ready(ResolvedOutputs),
    Failed(String),
    /// The job did not complete, so there is nothing to retrieve.
    NotApplicable,
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job: Job,
    pub resolution: Resolution,
}

impl JobRecord {
    /// Terminal, and artifact retrieval (if any) has finished.
    pub fn settled(&self) -> bool {
        self.job.is_terminal() && self.resolution != Resolution::Pending
    }
}

/// Final result of a successful job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    pub job: JobSummary,
    pub artifacts: Vec<Artifact>,
    /// Why the job is missing from the persisted history, if it is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_error: Option<String>,
}

struct JobSlot {
    record: Arc<watch::Sender<JobRecord>>,
    cancel: CancellationToken,
}

/// What a running job task needs from the dispatcher.
struct RunContext {
    events: Arc<EventBus>,
    resolver: Arc<ArtifactResolver>,
    settings: DispatchSettings,
}

pub struct JobDispatcher {
    jobs: RwLock<HashMap<JobId, JobSlot>>,
    context: Arc<RunContext>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl JobDispatcher {
    pub fn new(
        events: Arc<EventBus>,
        resolver: Arc<ArtifactResolver>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            context: Arc::new(RunContext {
                events,
                resolver,
                settings,
            }),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Create a job for a compiled graph and start executing it on
    /// `backend`. Returns immediately.
    pub async fn dispatch(
        &self,
        request: Arc<GenerationRequest>,
        entry: ModelEntry,
        graph: Arc<WorkflowGraph>,
        backend: Arc<dyn ExecutionBackend>,
    ) -> JobId {
        let job_id = uuid::Uuid::new_v4();
        let job = Job::new(job_id, request, entry, graph);

        self.context.events.publish(JobEvent::Queued {
            job_id,
            media_kind: job.request.media_kind,
            mode: job.request.mode,
            model: job.model.name.clone(),
            at: job.created_at,
        });
        tracing::info!(
            job_id = %job_id,
            backend = backend.name(),
            model = %job.model.name,
            media_kind = %job.request.media_kind,
            mode = %job.request.mode,
            seed = job.graph.seed,
            "Job queued",
        );

        let (tx, _) = watch::channel(JobRecord {
            job,
            resolution: Resolution::Pending,
        });
        let record = Arc::new(tx);
        let cancel = self.cancel.child_token();

        self.jobs.write().await.insert(
            job_id,
            JobSlot {
                record: Arc::clone(&record),
                cancel: cancel.clone(),
            },
        );

        self.tasks.spawn(run_job(
            Arc::clone(&self.context),
            record,
            backend,
            cancel,
        ));

        job_id
    }

    /// Cancel a job. Returns `false` if it had already finished.
    ///
    /// The job is marked `Cancelled` before this returns; the backend is
    /// told to stop afterwards, on a best-effort basis.
    pub async fn cancel(&self, job_id: JobId) -> Result<bool, EngineError> {
        let jobs = self.jobs.read().await;
        let slot = jobs.get(&job_id).ok_or(EngineError::JobNotFound(job_id))?;

        let changed = terminate(
            &self.context.events,
            &slot.record,
            JobState::Cancelled,
            FailureKind::Cancelled,
            "cancelled by user".to_string(),
            None,
        );
        slot.cancel.cancel();
        if changed {
            tracing::info!(job_id = %job_id, "Job cancelled");
        }
        Ok(changed)
    }

    /// A copy of the current job record.
    pub async fn job(&self, job_id: JobId) -> Option<Job> {
        let jobs = self.jobs.read().await;
        jobs.get(&job_id).map(|slot| slot.record.borrow().job.clone())
    }

    /// Summaries of every job this dispatcher has seen.
    pub async fn jobs(&self) -> Vec<JobSummary> {
        let jobs = self.jobs.read().await;
        let mut summaries: Vec<JobSummary> = jobs
            .values()
            .map(|slot| slot.record.borrow().job.summary())
            .collect();
        summaries.sort_by_key(|s| s.created_at);
        summaries
    }

    /// Wait until the job has settled and return its outcome.
    pub async fn wait(&self, job_id: JobId) -> Result<JobReport, EngineError> {
        let mut rx = {
            let jobs = self.jobs.read().await;
            let slot = jobs.get(&job_id).ok_or(EngineError::JobNotFound(job_id))?;
            slot.record.subscribe()
        };

        let record = rx
            .wait_for(JobRecord::settled)
            .await
            .map_err(|_| EngineError::JobNotFound(job_id))?
            .clone();

        match (record.job.state, record.resolution) {
            (JobState::Completed, Resolution::Ready(resolved)) => Ok(JobReport {
                job: record.job.summary(),
                artifacts: resolved.artifacts,
                history_error: resolved.history_error,
            }),
            (JobState::Completed, Resolution::Failed(message)) => {
                Err(EngineError::ArtifactFetch { job_id, message })
            }
            _ => Err(EngineError::from_terminal_job(&record.job)),
        }
    }

    /// Cancel all in-flight jobs and wait (bounded) for their tasks.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down job dispatcher");
        self.cancel.cancel();
        self.tasks.close();
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.tasks.wait())
            .await
            .is_err()
        {
            tracing::warn!("Timed out waiting for job tasks to finish");
        }
    }
}

// ---- private helpers ----

/// Apply `f` to a non-terminal job. Returns whether anything changed.
fn update(record: &watch::Sender<JobRecord>, f: impl FnOnce(&mut Job) -> bool) -> bool {
    record.send_if_modified(|r| {
        if r.job.is_terminal() {
            return false;
        }
        f(&mut r.job)
    })
}

/// Move a non-terminal job into a failure state and publish it.
fn terminate(
    events: &EventBus,
    record: &watch::Sender<JobRecord>,
    to: JobState,
    kind: FailureKind,
    message: String,
    node_id: Option<String>,
) -> bool {
    let mut failure = None;
    record.send_if_modified(|r| {
        if r.job.is_terminal() || r.job.fail(to, kind, message, node_id).is_err() {
            return false;
        }
        r.resolution = Resolution::NotApplicable;
        failure = r.job.failure.clone();
        true
    });

    let Some(failure) = failure else {
        return false;
    };
    let job_id = record.borrow().job.id;
    let event = match to {
        JobState::TimedOut => JobEvent::TimedOut { job_id, failure },
        JobState::Cancelled => JobEvent::Cancelled { job_id },
        _ => JobEvent::Failed { job_id, failure },
    };
    events.publish(event);
    true
}

async fn best_effort_cancel(
    backend: &dyn ExecutionBackend,
    job_id: JobId,
    backend_job_id: &str,
    timeout: Duration,
) {
    match tokio::time::timeout(timeout, backend.cancel(backend_job_id)).await {
        Ok(Ok(())) => tracing::debug!(job_id = %job_id, backend_job_id, "Backend cancel sent"),
        Ok(Err(e)) => tracing::warn!(
            job_id = %job_id,
            backend_job_id,
            error = %e,
            "Backend cancellation failed",
        ),
        Err(_) => tracing::warn!(job_id = %job_id, backend_job_id, "Backend cancellation timed out"),
    }
}

async fn run_job(
    ctx: Arc<RunContext>,
    record: Arc<watch::Sender<JobRecord>>,
    backend: Arc<dyn ExecutionBackend>,
    cancel: CancellationToken,
) {
    let (job_id, graph, media_kind) = {
        let r = record.borrow();
        (r.job.id, Arc::clone(&r.job.graph), r.job.request.media_kind)
    };

    // Submission.
    if !update(&record, |job| job.transition(JobState::Submitted).is_ok()) {
        return;
    }

    let submit_timeout = ctx.settings.submit_timeout;
    let submitted = tokio::time::timeout(
        submit_timeout,
        backend.submit(Submission {
            job_id,
            graph: &graph,
        }),
    )
    .await;

    let backend_job_id = match submitted {
        Ok(Ok(id)) => id,
        Ok(Err(BackendError::Rejected(message))) => {
            tracing::warn!(job_id = %job_id, error = %message, "Submission rejected");
            terminate(
                &ctx.events,
                &record,
                JobState::Failed,
                FailureKind::SubmissionRejected,
                message,
                None,
            );
            return;
        }
        Ok(Err(e)) => {
            tracing::error!(job_id = %job_id, error = %e, "Submission failed");
            terminate(
                &ctx.events,
                &record,
                JobState::Failed,
                FailureKind::SubmitError,
                e.to_string(),
                None,
            );
            return;
        }
        Err(_) => {
            tracing::error!(job_id = %job_id, "Submission timed out");
            terminate(
                &ctx.events,
                &record,
                JobState::Failed,
                FailureKind::SubmitError,
                format!("submit timed out after {} ms", submit_timeout.as_millis()),
                None,
            );
            return;
        }
    };

    // Cancelled while the submit call was in flight.
    if cancel.is_cancelled() {
        terminate(
            &ctx.events,
            &record,
            JobState::Cancelled,
            FailureKind::Cancelled,
            "cancelled during submission".to_string(),
            None,
        );
        best_effort_cancel(backend.as_ref(), job_id, &backend_job_id, submit_timeout).await;
        return;
    }

    update(&record, |job| {
        job.backend_job_id = Some(backend_job_id.clone());
        true
    });
    ctx.events.publish(JobEvent::Submitted {
        job_id,
        backend_job_id: backend_job_id.clone(),
    });
    tracing::info!(job_id = %job_id, backend_job_id = %backend_job_id, "Job submitted");

    // Tracking.
    let ceiling = ctx.settings.timeouts.for_kind(media_kind);
    let deadline = Instant::now() + ceiling;
    let tracker = ProgressTracker::new(
        backend.as_ref(),
        job_id,
        &backend_job_id,
        &graph,
        ctx.settings.poll_interval,
    );
    let events = &ctx.events;
    let outcome = tracker
        .track(deadline, &cancel, |tracker_update| match tracker_update {
            TrackerUpdate::Started => {
                if update(&record, |job| job.transition(JobState::Running).is_ok()) {
                    tracing::debug!(job_id = %job_id, "Job running");
                    events.publish(JobEvent::Started { job_id });
                }
            }
            TrackerUpdate::Progress(snapshot) => {
                let changed = update(&record, |job| {
                    let advanced = job.record_progress(snapshot.fraction);
                    let node_changed = job.current_node != snapshot.current_node;
                    if node_changed {
                        job.current_node = snapshot.current_node.clone();
                    }
                    advanced || node_changed
                });
                if changed {
                    events.publish(JobEvent::Progress(snapshot));
                }
            }
            TrackerUpdate::Log(line) => {
                update(&record, |job| {
                    job.log.push(line);
                    true
                });
            }
        })
        .await;

    match outcome {
        TrackOutcome::Completed => {
            complete(&ctx, &record, backend.as_ref()).await;
        }
        TrackOutcome::Failed { message, node_id } => {
            tracing::warn!(
                job_id = %job_id,
                node_id = node_id.as_deref().unwrap_or("-"),
                error = %message,
                "Job failed",
            );
            terminate(
                &ctx.events,
                &record,
                JobState::Failed,
                FailureKind::ExecutionFailed,
                message,
                node_id,
            );
        }
        TrackOutcome::TimedOut => {
            terminate(
                &ctx.events,
                &record,
                JobState::TimedOut,
                FailureKind::Timeout,
                format!("no result within {} s", ceiling.as_secs()),
                None,
            );
            best_effort_cancel(backend.as_ref(), job_id, &backend_job_id, submit_timeout).await;
        }
        TrackOutcome::Cancelled => {
            // User cancellation already marked the job; this covers shutdown.
            terminate(
                &ctx.events,
                &record,
                JobState::Cancelled,
                FailureKind::Cancelled,
                "engine shutting down".to_string(),
                None,
            );
            best_effort_cancel(backend.as_ref(), job_id, &backend_job_id, submit_timeout).await;
        }
    }
}

async fn complete(
    ctx: &RunContext,
    record: &watch::Sender<JobRecord>,
    backend: &dyn ExecutionBackend,
) {
    let completed = update(record, |job| {
        if job.state == JobState::Submitted && job.transition(JobState::Running).is_err() {
            return false;
        }
        job.transition(JobState::Completed).is_ok()
    });
    if !completed {
        // A cancel won the race; the result is discarded.
        return;
    }

    let job = record.borrow().job.clone();
    ctx.events.publish(JobEvent::Completed { job_id: job.id });
    tracing::info!(job_id = %job.id, elapsed_ms = job.elapsed_ms(), "Job completed");

    match ctx.resolver.resolve(&job, backend).await {
        Ok(resolved) => {
            record.send_modify(|r| r.resolution = Resolution::Ready(resolved.clone()));
            ctx.events.publish(JobEvent::ArtifactsReady {
                job_id: job.id,
                artifacts: resolved.artifacts,
            });
            if let Some(message) = resolved.history_error {
                ctx.events.publish(JobEvent::HistoryFailed {
                    job_id: job.id,
                    message,
                });
            }
        }
        Err(e) => {
            tracing::error!(job_id = %job.id, error = %e, "Artifact retrieval failed");
            let message = e.to_string();
            record.send_modify(|r| r.resolution = Resolution::Failed(message.clone()));
            ctx.events.publish(JobEvent::ArtifactsFailed {
                job_id: job.id,
                message,
            });
        }
    }
}
