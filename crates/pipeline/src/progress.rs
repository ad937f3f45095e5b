//! Progress tracking for one submitted job.
//!
//! [`ProgressTracker::track`] is a single cancellable, deadline-bounded
//! operation. Internally it prefers the backend's event stream and falls
//! back to status polling when the stream cannot be opened or closes
//! before a terminal event; callers never see which transport is active.

use std::time::Duration;

use forge_core::backend::{ExecutionBackend, RemoteStatus};
use forge_core::progress::{BackendEvent, ProgressNormalizer};
use forge_core::types::JobId;
use forge_core::workflow::WorkflowGraph;
use serde::Serialize;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Bound on opening the event stream.
const STREAM_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on a single status poll.
const POLL_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Consecutive `Unknown` polls after which the job is considered lost.
const MAX_UNKNOWN_POLLS: u32 = 3;

/// Point-in-time progress for a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub job_id: JobId,
    /// Normalized, non-decreasing fraction in `[0, 1]`.
    pub fraction: f64,
    pub current_node: Option<String>,
    pub elapsed_ms: u64,
    /// Linear estimate of the remaining time.
    pub eta_ms: Option<u64>,
}

/// Linear remaining-time estimate from progress so far. `None` until
/// there is enough progress to extrapolate from.
pub fn estimate_eta(fraction: f64, elapsed: Duration) -> Option<Duration> {
    if fraction >= 1.0 {
        return Some(Duration::ZERO);
    }
    if fraction.is_nan() || fraction <= 0.01 {
        return None;
    }
    Some(elapsed.mul_f64((1.0 - fraction) / fraction))
}

/// What the tracker tells its owner while a job runs.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerUpdate {
    /// First evidence that the backend is executing the job.
    Started,
    Progress(ProgressSnapshot),
    /// A backend-reported error line worth keeping with the job.
    Log(String),
}

/// How tracking ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackOutcome {
    Completed,
    Failed {
        message: String,
        node_id: Option<String>,
    },
    TimedOut,
    Cancelled,
}

pub struct ProgressTracker<'a> {
    backend: &'a dyn ExecutionBackend,
    job_id: JobId,
    backend_job_id: &'a str,
    normalizer: ProgressNormalizer,
    poll_interval: Duration,
    started_at: Instant,
    running: bool,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(
        backend: &'a dyn ExecutionBackend,
        job_id: JobId,
        backend_job_id: &'a str,
        graph: &WorkflowGraph,
        poll_interval: Duration,
    ) -> Self {
        Self {
            backend,
            job_id,
            backend_job_id,
            normalizer: ProgressNormalizer::for_graph(graph),
            poll_interval,
            started_at: Instant::now(),
            running: false,
        }
    }

    /// Follow the job until it ends, `deadline` passes or `cancel` fires.
    pub async fn track<F>(
        mut self,
        deadline: Instant,
        cancel: &CancellationToken,
        mut on_update: F,
    ) -> TrackOutcome
    where
        F: FnMut(TrackerUpdate) + Send,
    {
        let job_id = self.job_id;
        let work = self.follow(&mut on_update);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => TrackOutcome::Cancelled,
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!(job_id = %job_id, "Job exceeded its timeout ceiling");
                TrackOutcome::TimedOut
            }
            outcome = work => outcome,
        }
    }

    // ---- private helpers ----

    async fn follow<F>(&mut self, on_update: &mut F) -> TrackOutcome
    where
        F: FnMut(TrackerUpdate) + Send,
    {
        let stream = tokio::time::timeout(
            STREAM_OPEN_TIMEOUT,
            self.backend.open_events(self.job_id, self.backend_job_id),
        )
        .await;

        match stream {
            Ok(Ok(mut rx)) => {
                // The job may have finished before the stream attached.
                let mut unknown = 0u32;
                if let Some(outcome) = self.poll_once(on_update, &mut unknown).await {
                    return outcome;
                }
                // A stream can stay open yet miss the terminal message (for
                // example across a reconnect), so status is still polled.
                let mut ticker = self.ticker();
                ticker.tick().await;
                loop {
                    tokio::select! {
                        biased;
                        event = rx.recv() => {
                            let Some(event) = event else { break };
                            if let Some(outcome) = self.apply(&event, on_update) {
                                return outcome;
                            }
                        }
                        _ = ticker.tick() => {
                            if let Some(outcome) = self.poll_once(on_update, &mut unknown).await {
                                tracing::debug!(
                                    job_id = %self.job_id,
                                    "Status poll settled the job ahead of the stream",
                                );
                                return outcome;
                            }
                        }
                    }
                }
                tracing::warn!(
                    job_id = %self.job_id,
                    backend_job_id = %self.backend_job_id,
                    "Progress stream closed before completion, falling back to polling",
                );
            }
            Ok(Err(e)) => {
                tracing::info!(
                    job_id = %self.job_id,
                    error = %e,
                    "Progress stream unavailable, polling",
                );
            }
            Err(_) => {
                tracing::warn!(job_id = %self.job_id, "Opening progress stream timed out, polling");
            }
        }

        self.poll_loop(on_update).await
    }

    async fn poll_loop<F>(&mut self, on_update: &mut F) -> TrackOutcome
    where
        F: FnMut(TrackerUpdate) + Send,
    {
        let mut unknown = 0u32;
        let mut ticker = self.ticker();
        loop {
            ticker.tick().await;
            if let Some(outcome) = self.poll_once(on_update, &mut unknown).await {
                return outcome;
            }
        }
    }

    async fn poll_once<F>(&mut self, on_update: &mut F, unknown: &mut u32) -> Option<TrackOutcome>
    where
        F: FnMut(TrackerUpdate) + Send,
    {
        let status = match tokio::time::timeout(
            POLL_REQUEST_TIMEOUT,
            self.backend.poll_status(self.backend_job_id),
        )
        .await
        {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                tracing::warn!(job_id = %self.job_id, error = %e, "Status poll failed");
                return None;
            }
            Err(_) => {
                tracing::warn!(job_id = %self.job_id, "Status poll timed out");
                return None;
            }
        };

        if status != RemoteStatus::Unknown {
            *unknown = 0;
        }
        match status {
            RemoteStatus::Pending => None,
            RemoteStatus::Running => {
                self.mark_running(on_update);
                None
            }
            RemoteStatus::Completed => Some(TrackOutcome::Completed),
            RemoteStatus::Failed { message, node_id } => {
                on_update(TrackerUpdate::Log(message.clone()));
                Some(TrackOutcome::Failed { message, node_id })
            }
            RemoteStatus::Unknown => {
                *unknown += 1;
                (*unknown >= MAX_UNKNOWN_POLLS).then(|| TrackOutcome::Failed {
                    message: "Backend no longer knows the job".to_string(),
                    node_id: None,
                })
            }
        }
    }

    fn apply<F>(&mut self, event: &BackendEvent, on_update: &mut F) -> Option<TrackOutcome>
    where
        F: FnMut(TrackerUpdate) + Send,
    {
        match event {
            BackendEvent::ExecutionComplete => return Some(TrackOutcome::Completed),
            BackendEvent::ExecutionError {
                node_id,
                message,
                exception_type,
            } => {
                let line = match exception_type {
                    Some(kind) => format!("{kind}: {message}"),
                    None => message.clone(),
                };
                on_update(TrackerUpdate::Log(line));
                return Some(TrackOutcome::Failed {
                    message: message.clone(),
                    node_id: node_id.clone(),
                });
            }
            BackendEvent::Interrupted => {
                return Some(TrackOutcome::Failed {
                    message: "Execution interrupted by the backend".to_string(),
                    node_id: self.normalizer.current_node().map(str::to_string),
                });
            }
            _ => {}
        }

        self.mark_running(on_update);
        let before = self.normalizer.fraction();
        let before_node = self.normalizer.current_node().map(str::to_string);
        let fraction = self.normalizer.apply(event);
        if fraction > before || self.normalizer.current_node() != before_node.as_deref() {
            on_update(TrackerUpdate::Progress(self.snapshot()));
        }
        None
    }

    fn ticker(&self) -> Interval {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    fn mark_running<F>(&mut self, on_update: &mut F)
    where
        F: FnMut(TrackerUpdate) + Send,
    {
        if !self.running {
            self.running = true;
            on_update(TrackerUpdate::Started);
        }
    }

    fn snapshot(&self) -> ProgressSnapshot {
        let elapsed = self.started_at.elapsed();
        let fraction = self.normalizer.fraction();
        ProgressSnapshot {
            job_id: self.job_id,
            fraction,
            current_node: self.normalizer.current_node().map(str::to_string),
            elapsed_ms: elapsed.as_millis() as u64,
            eta_ms: estimate_eta(fraction, elapsed).map(|d| d.as_millis() as u64),
        }
    }
}
