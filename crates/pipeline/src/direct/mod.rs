//! Direct-mode execution for the built-in voice family.
//!
//! No graph service is involved: the compiled descriptor graph's
//! synthesis node is turned into a JSON payload for a locally supervised
//! synthesis program. Its progress lines become [`BackendEvent`]s and its
//! output file becomes a local [`OutputRef`], so the dispatcher tracks and
//! resolves direct jobs exactly like external ones.

pub mod subprocess;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use forge_core::backend::{BackendError, ExecutionBackend, OutputRef, RemoteStatus, Submission};
use forge_core::config::DirectConfig;
use forge_core::progress::BackendEvent;
use forge_core::types::JobId;
use forge_core::workflow::builders::voice::DIRECT_SYNTHESIS_NODE;
use forge_core::workflow::graph::Input;
use forge_core::workflow::WorkflowGraph;
use serde_json::{Map, Value};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use subprocess::{run_script, ScriptError, ScriptLine};

/// Per-run event buffer. Overflow is dropped; status polling covers it.
const EVENT_BUFFER: usize = 64;

/// How long a finished run nobody collected stays visible to pollers.
const RUN_RETENTION: Duration = Duration::from_secs(600);

/// Environment variable telling the script where to write its output.
pub const OUTPUT_PATH_ENV: &str = "FORGE_OUTPUT_PATH";

struct DirectRun {
    status: RemoteStatus,
    outputs: Vec<OutputRef>,
    events: Option<mpsc::Receiver<BackendEvent>>,
    cancel: CancellationToken,
}

type RunTable = Arc<Mutex<HashMap<String, DirectRun>>>;

pub struct DirectBackend {
    config: DirectConfig,
    scratch_dir: PathBuf,
    runs: RunTable,
}

impl DirectBackend {
    /// `scratch_dir` receives the raw program output before the resolver
    /// copies it into the output directory.
    pub fn new(config: DirectConfig, scratch_dir: PathBuf) -> Self {
        Self {
            config,
            scratch_dir,
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn with_run<T>(&self, id: &str, f: impl FnOnce(&mut DirectRun) -> T) -> Option<T> {
        with_run(&self.runs, id, f)
    }

    /// Runs still held in the table.
    pub fn active_runs(&self) -> usize {
        self.runs.lock().map(|runs| runs.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ExecutionBackend for DirectBackend {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn probe(&self) -> Result<(), BackendError> {
        match tokio::fs::metadata(&self.config.script).await {
            Ok(meta) if meta.is_file() => Ok(()),
            Ok(_) => Err(BackendError::Unreachable(format!(
                "{} is not a file",
                self.config.script.display()
            ))),
            Err(e) => Err(BackendError::Unreachable(format!(
                "synthesis script {}: {e}",
                self.config.script.display()
            ))),
        }
    }

    async fn submit(&self, submission: Submission<'_>) -> Result<String, BackendError> {
        let payload = synthesis_payload(submission.graph)?;
        let node_id = submission
            .graph
            .find_class(DIRECT_SYNTHESIS_NODE)
            .map(|n| n.id.key())
            .unwrap_or_default();

        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(|e| BackendError::Execution(format!("{}: {e}", self.scratch_dir.display())))?;
        let output_path = self.scratch_dir.join(format!("{}.wav", submission.job_id));

        let backend_job_id = format!("direct-{}", submission.job_id);
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();

        {
            let mut runs = self
                .runs
                .lock()
                .map_err(|_| BackendError::Execution("run table poisoned".into()))?;
            runs.insert(
                backend_job_id.clone(),
                DirectRun {
                    status: RemoteStatus::Pending,
                    outputs: Vec::new(),
                    events: Some(rx),
                    cancel: cancel.clone(),
                },
            );
        }

        let mut cmd = Command::new(&self.config.program);
        cmd.arg(&self.config.script)
            .env(OUTPUT_PATH_ENV, &output_path);

        tokio::spawn(supervise(
            Arc::clone(&self.runs),
            backend_job_id.clone(),
            submission.job_id,
            cmd,
            payload,
            node_id,
            output_path,
            tx,
            cancel,
        ));

        Ok(backend_job_id)
    }

    async fn open_events(
        &self,
        _job_id: JobId,
        backend_job_id: &str,
    ) -> Result<mpsc::Receiver<BackendEvent>, BackendError> {
        self.with_run(backend_job_id, |run| run.events.take())
            .flatten()
            .ok_or_else(|| {
                BackendError::StreamUnavailable(format!("no event stream for {backend_job_id}"))
            })
    }

    async fn poll_status(&self, backend_job_id: &str) -> Result<RemoteStatus, BackendError> {
        let status = self
            .with_run(backend_job_id, |run| run.status.clone())
            .unwrap_or(RemoteStatus::Unknown);
        // A failure has nothing left to collect once it is observed.
        if matches!(status, RemoteStatus::Failed { .. }) {
            remove_run(&self.runs, backend_job_id);
        }
        Ok(status)
    }

    async fn cancel(&self, backend_job_id: &str) -> Result<(), BackendError> {
        let run = remove_run(&self.runs, backend_job_id)
            .ok_or_else(|| BackendError::NotFound(backend_job_id.to_string()))?;
        run.cancel.cancel();
        Ok(())
    }

    async fn collect_outputs(&self, backend_job_id: &str) -> Result<Vec<OutputRef>, BackendError> {
        let mut runs = self
            .runs
            .lock()
            .map_err(|_| BackendError::Execution("run table poisoned".into()))?;
        match runs.get(backend_job_id).map(|run| &run.status) {
            Some(RemoteStatus::Completed) => {}
            Some(status) => {
                return Err(BackendError::Execution(format!(
                    "run {backend_job_id} has not completed ({status:?})"
                )))
            }
            None => return Err(BackendError::NotFound(backend_job_id.to_string())),
        }
        // Collected outputs are local files; the run itself is done with.
        Ok(runs
            .remove(backend_job_id)
            .map(|run| run.outputs)
            .unwrap_or_default())
    }

    async fn fetch_output(&self, output: &OutputRef) -> Result<Vec<u8>, BackendError> {
        match output {
            OutputRef::Local { path } => tokio::fs::read(path)
                .await
                .map_err(|e| BackendError::Execution(format!("{}: {e}", path.display()))),
            OutputRef::Remote { filename, .. } => Err(BackendError::NotFound(format!(
                "direct backend holds no remote file {filename}"
            ))),
        }
    }
}

/// Literal inputs of the synthesis node, with the reference-audio link
/// resolved to its local path.
pub fn synthesis_payload(graph: &WorkflowGraph) -> Result<Value, BackendError> {
    let node = graph.find_class(DIRECT_SYNTHESIS_NODE).ok_or_else(|| {
        BackendError::Rejected(format!(
            "graph {} has no {DIRECT_SYNTHESIS_NODE} node",
            graph.template
        ))
    })?;

    let mut payload = Map::new();
    for (key, input) in &node.inputs {
        match input {
            Input::Value(v) => {
                payload.insert(key.clone(), v.clone());
            }
            Input::Link(source, _) => {
                let asset = graph.assets.iter().find(|a| a.node == *source).ok_or_else(|| {
                    BackendError::Rejected(format!("input {key} links to a node with no asset"))
                })?;
                payload.insert(
                    key.clone(),
                    Value::String(asset.path.to_string_lossy().into_owned()),
                );
            }
        }
    }
    Ok(Value::Object(payload))
}

// ---- private helpers ----

fn with_run<T>(runs: &RunTable, id: &str, f: impl FnOnce(&mut DirectRun) -> T) -> Option<T> {
    let mut runs = runs.lock().ok()?;
    runs.get_mut(id).map(f)
}

fn remove_run(runs: &RunTable, id: &str) -> Option<DirectRun> {
    runs.lock().ok()?.remove(id)
}

fn emit(tx: &mpsc::Sender<BackendEvent>, event: BackendEvent) {
    // A full or closed channel is fine; pollers read the run table.
    let _ = tx.try_send(event);
}

#[allow(clippy::too_many_arguments)]
async fn supervise(
    runs: RunTable,
    backend_job_id: String,
    job_id: JobId,
    cmd: Command,
    payload: Value,
    node_id: String,
    output_path: PathBuf,
    tx: mpsc::Sender<BackendEvent>,
    cancel: CancellationToken,
) {
    execute(
        &runs,
        &backend_job_id,
        job_id,
        cmd,
        payload,
        node_id,
        output_path,
        tx,
        &cancel,
    )
    .await;

    tokio::select! {
        _ = tokio::time::sleep(RUN_RETENTION) => {
            if remove_run(&runs, &backend_job_id).is_some() {
                tracing::debug!(job_id = %job_id, "Dropping uncollected direct run");
            }
        }
        _ = cancel.cancelled() => {
            remove_run(&runs, &backend_job_id);
        }
    }
}

/// Run the program once and record how it ended. The event sender is
/// dropped on return, which closes the stream.
#[allow(clippy::too_many_arguments)]
async fn execute(
    runs: &RunTable,
    backend_job_id: &str,
    job_id: JobId,
    mut cmd: Command,
    payload: Value,
    node_id: String,
    output_path: PathBuf,
    tx: mpsc::Sender<BackendEvent>,
    cancel: &CancellationToken,
) {
    with_run(runs, &backend_job_id, |run| run.status = RemoteStatus::Running);
    emit(&tx, BackendEvent::ExecutionStarted);
    emit(&tx, BackendEvent::NodeStarted { node_id: node_id.clone() });
    tracing::info!(job_id = %job_id, output = %output_path.display(), "Direct synthesis started");

    let result = run_script(&mut cmd, &payload, cancel, |line| match line {
        ScriptLine::Progress { value, max } => emit(
            &tx,
            BackendEvent::StepProgress {
                node_id: Some(node_id.clone()),
                value,
                max,
            },
        ),
        ScriptLine::Log(text) => tracing::debug!(job_id = %job_id, "synthesis: {text}"),
    })
    .await;

    let wrote_output = tokio::fs::try_exists(&output_path).await.unwrap_or(false);
    let result = match result {
        Ok(elapsed_ms) if wrote_output => Ok(elapsed_ms),
        Ok(_) => Err(format!(
            "synthesis finished without writing {}",
            output_path.display()
        )),
        Err(ScriptError::Cancelled) => {
            tracing::info!(job_id = %job_id, "Direct synthesis cancelled");
            with_run(runs, backend_job_id, |run| {
                run.status = RemoteStatus::Failed {
                    message: "interrupted".into(),
                    node_id: None,
                }
            });
            emit(&tx, BackendEvent::Interrupted);
            return;
        }
        Err(e) => Err(e.to_string()),
    };

    match result {
        Ok(elapsed_ms) => {
            tracing::info!(job_id = %job_id, elapsed_ms, "Direct synthesis finished");
            with_run(runs, backend_job_id, |run| {
                run.status = RemoteStatus::Completed;
                run.outputs = vec![OutputRef::Local {
                    path: output_path.clone(),
                }];
            });
            emit(&tx, BackendEvent::NodeFinished { node_id });
            emit(&tx, BackendEvent::ExecutionComplete);
        }
        Err(message) => {
            tracing::warn!(job_id = %job_id, error = %message, "Direct synthesis failed");
            with_run(runs, backend_job_id, |run| {
                run.status = RemoteStatus::Failed {
                    message: message.clone(),
                    node_id: Some(node_id.clone()),
                }
            });
            emit(
                &tx,
                BackendEvent::ExecutionError {
                    node_id: Some(node_id),
                    message,
                    exception_type: None,
                },
            );
        }
    }
}
