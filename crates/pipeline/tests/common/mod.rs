#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use forge_core::backend::{BackendError, ExecutionBackend, OutputRef, RemoteStatus, Submission};
use forge_core::config::EngineConfig;
use forge_core::hardware::MemorySnapshot;
use forge_core::progress::BackendEvent;
use forge_core::types::JobId;
use forge_core::workflow::WorkflowGraph;
use forge_pipeline::engine::{Backends, Engine};
use forge_pipeline::sampler::MemorySource;
use tokio::sync::mpsc;

pub const MODEL: &str = "dreamshaper_8";

// ---------------------------------------------------------------------------
// Fake backend
// ---------------------------------------------------------------------------

/// How the fake answers `submit`.
#[derive(Debug, Clone)]
pub enum SubmitScript {
    Accept,
    Reject(String),
    Fail(String),
}

/// What the fake's event stream carries.
#[derive(Debug, Clone)]
pub enum EventScript {
    /// Start, step and finish every node of the submitted graph, then
    /// report completion.
    FullRun,
    /// The first `n` events of a full run, then the stream closes.
    Partial(usize),
    Fixed(Vec<BackendEvent>),
    /// Stays open and never reports anything.
    Silent,
    Unavailable,
}

struct Script {
    submit: SubmitScript,
    events: EventScript,
    /// Poll answers; the last one repeats.
    statuses: VecDeque<RemoteStatus>,
    /// Listed outputs; `None` bytes fail to fetch.
    outputs: Vec<(OutputRef, Option<Vec<u8>>)>,
}

pub struct FakeBackend {
    reachable: AtomicBool,
    script: Mutex<Script>,
    graphs: Mutex<Vec<WorkflowGraph>>,
    cancels: Mutex<Vec<String>>,
    held: Mutex<Vec<mpsc::Sender<BackendEvent>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            script: Mutex::new(Script {
                submit: SubmitScript::Accept,
                events: EventScript::FullRun,
                statuses: VecDeque::from([RemoteStatus::Running]),
                outputs: vec![(
                    OutputRef::Remote {
                        filename: "forge_00001_.png".into(),
                        subfolder: String::new(),
                        folder_type: "output".into(),
                    },
                    Some(b"\x89PNG fake".to_vec()),
                )],
            }),
            graphs: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable(self) -> Self {
        self.reachable.store(false, Ordering::SeqCst);
        self
    }

    pub fn with_submit(self, submit: SubmitScript) -> Self {
        self.script.lock().unwrap().submit = submit;
        self
    }

    pub fn with_events(self, events: EventScript) -> Self {
        self.script.lock().unwrap().events = events;
        self
    }

    pub fn with_statuses(self, statuses: Vec<RemoteStatus>) -> Self {
        self.script.lock().unwrap().statuses = statuses.into();
        self
    }

    pub fn without_outputs(self) -> Self {
        self.script.lock().unwrap().outputs.clear();
        self
    }

    /// List an extra output that cannot be fetched.
    pub fn with_unfetchable_output(self, filename: &str) -> Self {
        self.script.lock().unwrap().outputs.push((
            OutputRef::Remote {
                filename: filename.into(),
                subfolder: String::new(),
                folder_type: "output".into(),
            },
            None,
        ));
        self
    }

    pub fn submitted(&self) -> Vec<WorkflowGraph> {
        self.graphs.lock().unwrap().clone()
    }

    pub fn cancels(&self) -> Vec<String> {
        self.cancels.lock().unwrap().clone()
    }

    fn full_run(graph: &WorkflowGraph) -> Vec<BackendEvent> {
        let mut events = vec![BackendEvent::ExecutionStarted];
        for node in &graph.nodes {
            let node_id = node.id.key();
            events.push(BackendEvent::NodeStarted {
                node_id: node_id.clone(),
            });
            if node.step_weight > 1 {
                for value in 1..=node.step_weight {
                    events.push(BackendEvent::StepProgress {
                        node_id: Some(node_id.clone()),
                        value,
                        max: node.step_weight,
                    });
                }
            }
            events.push(BackendEvent::NodeFinished { node_id });
        }
        events.push(BackendEvent::ExecutionComplete);
        events
    }
}

#[async_trait]
impl ExecutionBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn probe(&self) -> Result<(), BackendError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unreachable("connection refused".into()))
        }
    }

    async fn submit(&self, submission: Submission<'_>) -> Result<String, BackendError> {
        let submit = self.script.lock().unwrap().submit.clone();
        match submit {
            SubmitScript::Accept => {
                self.graphs.lock().unwrap().push(submission.graph.clone());
                Ok(format!("prompt-{}", submission.job_id))
            }
            SubmitScript::Reject(message) => Err(BackendError::Rejected(message)),
            SubmitScript::Fail(message) => Err(BackendError::Transport(message)),
        }
    }

    async fn open_events(
        &self,
        _job_id: JobId,
        _backend_job_id: &str,
    ) -> Result<mpsc::Receiver<BackendEvent>, BackendError> {
        let script = self.script.lock().unwrap().events.clone();
        let graph = self.graphs.lock().unwrap().last().cloned();
        let silent = matches!(script, EventScript::Silent);
        let events = match script {
            EventScript::Unavailable => {
                return Err(BackendError::StreamUnavailable("no websocket".into()))
            }
            EventScript::Silent => Vec::new(),
            EventScript::Fixed(events) => events,
            EventScript::FullRun => graph.as_ref().map(Self::full_run).unwrap_or_default(),
            EventScript::Partial(n) => graph
                .as_ref()
                .map(|g| Self::full_run(g).into_iter().take(n).collect())
                .unwrap_or_default(),
        };

        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            tx.try_send(event).unwrap();
        }
        if silent {
            self.held.lock().unwrap().push(tx);
        }
        Ok(rx)
    }

    async fn poll_status(&self, _backend_job_id: &str) -> Result<RemoteStatus, BackendError> {
        let mut script = self.script.lock().unwrap();
        let status = if script.statuses.len() > 1 {
            script.statuses.pop_front()
        } else {
            script.statuses.front().cloned()
        };
        Ok(status.unwrap_or(RemoteStatus::Running))
    }

    async fn cancel(&self, backend_job_id: &str) -> Result<(), BackendError> {
        self.cancels.lock().unwrap().push(backend_job_id.to_string());
        Ok(())
    }

    async fn collect_outputs(&self, _backend_job_id: &str) -> Result<Vec<OutputRef>, BackendError> {
        let script = self.script.lock().unwrap();
        Ok(script.outputs.iter().map(|(o, _)| o.clone()).collect())
    }

    async fn fetch_output(&self, output: &OutputRef) -> Result<Vec<u8>, BackendError> {
        let script = self.script.lock().unwrap();
        script
            .outputs
            .iter()
            .find(|(o, _)| o == output)
            .and_then(|(_, bytes)| bytes.clone())
            .ok_or_else(|| BackendError::NotFound(output.file_name()))
    }
}

// ---------------------------------------------------------------------------
// Engine harness
// ---------------------------------------------------------------------------

pub fn fixed_memory(available_gb: f64) -> MemorySource {
    Arc::new(move || {
        Some(MemorySnapshot {
            total_gb: 32.0,
            available_gb,
            sampled_at: chrono::Utc::now(),
        })
    })
}

/// Configuration rooted in `dir`: one image model, outputs under `out/`.
pub fn config(dir: &Path) -> EngineConfig {
    config_with(dir, Vec::new())
}

/// [`config`] with extra environment overrides.
pub fn config_with(dir: &Path, overrides: Vec<(&'static str, String)>) -> EngineConfig {
    let models = dir.join("models");
    std::fs::create_dir_all(&models).unwrap();
    std::fs::write(models.join(format!("{MODEL}.safetensors")), b"weights").unwrap();

    let home = dir.to_string_lossy().into_owned();
    let models = models.to_string_lossy().into_owned();
    let output = dir.join("out").to_string_lossy().into_owned();
    EngineConfig::from_lookup(move |key| {
        if let Some((_, value)) = overrides.iter().find(|(k, _)| *k == key) {
            return Some(value.clone());
        }
        match key {
            "HOME" => Some(home.clone()),
            "FORGE_MODEL_PATHS" => Some(models.clone()),
            "FORGE_OUTPUT_DIR" => Some(output.clone()),
            "FORGE_POLL_INTERVAL_MS" => Some("50".into()),
            "FORGE_TIMEOUT_IMAGE_SECS" => Some("30".into()),
            "FORGE_PROBE_TIMEOUT_SECS" => Some("1".into()),
            _ => None,
        }
    })
    .unwrap()
}

/// An engine whose external and direct backends are both `backend`.
pub async fn engine(dir: &Path, backend: Arc<FakeBackend>) -> Engine {
    engine_with_config(config(dir), backend).await
}

pub async fn engine_with_config(config: EngineConfig, backend: Arc<FakeBackend>) -> Engine {
    let backends = Backends {
        external: Arc::clone(&backend) as Arc<dyn ExecutionBackend>,
        direct: backend,
    };
    Engine::start_with_memory(config, backends, fixed_memory(16.0))
        .await
        .unwrap()
}
