//! The engine facade: one handle owning the registry cache, memory
//! signal, router, dispatcher and stores.
//!
//! [`Engine::start`] brings the background tasks up; [`Engine::shutdown`]
//! cancels them and waits (bounded) for in-flight jobs to wind down.

use std::sync::Arc;
use std::time::Duration;

use forge_comfyui::backend::ComfyUIBackend;
use forge_core::artifact::Artifact;
use forge_core::backend::ExecutionBackend;
use forge_core::batch::BatchPlan;
use forge_core::config::EngineConfig;
use forge_core::error::CoreError;
use forge_core::hardware::MemorySnapshot;
use forge_core::history::HistoryEntry;
use forge_core::job::{Job, JobSummary};
use forge_core::preset::Preset;
use forge_core::registry::{
    admission_badge, AdapterEntry, AdapterKind, AdmissionBadge, ModelEntry, RegistrySnapshot,
};
use forge_core::types::{JobId, MediaKind};
use forge_core::workflow::{
    enhance_prompt, BuilderTable, GenerationRequest, PromptStyle, WorkflowGraph,
};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::direct::DirectBackend;
use crate::dispatcher::{DispatchSettings, JobDispatcher, JobReport};
use crate::error::EngineError;
use crate::events::{EventBus, JobEvent};
use crate::registry::RegistryCache;
use crate::resolver::ArtifactResolver;
use crate::router::BackendRouter;
use crate::sampler::{spawn_sampler, system_memory_source, MemorySource};
use crate::store::{HistoryStore, PresetStore};

/// How long shutdown waits for the background tasks.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Scratch directory for direct-mode output, under the output directory.
const DIRECT_SCRATCH_DIR: &str = ".direct";

/// The backends an engine runs jobs on.
pub struct Backends {
    pub external: Arc<dyn ExecutionBackend>,
    pub direct: Arc<dyn ExecutionBackend>,
}

impl Backends {
    /// The graph service at `config.comfyui_url` plus the local direct
    /// runner. Returns the service adapter too so the host can shut its
    /// stream tasks down.
    pub fn from_config(config: &EngineConfig) -> (Self, Arc<ComfyUIBackend>) {
        let comfyui = Arc::new(ComfyUIBackend::new(&config.comfyui_url));
        let direct = DirectBackend::new(
            config.direct.clone(),
            config.output_dir.join(DIRECT_SCRATCH_DIR),
        );
        let backends = Self {
            external: Arc::clone(&comfyui) as Arc<dyn ExecutionBackend>,
            direct: Arc::new(direct),
        };
        (backends, comfyui)
    }
}

pub struct Engine {
    config: Arc<EngineConfig>,
    builders: BuilderTable,
    registry: Arc<RegistryCache>,
    memory: watch::Receiver<MemorySnapshot>,
    router: BackendRouter,
    dispatcher: JobDispatcher,
    events: Arc<EventBus>,
    history: Arc<HistoryStore>,
    presets: PresetStore,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl Engine {
    /// Start with the host's memory as the admission signal.
    pub async fn start(config: EngineConfig, backends: Backends) -> Result<Self, EngineError> {
        Self::start_with_memory(config, backends, system_memory_source()).await
    }

    /// Validate the builder table, take the first registry scan and
    /// memory sample, load the stores and spawn the periodic tasks.
    pub async fn start_with_memory(
        config: EngineConfig,
        backends: Backends,
        memory_source: MemorySource,
    ) -> Result<Self, EngineError> {
        let builders = BuilderTable::standard()?;
        builders.validate_complete()?;

        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();

        let registry = Arc::new(RegistryCache::new(config.model_paths.clone()));
        registry.refresh().await;
        tasks.spawn(
            Arc::clone(&registry).run_periodic(config.registry_refresh_interval, cancel.child_token()),
        );

        let memory = spawn_sampler(
            memory_source,
            config.memory_sample_interval,
            cancel.child_token(),
            &tasks,
        )
        .await;

        let history = Arc::new(HistoryStore::load(config.history_file.clone(), config.history_limit).await);
        let presets = PresetStore::load(config.presets_file.clone()).await;

        let events = Arc::new(EventBus::default());
        let resolver = Arc::new(ArtifactResolver::new(
            config.output_dir.clone(),
            config.fetch_timeout,
            Arc::clone(&history),
        ));
        let dispatcher = JobDispatcher::new(
            Arc::clone(&events),
            resolver,
            DispatchSettings {
                submit_timeout: config.submit_timeout,
                poll_interval: config.poll_interval,
                timeouts: config.timeouts,
            },
        );
        let router = BackendRouter::new(backends.external, backends.direct, config.probe_timeout);

        tracing::info!(
            builders = builders.len(),
            models = registry.snapshot().entries.len(),
            output_dir = %config.output_dir.display(),
            "Engine started",
        );

        Ok(Self {
            config: Arc::new(config),
            builders,
            registry,
            memory,
            router,
            dispatcher,
            events,
            history,
            presets,
            cancel,
            tasks,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /* --------------------------------------------------------------------
       Models and memory
       -------------------------------------------------------------------- */

    /// The current registry snapshot.
    pub fn models(&self) -> Arc<RegistrySnapshot> {
        self.registry.snapshot()
    }

    /// Rescan now instead of waiting for the next periodic refresh.
    pub async fn refresh_models(&self) -> Arc<RegistrySnapshot> {
        self.registry.refresh().await
    }

    /// Latest memory sample. Never waits on a sample in progress.
    pub fn memory(&self) -> MemorySnapshot {
        *self.memory.borrow()
    }

    pub fn admission(&self, entry: &ModelEntry) -> AdmissionBadge {
        admission_badge(entry, self.memory().available_gb)
    }

    /// Every known model of `kind` with its current admission badge.
    pub fn catalogue(&self, kind: MediaKind) -> Vec<(ModelEntry, AdmissionBadge)> {
        let available_gb = self.memory().available_gb;
        self.models()
            .by_media_kind(kind)
            .map(|entry| (entry.clone(), admission_badge(entry, available_gb)))
            .collect()
    }

    /// Adapters of `kind` that can attach to `model`, or every adapter of
    /// `kind` when no model is given.
    pub fn adapters(
        &self,
        kind: AdapterKind,
        model: Option<&str>,
    ) -> Result<Vec<AdapterEntry>, EngineError> {
        let snapshot = self.models();
        let Some(reference) = model else {
            return Ok(snapshot.adapters.of_kind(kind).to_vec());
        };
        let entry = snapshot
            .find(reference)
            .ok_or_else(|| EngineError::ModelNotFound(reference.to_string()))?;
        Ok(snapshot
            .adapters
            .compatible(kind, entry.family)
            .cloned()
            .collect())
    }

    /* --------------------------------------------------------------------
       Generation
       -------------------------------------------------------------------- */

    /// Resolve the model and compile the request. No backend is touched.
    pub fn compile(
        &self,
        request: &GenerationRequest,
    ) -> Result<(ModelEntry, WorkflowGraph), EngineError> {
        let snapshot = self.registry.snapshot();
        let entry = snapshot
            .find(&request.model)
            .cloned()
            .ok_or_else(|| EngineError::ModelNotFound(request.model.clone()))?;
        let graph = self
            .builders
            .compile_with(request, &entry, &snapshot.adapters)?;
        Ok((entry, graph))
    }

    /// Append quality and style modifiers to `prompt`.
    pub fn enhance_prompt(&self, prompt: &str, style: PromptStyle) -> String {
        enhance_prompt(prompt, style, &mut rand::rng())
    }

    /// Compile, route and dispatch one request.
    ///
    /// Validation and reachability failures return before a job exists.
    pub async fn generate(&self, request: GenerationRequest) -> Result<JobId, EngineError> {
        let (entry, graph) = self.compile(&request)?;
        let backend = self.router.route(&entry).await?;
        let job_id = self
            .dispatcher
            .dispatch(Arc::new(request), entry, Arc::new(graph), backend)
            .await;
        Ok(job_id)
    }

    /// Expand a batch into independent jobs.
    ///
    /// Every item is compiled before anything is dispatched, so an invalid
    /// item rejects the whole batch. The backend is probed once.
    pub async fn generate_batch(&self, plan: &BatchPlan) -> Result<Vec<JobId>, EngineError> {
        let compiled = plan
            .expand()?
            .into_iter()
            .map(|request| self.compile(&request).map(|(entry, graph)| (request, entry, graph)))
            .collect::<Result<Vec<_>, _>>()?;

        let Some((_, first_entry, _)) = compiled.first() else {
            return Ok(Vec::new());
        };
        let backend = self.router.route(first_entry).await?;

        let mut job_ids = Vec::with_capacity(compiled.len());
        for (request, entry, graph) in compiled {
            let job_id = self
                .dispatcher
                .dispatch(Arc::new(request), entry, Arc::new(graph), Arc::clone(&backend))
                .await;
            job_ids.push(job_id);
        }
        tracing::info!(count = job_ids.len(), seed_mode = ?plan.seed_mode, "Batch dispatched");
        Ok(job_ids)
    }

    /// Regenerate an artifact with its recorded seed and parameters.
    pub async fn replay(&self, artifact: &Artifact) -> Result<JobId, EngineError> {
        self.generate(artifact.replay_request()).await
    }

    /* --------------------------------------------------------------------
       Jobs
       -------------------------------------------------------------------- */

    pub async fn cancel(&self, job_id: JobId) -> Result<bool, EngineError> {
        self.dispatcher.cancel(job_id).await
    }

    pub async fn job(&self, job_id: JobId) -> Option<Job> {
        self.dispatcher.job(job_id).await
    }

    pub async fn jobs(&self) -> Vec<JobSummary> {
        self.dispatcher.jobs().await
    }

    /// Block until the job settles.
    pub async fn wait(&self, job_id: JobId) -> Result<JobReport, EngineError> {
        self.dispatcher.wait(job_id).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /* --------------------------------------------------------------------
       History and presets
       -------------------------------------------------------------------- */

    /// Recent generations, newest first.
    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.history.entries().await
    }

    /// Save `request`'s settings under `name`, replacing any preset of
    /// the same name.
    pub async fn save_preset(
        &self,
        name: &str,
        request: &GenerationRequest,
    ) -> Result<Option<Preset>, EngineError> {
        let preset = Preset::from_request(name, request)?;
        self.presets.save(preset).await
    }

    pub async fn presets(&self, kind: Option<MediaKind>) -> Vec<Preset> {
        self.presets.list(kind).await
    }

    pub async fn remove_preset(&self, name: &str) -> Result<Option<Preset>, EngineError> {
        self.presets.remove(name).await
    }

    /// A request carrying a preset's settings. Input assets must be
    /// attached by the caller.
    pub async fn apply_preset(&self, name: &str) -> Result<GenerationRequest, EngineError> {
        let preset = self.presets.get(name).await.ok_or_else(|| CoreError::NotFound {
            entity: "preset",
            id: name.to_string(),
        })?;
        Ok(preset.to_request())
    }

    /* --------------------------------------------------------------------
       Lifecycle
       -------------------------------------------------------------------- */

    /// Cancel in-flight jobs and stop the periodic tasks.
    pub async fn shutdown(&self) {
        tracing::info!("Engine shutting down");
        self.dispatcher.shutdown().await;
        self.cancel.cancel();
        self.tasks.close();
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.tasks.wait())
            .await
            .is_err()
        {
            tracing::warn!("Timed out waiting for background tasks");
        }
    }
}
