mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{EventScript, FakeBackend, SubmitScript, MODEL};
use forge_core::backend::RemoteStatus;
use forge_core::batch::{BatchPlan, SeedMode};
use forge_core::error::CoreError;
use forge_core::job::{FailureKind, JobState};
use forge_core::progress::BackendEvent;
use forge_core::types::{GenerationMode, MediaKind};
use forge_core::registry::AdapterKind;
use forge_core::workflow::{GenerationRequest, LoraSelection, PromptStyle};
use forge_pipeline::error::EngineError;
use forge_pipeline::events::JobEvent;
use tokio::sync::broadcast;

fn create(seed: u64) -> GenerationRequest {
    GenerationRequest::new(MediaKind::Image, GenerationMode::Create, MODEL, "a red fox in snow")
        .with_seed(seed)
}

/// Receive events until one matches `pred`, bounded by a timeout.
async fn next_matching(
    rx: &mut broadcast::Receiver<JobEvent>,
    pred: impl Fn(&JobEvent) -> bool,
) -> JobEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = rx.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .unwrap()
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn streamed_job_completes_with_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::new());
    let engine = common::engine(dir.path(), Arc::clone(&backend)).await;
    let mut events = engine.subscribe();

    let job_id = engine.generate(create(1234)).await.unwrap();
    let report = engine.wait(job_id).await.unwrap();

    assert_eq!(report.job.state, JobState::Completed);
    assert_eq!(report.job.progress, 1.0);
    assert_eq!(report.artifacts.len(), 1);

    let artifact = &report.artifacts[0];
    assert_eq!(artifact.metadata.seed, 1234);
    assert_eq!(artifact.metadata.parameters.seed, Some(1234));
    assert_eq!(artifact.metadata.model, MODEL);
    assert!(artifact.path.starts_with(dir.path().join("out")));
    let name = artifact.path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("image_"), "{name}");
    assert!(name.ends_with("_s1234.png"), "{name}");
    assert_eq!(std::fs::read(&artifact.path).unwrap(), b"\x89PNG fake");

    assert_eq!(backend.submitted()[0].seed, 1234);

    // Progress seen by subscribers never goes backwards.
    let mut fractions = Vec::new();
    loop {
        let event = next_matching(&mut events, |_| true).await;
        match event {
            JobEvent::Progress(snapshot) => fractions.push(snapshot.fraction),
            JobEvent::ArtifactsReady { .. } => break,
            _ => {}
        }
    }
    assert!(!fractions.is_empty());
    assert!(fractions.windows(2).all(|w| w[0] <= w[1]), "{fractions:?}");

    let history = engine.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].job.id, job_id);

    engine.shutdown().await;
}

#[tokio::test]
async fn closed_stream_falls_back_to_polling() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(
        FakeBackend::new()
            .with_events(EventScript::Partial(3))
            .with_statuses(vec![
                RemoteStatus::Running,
                RemoteStatus::Running,
                RemoteStatus::Completed,
            ]),
    );
    let engine = common::engine(dir.path(), backend).await;

    let job_id = engine.generate(create(5)).await.unwrap();
    let report = engine.wait(job_id).await.unwrap();
    assert_eq!(report.job.state, JobState::Completed);
    assert_eq!(report.artifacts.len(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn unavailable_stream_polls_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(
        FakeBackend::new()
            .with_events(EventScript::Unavailable)
            .with_statuses(vec![RemoteStatus::Pending, RemoteStatus::Completed]),
    );
    let engine = common::engine(dir.path(), backend).await;

    let job_id = engine.generate(create(6)).await.unwrap();
    assert!(engine.wait(job_id).await.is_ok());

    engine.shutdown().await;
}

// ---------------------------------------------------------------------------
// Pre-submission failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unreachable_backend_creates_no_job() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::new().unreachable());
    let engine = common::engine(dir.path(), Arc::clone(&backend)).await;

    let err = engine.generate(create(1)).await.unwrap_err();
    assert_matches!(err, EngineError::BackendUnreachable { backend: "fake", .. });
    assert!(engine.jobs().await.is_empty());
    assert!(backend.submitted().is_empty());

    engine.shutdown().await;
}

#[tokio::test]
async fn edit_without_image_is_rejected_before_compiling() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::new());
    let engine = common::engine(dir.path(), Arc::clone(&backend)).await;

    let request = GenerationRequest::new(MediaKind::Image, GenerationMode::Edit, MODEL, "winter");
    let err = engine.generate(request).await.unwrap_err();
    assert_matches!(
        err,
        EngineError::Validation(CoreError::AssetMissing { mode: GenerationMode::Edit, .. })
    );
    assert!(engine.jobs().await.is_empty());
    assert!(backend.submitted().is_empty());

    engine.shutdown().await;
}

#[tokio::test]
async fn unknown_model_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let engine = common::engine(dir.path(), Arc::new(FakeBackend::new())).await;

    let request = GenerationRequest::new(MediaKind::Image, GenerationMode::Create, "nope", "x");
    assert_matches!(
        engine.generate(request).await,
        Err(EngineError::ModelNotFound(name)) if name == "nope"
    );

    engine.shutdown().await;
}

// ---------------------------------------------------------------------------
// Backend-side failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rejected_submission_fails_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(
        FakeBackend::new().with_submit(SubmitScript::Reject("Prompt outputs failed validation".into())),
    );
    let engine = common::engine(dir.path(), backend).await;

    let job_id = engine.generate(create(2)).await.unwrap();
    assert_matches!(
        engine.wait(job_id).await,
        Err(EngineError::SubmissionRejected(message)) if message.contains("failed validation")
    );

    let job = engine.job(job_id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    let failure = job.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::SubmissionRejected);
    assert!(!failure.started);

    engine.shutdown().await;
}

#[tokio::test]
async fn submit_transport_error_is_distinct_from_rejection() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::new().with_submit(SubmitScript::Fail("reset".into())));
    let engine = common::engine(dir.path(), backend).await;

    let job_id = engine.generate(create(2)).await.unwrap();
    assert_matches!(
        engine.wait(job_id).await,
        Err(EngineError::ExecutionFailed { started: false, .. })
    );
    let failure = engine.job(job_id).await.unwrap().failure.unwrap();
    assert_eq!(failure.kind, FailureKind::SubmitError);

    engine.shutdown().await;
}

#[tokio::test]
async fn execution_error_preserves_progress_and_log() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::new().with_events(EventScript::Fixed(vec![
        BackendEvent::ExecutionStarted,
        BackendEvent::NodeStarted {
            node_id: "1".into(),
        },
        BackendEvent::NodeFinished {
            node_id: "1".into(),
        },
        BackendEvent::ExecutionError {
            node_id: Some("3".into()),
            message: "CUDA out of memory".into(),
            exception_type: Some("torch.OutOfMemoryError".into()),
        },
    ])));
    let engine = common::engine(dir.path(), backend).await;

    let job_id = engine.generate(create(3)).await.unwrap();
    let err = engine.wait(job_id).await.unwrap_err();
    assert_matches!(
        err,
        EngineError::ExecutionFailed { ref node_id, last_progress, started: true, .. }
            if node_id.as_deref() == Some("3") && last_progress > 0.0
    );

    let job = engine.job(job_id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert!(job.log.iter().any(|l| l.contains("torch.OutOfMemoryError")));
    assert!(engine.history().await.is_empty());

    engine.shutdown().await;
}

#[tokio::test]
async fn missing_outputs_surface_as_artifact_error() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::new().without_outputs());
    let engine = common::engine(dir.path(), backend).await;

    let job_id = engine.generate(create(4)).await.unwrap();
    assert_matches!(
        engine.wait(job_id).await,
        Err(EngineError::ArtifactFetch { job_id: id, .. }) if id == job_id
    );
    assert_eq!(engine.job(job_id).await.unwrap().state, JobState::Completed);

    engine.shutdown().await;
}

#[tokio::test]
async fn failed_fetch_leaves_no_partial_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::new().with_unfetchable_output("forge_00002_.png"));
    let engine = common::engine(dir.path(), backend).await;

    let job_id = engine.generate(create(12)).await.unwrap();
    assert_matches!(
        engine.wait(job_id).await,
        Err(EngineError::ArtifactFetch { message, .. }) if message.contains("forge_00002_.png")
    );

    let written: Vec<_> = std::fs::read_dir(dir.path().join("out"))
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with("image_"))
        .collect();
    assert!(written.is_empty(), "{written:?}");
    assert!(engine.history().await.is_empty());

    engine.shutdown().await;
}

#[tokio::test]
async fn unpersisted_history_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    // A regular file where the history directory should be.
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"").unwrap();
    let history_file = blocker.join("history.json").to_string_lossy().into_owned();
    let config = common::config_with(dir.path(), vec![("FORGE_HISTORY_FILE", history_file)]);
    let engine = common::engine_with_config(config, Arc::new(FakeBackend::new())).await;
    let mut events = engine.subscribe();

    let job_id = engine.generate(create(13)).await.unwrap();
    let report = engine.wait(job_id).await.unwrap();
    assert_eq!(report.artifacts.len(), 1);
    assert!(report.artifacts[0].path.exists());
    assert!(report.history_error.is_some());

    let event = next_matching(&mut events, |e| matches!(e, JobEvent::HistoryFailed { .. })).await;
    assert_eq!(event.job_id(), job_id);

    engine.shutdown().await;
}

#[tokio::test]
async fn recorded_history_has_no_error() {
    let dir = tempfile::tempdir().unwrap();
    let engine = common::engine(dir.path(), Arc::new(FakeBackend::new())).await;

    let job_id = engine.generate(create(14)).await.unwrap();
    let report = engine.wait(job_id).await.unwrap();
    assert_eq!(report.history_error, None);
    assert!(dir.path().join("out").join("history.json").exists());

    engine.shutdown().await;
}

// ---------------------------------------------------------------------------
// Timeout and cancellation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn running_job_times_out_and_cancels_backend() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::new().with_events(EventScript::Silent));
    let engine = common::engine(dir.path(), Arc::clone(&backend)).await;

    let job_id = engine.generate(create(7)).await.unwrap();
    assert_matches!(engine.wait(job_id).await, Err(EngineError::Timeout { .. }));

    let job = engine.job(job_id).await.unwrap();
    assert_eq!(job.state, JobState::TimedOut);
    assert!(job.started_at.is_some());
    assert_eq!(job.failure.unwrap().kind, FailureKind::Timeout);

    engine.shutdown().await;
    assert_eq!(backend.cancels(), vec![format!("prompt-{job_id}")]);
}

#[tokio::test(start_paused = true)]
async fn silent_open_stream_still_observes_completion() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(
        FakeBackend::new()
            .with_events(EventScript::Silent)
            .with_statuses(vec![RemoteStatus::Running, RemoteStatus::Completed]),
    );
    let engine = common::engine(dir.path(), Arc::clone(&backend)).await;

    let job_id = engine.generate(create(11)).await.unwrap();
    let report = engine.wait(job_id).await.unwrap();
    assert_eq!(report.job.state, JobState::Completed);
    assert_eq!(report.artifacts.len(), 1);

    engine.shutdown().await;
    assert!(backend.cancels().is_empty());
}

#[tokio::test]
async fn cancelled_job_stays_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::new().with_events(EventScript::Silent));
    let engine = common::engine(dir.path(), Arc::clone(&backend)).await;
    let mut events = engine.subscribe();

    let job_id = engine.generate(create(8)).await.unwrap();
    next_matching(&mut events, |e| matches!(e, JobEvent::Started { .. })).await;

    assert!(engine.cancel(job_id).await.unwrap());
    assert_eq!(engine.job(job_id).await.unwrap().state, JobState::Cancelled);
    // A second cancel is a no-op.
    assert!(!engine.cancel(job_id).await.unwrap());
    assert_matches!(engine.wait(job_id).await, Err(EngineError::Cancelled));

    engine.shutdown().await;
    assert_eq!(engine.job(job_id).await.unwrap().state, JobState::Cancelled);
    assert_eq!(backend.cancels(), vec![format!("prompt-{job_id}")]);
    assert!(engine.history().await.is_empty());
}

#[tokio::test]
async fn cancelling_unknown_job_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let engine = common::engine(dir.path(), Arc::new(FakeBackend::new())).await;

    let id = uuid::Uuid::new_v4();
    assert_matches!(engine.cancel(id).await, Err(EngineError::JobNotFound(x)) if x == id);

    engine.shutdown().await;
}

// ---------------------------------------------------------------------------
// Batches, presets and replay
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sequential_batch_dispatches_independent_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::new());
    let engine = common::engine(dir.path(), Arc::clone(&backend)).await;

    let plan = BatchPlan {
        template: create(10),
        count: 3,
        seed_mode: SeedMode::Sequential,
        prompt_variations: vec![],
    };
    let job_ids = engine.generate_batch(&plan).await.unwrap();
    assert_eq!(job_ids.len(), 3);
    for id in &job_ids {
        engine.wait(*id).await.unwrap();
    }

    let mut seeds: Vec<u64> = backend.submitted().iter().map(|g| g.seed).collect();
    seeds.sort_unstable();
    assert_eq!(seeds, vec![10, 11, 12]);

    engine.shutdown().await;
}

#[tokio::test]
async fn invalid_batch_item_rejects_whole_batch() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::new());
    let engine = common::engine(dir.path(), Arc::clone(&backend)).await;

    let plan = BatchPlan {
        template: create(1),
        count: 17,
        seed_mode: SeedMode::Random,
        prompt_variations: vec![],
    };
    assert_matches!(
        engine.generate_batch(&plan).await,
        Err(EngineError::Validation(CoreError::Validation(_)))
    );
    assert!(backend.submitted().is_empty());

    engine.shutdown().await;
}

#[tokio::test]
async fn preset_round_trips_settings() {
    let dir = tempfile::tempdir().unwrap();
    let engine = common::engine(dir.path(), Arc::new(FakeBackend::new())).await;

    assert!(engine.save_preset("snowy fox", &create(99)).await.unwrap().is_none());
    let request = engine.apply_preset("snowy fox").await.unwrap();
    assert_eq!(request.model, MODEL);
    assert_eq!(request.params.prompt, "a red fox in snow");
    assert_eq!(request.params.seed, None);

    assert_eq!(engine.presets(Some(MediaKind::Image)).await.len(), 1);
    assert!(engine.presets(Some(MediaKind::Music)).await.is_empty());
    assert_matches!(
        engine.apply_preset("missing").await,
        Err(EngineError::Validation(CoreError::NotFound { entity: "preset", .. }))
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn replay_reuses_recorded_seed() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::new());
    let engine = common::engine(dir.path(), Arc::clone(&backend)).await;

    let first = engine.generate(create(4242)).await.unwrap();
    let report = engine.wait(first).await.unwrap();

    let second = engine.replay(&report.artifacts[0]).await.unwrap();
    engine.wait(second).await.unwrap();

    let seeds: Vec<u64> = backend.submitted().iter().map(|g| g.seed).collect();
    assert_eq!(seeds, vec![4242, 4242]);

    engine.shutdown().await;
}

#[tokio::test]
async fn catalogue_badges_use_current_memory() {
    let dir = tempfile::tempdir().unwrap();
    let engine = common::engine(dir.path(), Arc::new(FakeBackend::new())).await;

    assert_eq!(engine.memory().available_gb, 16.0);
    let catalogue = engine.catalogue(MediaKind::Image);
    assert_eq!(catalogue.len(), 1);
    assert_eq!(catalogue[0].0.name, MODEL);
    assert_eq!(catalogue[0].1, engine.admission(&catalogue[0].0));

    // The built-in voice model is always listed.
    assert!(!engine.catalogue(MediaKind::Voice).is_empty());

    engine.shutdown().await;
}

#[tokio::test]
async fn registry_adapters_resolve_into_submitted_graph() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::config(dir.path());
    let loras = dir.path().join("models/loras");
    std::fs::create_dir_all(&loras).unwrap();
    std::fs::write(loras.join("ink_sd15.safetensors"), b"w").unwrap();
    std::fs::write(loras.join("pixel_xl.safetensors"), b"w").unwrap();
    let backend = Arc::new(FakeBackend::new());
    let engine = common::engine_with_config(config, Arc::clone(&backend)).await;

    let usable = engine.adapters(AdapterKind::Lora, Some(MODEL)).unwrap();
    let names: Vec<_> = usable.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["ink_sd15"]);
    assert_eq!(engine.adapters(AdapterKind::Lora, None).unwrap().len(), 2);

    let job_id = engine
        .generate(create(8).with_lora(LoraSelection::new("ink_sd15")))
        .await
        .unwrap();
    engine.wait(job_id).await.unwrap();
    let lora = backend.submitted()[0].find_class("LoraLoader").cloned().unwrap();
    assert_eq!(lora.value("lora_name"), Some(&serde_json::json!("ink_sd15.safetensors")));

    assert_matches!(
        engine
            .generate(create(9).with_lora(LoraSelection::new("pixel_xl")))
            .await,
        Err(EngineError::Validation(CoreError::Validation(_)))
    );
    assert_eq!(backend.submitted().len(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn enhanced_prompt_extends_the_original() {
    let dir = tempfile::tempdir().unwrap();
    let engine = common::engine(dir.path(), Arc::new(FakeBackend::new())).await;

    let enhanced = engine.enhance_prompt("a red fox in snow", PromptStyle::Auto);
    assert!(enhanced.starts_with("a red fox in snow, "), "{enhanced}");
    assert_eq!(enhanced.split(", ").count(), 7);
    assert_eq!(engine.enhance_prompt("  ", PromptStyle::Photo), "");

    engine.shutdown().await;
}
