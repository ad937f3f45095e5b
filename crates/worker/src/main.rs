use anyhow::Context;
use forge_core::config::EngineConfig;
use forge_core::registry::AdapterKind;
use forge_core::types::MediaKind;
use forge_pipeline::engine::{Backends, Engine};
use forge_pipeline::events::JobEvent;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "forge_worker=info,forge_pipeline=info,forge_comfyui=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::from_env().context("Invalid engine configuration")?;
    tracing::info!(
        comfyui_url = %config.comfyui_url,
        output_dir = %config.output_dir.display(),
        model_paths = config.model_paths.len(),
        "Loaded engine configuration",
    );

    let (backends, comfyui) = Backends::from_config(&config);
    let engine = Engine::start(config, backends)
        .await
        .context("Failed to start generation engine")?;

    let memory = engine.memory();
    tracing::info!(
        total_gb = memory.total_gb,
        available_gb = memory.available_gb,
        pressure = ?memory.pressure(),
        tier = ?memory.tier(),
        "Host memory",
    );
    for kind in MediaKind::ALL {
        for (entry, badge) in engine.catalogue(kind) {
            tracing::info!(
                media_kind = %kind,
                model = %entry.name,
                family = entry.family.as_str(),
                backend_mode = ?entry.backend_mode,
                estimated_gb = entry.estimated_memory_gb,
                badge = badge.as_str(),
                "Model available",
            );
        }
    }
    let snapshot = engine.models();
    for kind in AdapterKind::ALL {
        for adapter in snapshot.adapters.of_kind(kind) {
            tracing::info!(
                kind = %kind,
                adapter = %adapter.name,
                base = %adapter.base,
                "Adapter available",
            );
        }
    }

    let mut events = engine.subscribe();
    let feed = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(JobEvent::Progress(_)) => {}
                Ok(event) => {
                    let json = serde_json::to_string(&event).unwrap_or_default();
                    tracing::info!(job_id = %event.job_id(), event = %json, "Job event");
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Job event feed lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    shutdown_signal().await;

    engine.shutdown().await;
    comfyui.shutdown();
    feed.abort();
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
