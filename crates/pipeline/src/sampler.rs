//! Periodic host-memory sampling.
//!
//! A single task owns the [`watch`] sender and is the only writer of the
//! memory signal; everything else reads the latest snapshot without
//! waiting on a sample in progress.

use std::sync::Arc;
use std::time::Duration;

use forge_core::hardware::memory::read_system_memory;
use forge_core::hardware::MemorySnapshot;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Where samples come from. Swappable so tests control the signal.
pub type MemorySource = Arc<dyn Fn() -> Option<MemorySnapshot> + Send + Sync>;

/// The host's `/proc/meminfo`.
pub fn system_memory_source() -> MemorySource {
    Arc::new(read_system_memory)
}

/// Take one sample off the async runtime. Unknown when unreadable.
async fn sample(source: &MemorySource) -> MemorySnapshot {
    let source = Arc::clone(source);
    tokio::task::spawn_blocking(move || source())
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| MemorySnapshot::unknown(chrono::Utc::now()))
}

/// Sample once now, then every `interval` until `cancel` fires.
pub async fn spawn_sampler(
    source: MemorySource,
    interval: Duration,
    cancel: CancellationToken,
    tasks: &TaskTracker,
) -> watch::Receiver<MemorySnapshot> {
    let initial = sample(&source).await;
    tracing::info!(
        total_gb = initial.total_gb,
        available_gb = initial.available_gb,
        "Initial memory sample",
    );
    let (tx, rx) = watch::channel(initial);

    tasks.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Memory sampler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let snapshot = sample(&source).await;
                    tracing::trace!(available_gb = snapshot.available_gb, "Memory sample");
                    tx.send_replace(snapshot);
                }
            }
        }
    });

    rx
}
