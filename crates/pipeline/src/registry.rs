//! Process-scoped model registry cache.
//!
//! The latest [`RegistrySnapshot`] sits behind a [`watch`] channel. A
//! refresh rebuilds it on the blocking pool and swaps it in atomically;
//! readers hold an `Arc` to whatever snapshot they started with, so a
//! refresh never disturbs compilation or running jobs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use forge_core::registry::{builtin_entries, scan, AdapterCatalog, RegistrySnapshot};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub struct RegistryCache {
    search_paths: Vec<PathBuf>,
    tx: watch::Sender<Arc<RegistrySnapshot>>,
}

impl RegistryCache {
    /// An empty cache; call [`refresh`](Self::refresh) to populate it.
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        let (tx, _) = watch::channel(Arc::new(RegistrySnapshot::default()));
        Self { search_paths, tx }
    }

    /// Rescan the search paths and publish a fresh snapshot.
    pub async fn refresh(&self) -> Arc<RegistrySnapshot> {
        let paths = self.search_paths.clone();
        let (scanned, adapters) =
            tokio::task::spawn_blocking(move || (scan(&paths), AdapterCatalog::scan(&paths)))
                .await
                .unwrap_or_else(|e| {
                    tracing::error!(error = %e, "Registry scan task failed");
                    (Vec::new(), AdapterCatalog::default())
                });

        let mut entries = scanned;
        for builtin in builtin_entries() {
            if !entries.iter().any(|e| e.name == builtin.name) {
                entries.push(builtin);
            }
        }

        let snapshot =
            Arc::new(RegistrySnapshot::new(entries, chrono::Utc::now()).with_adapters(adapters));
        tracing::info!(
            models = snapshot.entries.len(),
            loras = snapshot.adapters.loras.len(),
            controlnets = snapshot.adapters.controlnets.len(),
            "Model registry refreshed"
        );
        self.tx.send_replace(Arc::clone(&snapshot));
        snapshot
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.tx.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<RegistrySnapshot>> {
        self.tx.subscribe()
    }

    /// Refresh every `interval` until `cancel` fires.
    pub async fn run_periodic(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Registry refresh stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.refresh().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use forge_core::registry::{Family, BUILTIN_VOICE_NAME};

    use super::*;

    #[tokio::test]
    async fn refresh_includes_scanned_and_builtin_models() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoints = dir.path().join("checkpoints");
        std::fs::create_dir_all(&checkpoints).unwrap();
        std::fs::write(checkpoints.join("sdxl_lightning_4step.safetensors"), b"x").unwrap();

        let cache = RegistryCache::new(vec![dir.path().to_path_buf()]);
        assert!(cache.snapshot().entries.is_empty());

        let snapshot = cache.refresh().await;
        let lightning = snapshot.find("sdxl_lightning_4step").unwrap();
        assert_eq!(lightning.family, Family::Lightning);
        assert!(snapshot.find(BUILTIN_VOICE_NAME).unwrap().builtin);
        assert_eq!(cache.snapshot().entries.len(), 2);
    }

    #[tokio::test]
    async fn refresh_catalogues_adapters_apart_from_models() {
        let dir = tempfile::tempdir().unwrap();
        let loras = dir.path().join("loras");
        std::fs::create_dir_all(&loras).unwrap();
        std::fs::write(loras.join("sdxl_pixel_art.safetensors"), b"x").unwrap();

        let snapshot = RegistryCache::new(vec![dir.path().to_path_buf()])
            .refresh()
            .await;
        assert!(snapshot.find("sdxl_pixel_art").is_none());
        assert_eq!(snapshot.adapters.loras.len(), 1);
        assert_eq!(snapshot.adapters.loras[0].name, "sdxl_pixel_art");
    }

    #[tokio::test]
    async fn held_snapshot_is_unaffected_by_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RegistryCache::new(vec![dir.path().to_path_buf()]);
        let before = cache.refresh().await;

        std::fs::write(dir.path().join("dreamshaper_8.safetensors"), b"x").unwrap();
        let after = cache.refresh().await;

        assert_eq!(before.entries.len(), 1);
        assert_eq!(after.entries.len(), 2);
    }
}
