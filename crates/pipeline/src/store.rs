//! JSON file persistence for generation history and presets.
//!
//! Each store keeps its in-memory state behind a `RwLock` and rewrites
//! the whole file on every change (write to a sibling temp file, then
//! rename). A missing file is an empty store; an unreadable one is
//! logged and replaced on the next write.

use std::path::{Path, PathBuf};

use forge_core::history::{HistoryEntry, HistoryLog};
use forge_core::preset::{Preset, PresetBook};
use forge_core::types::{JobId, MediaKind};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::EngineError;

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

pub struct HistoryStore {
    path: PathBuf,
    log: RwLock<HistoryLog>,
}

impl HistoryStore {
    pub async fn load(path: PathBuf, limit: usize) -> Self {
        let entries: Vec<HistoryEntry> = read_json(&path).await.unwrap_or_default();
        tracing::debug!(path = %path.display(), count = entries.len(), "History loaded");
        Self {
            log: RwLock::new(HistoryLog::from_entries(limit, entries)),
            path,
        }
    }

    /// Record an entry and persist the capped log.
    pub async fn append(&self, entry: HistoryEntry) -> Result<(), EngineError> {
        let mut log = self.log.write().await;
        log.append(entry);
        write_json(&self.path, log.entries()).await
    }

    /// Entries, newest first.
    pub async fn entries(&self) -> Vec<HistoryEntry> {
        self.log.read().await.entries().to_vec()
    }

    pub async fn find_job(&self, job_id: JobId) -> Option<HistoryEntry> {
        self.log.read().await.find_job(job_id).cloned()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ---------------------------------------------------------------------------
// Presets
// ---------------------------------------------------------------------------

pub struct PresetStore {
    path: PathBuf,
    book: RwLock<PresetBook>,
}

impl PresetStore {
    pub async fn load(path: PathBuf) -> Self {
        let presets: Vec<Preset> = read_json(&path).await.unwrap_or_default();
        Self {
            book: RwLock::new(PresetBook::from_presets(presets)),
            path,
        }
    }

    /// Insert or replace a preset by name. Returns the replaced one.
    pub async fn save(&self, preset: Preset) -> Result<Option<Preset>, EngineError> {
        let mut book = self.book.write().await;
        let replaced = book.upsert(preset);
        write_json(&self.path, book.presets()).await?;
        Ok(replaced)
    }

    pub async fn remove(&self, name: &str) -> Result<Option<Preset>, EngineError> {
        let mut book = self.book.write().await;
        let removed = book.remove(name);
        if removed.is_some() {
            write_json(&self.path, book.presets()).await?;
        }
        Ok(removed)
    }

    pub async fn get(&self, name: &str) -> Option<Preset> {
        self.book.read().await.get(name).cloned()
    }

    pub async fn list(&self, kind: Option<MediaKind>) -> Vec<Preset> {
        let book = self.book.read().await;
        match kind {
            Some(kind) => book.for_media_kind(kind).cloned().collect(),
            None => book.presets().to_vec(),
        }
    }
}

// ---- private helpers ----

async fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read store file");
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring malformed store file");
            None
        }
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), EngineError> {
    let store_err = |message: String| EngineError::Store {
        path: path.to_path_buf(),
        message,
    };

    let json = serde_json::to_vec_pretty(value).map_err(|e| store_err(e.to_string()))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| store_err(e.to_string()))?;
    }

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| store_err(e.to_string()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| store_err(e.to_string()))
}
