//! Model registry: discovered model files, their families and footprints.
//!
//! The registry is a disposable cache over the filesystem. Every refresh
//! rebuilds a fresh [`RegistrySnapshot`]; jobs keep a clone of the
//! [`ModelEntry`] they were compiled from, so a refresh never disturbs
//! in-flight work.

pub mod adapter;
pub mod family;
pub mod memory;
pub mod scan;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{GenerationMode, MediaKind, Timestamp};

pub use adapter::{AdapterCatalog, AdapterEntry, AdapterKind, BaseArch};
pub use family::{classify, BackendMode, Family};
pub use memory::{admission_badge, estimate_memory, AdmissionBadge};
pub use scan::scan;

/// Display name of the built-in direct-mode voice model.
pub const BUILTIN_VOICE_NAME: &str = "chatterbox-tts";

/// Nominal weight size of the built-in voice model (about 1.6 GB).
const BUILTIN_VOICE_SIZE_BYTES: u64 = 1_717_986_918;

/// One discovered (or built-in) model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// File stem, used as the user-facing reference.
    pub name: String,
    /// Canonical, symlink-resolved location.
    pub path: PathBuf,
    /// Name the execution backend knows the file by, relative to its
    /// model category directory.
    pub backend_name: String,
    pub family: Family,
    pub media_kind: MediaKind,
    pub backend_mode: BackendMode,
    pub size_bytes: u64,
    pub estimated_memory_gb: f64,
    pub supported_modes: Vec<GenerationMode>,
    /// Ships with the engine rather than discovered on disk.
    pub builtin: bool,
}

impl ModelEntry {
    /// Build an entry for a classified file. Returns `None` for families
    /// that have no media kind.
    pub fn from_file(
        path: PathBuf,
        backend_name: String,
        family: Family,
        size_bytes: u64,
    ) -> Option<Self> {
        let media_kind = family.media_kind()?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&backend_name)
            .to_string();
        Some(Self {
            name,
            path,
            backend_name,
            family,
            media_kind,
            backend_mode: family.backend_mode(),
            size_bytes,
            estimated_memory_gb: memory::estimate_for(family, size_bytes),
            supported_modes: family.supported_modes().to_vec(),
            builtin: false,
        })
    }

    pub fn supports(&self, mode: GenerationMode) -> bool {
        self.supported_modes.contains(&mode)
    }
}

/// Models that exist without a file in any search path.
pub fn builtin_entries() -> Vec<ModelEntry> {
    let family = Family::Chatterbox;
    vec![ModelEntry {
        name: BUILTIN_VOICE_NAME.to_string(),
        path: PathBuf::from("builtin").join(BUILTIN_VOICE_NAME),
        backend_name: BUILTIN_VOICE_NAME.to_string(),
        family,
        media_kind: MediaKind::Voice,
        backend_mode: family.backend_mode(),
        size_bytes: BUILTIN_VOICE_SIZE_BYTES,
        estimated_memory_gb: memory::estimate_for(family, BUILTIN_VOICE_SIZE_BYTES),
        supported_modes: family.supported_modes().to_vec(),
        builtin: true,
    }]
}

/// The result of one registry refresh.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub entries: Vec<ModelEntry>,
    /// LoRA and ControlNet weights found alongside the models.
    #[serde(default)]
    pub adapters: AdapterCatalog,
    pub scanned_at: Option<Timestamp>,
}

impl RegistrySnapshot {
    pub fn new(entries: Vec<ModelEntry>, scanned_at: Timestamp) -> Self {
        Self {
            entries,
            adapters: AdapterCatalog::default(),
            scanned_at: Some(scanned_at),
        }
    }

    pub fn with_adapters(mut self, adapters: AdapterCatalog) -> Self {
        self.adapters = adapters;
        self
    }

    /// Resolve a model reference by name, backend name, or path.
    pub fn find(&self, reference: &str) -> Option<&ModelEntry> {
        self.entries
            .iter()
            .find(|e| e.name == reference)
            .or_else(|| self.entries.iter().find(|e| e.backend_name == reference))
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|e| e.path.to_str() == Some(reference))
            })
    }

    pub fn by_media_kind(&self, kind: MediaKind) -> impl Iterator<Item = &ModelEntry> {
        self.entries.iter().filter(move |e| e.media_kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, family: Family) -> ModelEntry {
        ModelEntry::from_file(
            PathBuf::from(format!("/models/checkpoints/{name}.safetensors")),
            format!("{name}.safetensors"),
            family,
            2 * 1024 * 1024 * 1024,
        )
        .unwrap()
    }

    #[test]
    fn from_file_derives_family_properties() {
        let e = entry("sdxl_lightning_4step", Family::Lightning);
        assert_eq!(e.name, "sdxl_lightning_4step");
        assert_eq!(e.media_kind, MediaKind::Image);
        assert_eq!(e.backend_mode, BackendMode::External);
        assert!(e.supports(GenerationMode::Edit));
        assert!(!e.supports(GenerationMode::Upscale));
    }

    #[test]
    fn unknown_family_has_no_entry() {
        assert!(ModelEntry::from_file(
            PathBuf::from("/x/mystery.bin"),
            "mystery.bin".into(),
            Family::Unknown,
            1
        )
        .is_none());
    }

    #[test]
    fn builtin_voice_is_direct() {
        let builtins = builtin_entries();
        assert_eq!(builtins.len(), 1);
        assert_eq!(builtins[0].backend_mode, BackendMode::Direct);
        assert!(builtins[0].builtin);
        assert!(builtins[0].supports(GenerationMode::VoiceClone));
    }

    #[test]
    fn find_by_name_backend_name_or_path() {
        let snapshot = RegistrySnapshot::new(
            vec![entry("flux1-dev", Family::Flux), entry("sd15", Family::Standard)],
            chrono::Utc::now(),
        );
        assert_eq!(snapshot.find("sd15").unwrap().family, Family::Standard);
        assert_eq!(snapshot.find("flux1-dev.safetensors").unwrap().family, Family::Flux);
        assert_eq!(
            snapshot.find("/models/checkpoints/sd15.safetensors").unwrap().name,
            "sd15"
        );
        assert!(snapshot.find("missing").is_none());
    }
}
