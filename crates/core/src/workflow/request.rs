//! The caller-facing generation request.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{GenerationMode, MediaKind};

/// Tunable parameters. Absent values take the model family's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    /// Prompt text, or the script to speak for voice requests.
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cfg: Option<f64>,
    /// Edit strength; 0 keeps the input, 1 replaces it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denoise: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frames: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub style_tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_preset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f64>,
    /// Voice emotion intensity for the built-in voice model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exaggeration: Option<f64>,
    /// Trade speed for fidelity where the family offers both.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high_quality: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lora: Option<LoraSelection>,
    /// Structural guidance from `InputAssets::control_image`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control: Option<ControlSettings>,
}

/// Default weight of a LoRA adapter.
pub const DEFAULT_LORA_STRENGTH: f64 = 0.8;

/// Default weight of ControlNet guidance.
pub const DEFAULT_CONTROL_STRENGTH: f64 = 1.0;

/// A LoRA adapter applied on top of the checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraSelection {
    /// Adapter name or backend name from the registry.
    pub name: String,
    #[serde(default = "default_lora_strength")]
    pub strength: f64,
}

impl LoraSelection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strength: DEFAULT_LORA_STRENGTH,
        }
    }
}

fn default_lora_strength() -> f64 {
    DEFAULT_LORA_STRENGTH
}

/// How the control image is turned into a guidance map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlPreprocessor {
    /// The control image already is the map.
    #[default]
    None,
    Canny,
    Depth,
    LineArt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSettings {
    /// ControlNet name or backend name from the registry.
    pub model: String,
    #[serde(default)]
    pub preprocessor: ControlPreprocessor,
    #[serde(default = "default_control_strength")]
    pub strength: f64,
}

impl ControlSettings {
    pub fn new(model: impl Into<String>, preprocessor: ControlPreprocessor) -> Self {
        Self {
            model: model.into(),
            preprocessor,
            strength: DEFAULT_CONTROL_STRENGTH,
        }
    }
}

fn default_control_strength() -> f64 {
    DEFAULT_CONTROL_STRENGTH
}

/// Local files a request conditions on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputAssets {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<PathBuf>,
    /// Inpainting mask for Edit requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask: Option<PathBuf>,
    /// Reference voice or melody.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<PathBuf>,
    /// Pose, edge or depth source for ControlNet guidance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_image: Option<PathBuf>,
}

/// One abstract generation request. Never mutated after compilation; the
/// pipeline shares it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub media_kind: MediaKind,
    pub mode: GenerationMode,
    /// Registry reference: model name, backend name, or path.
    pub model: String,
    #[serde(default)]
    pub params: GenerationParams,
    #[serde(default)]
    pub assets: InputAssets,
}

impl GenerationRequest {
    pub fn new(
        media_kind: MediaKind,
        mode: GenerationMode,
        model: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            media_kind,
            mode,
            model: model.into(),
            params: GenerationParams {
                prompt: prompt.into(),
                ..Default::default()
            },
            assets: InputAssets::default(),
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.params.seed = Some(seed);
        self
    }

    pub fn with_image(mut self, path: impl AsRef<Path>) -> Self {
        self.assets.image = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_mask(mut self, path: impl AsRef<Path>) -> Self {
        self.assets.mask = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_audio(mut self, path: impl AsRef<Path>) -> Self {
        self.assets.audio = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_lora(mut self, lora: LoraSelection) -> Self {
        self.params.lora = Some(lora);
        self
    }

    pub fn with_control(mut self, settings: ControlSettings, image: impl AsRef<Path>) -> Self {
        self.params.control = Some(settings);
        self.assets.control_image = Some(image.as_ref().to_path_buf());
        self
    }
}
