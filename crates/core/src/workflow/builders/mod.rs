//! Graph builders, one set per media kind.
//!
//! Every builder receives a [`BuildContext`] whose request has already
//! passed validation, and fills a family/mode template with the resolved
//! parameters.

pub mod image;
pub mod music;
pub mod video;
pub mod voice;

use std::path::Path;

use crate::error::CoreError;
use crate::registry::ModelEntry;
use crate::types::GenerationMode;

use super::graph::{val, GraphBuilder, Input, NodeRef, WorkflowGraph};
use super::limits::{FamilyProfile, DEFAULT_EDIT_DENOISE};
use super::request::{GenerationParams, GenerationRequest};

/// Signature shared by every registered builder.
pub type GraphBuilderFn = fn(&BuildContext<'_>) -> Result<WorkflowGraph, CoreError>;

/// An adapter file the backend should load, with its weight.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAdapter {
    pub backend_name: String,
    pub strength: f64,
}

/// LoRA and ControlNet weights a request resolved to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedAdapters {
    pub lora: Option<ResolvedAdapter>,
    pub controlnet: Option<ResolvedAdapter>,
}

/// Everything a builder may read.
#[derive(Debug)]
pub struct BuildContext<'a> {
    pub request: &'a GenerationRequest,
    pub entry: &'a ModelEntry,
    pub profile: &'a FamilyProfile,
    pub adapters: ResolvedAdapters,
    pub seed: u64,
}

impl<'a> BuildContext<'a> {
    pub fn params(&self) -> &'a GenerationParams {
        &self.request.params
    }

    pub fn mode(&self) -> GenerationMode {
        self.request.mode
    }

    pub fn graph(&self) -> GraphBuilder {
        GraphBuilder::new(format!(
            "{}/{}/{}",
            self.request.media_kind, self.request.mode, self.entry.family
        ))
    }

    pub fn model_name(&self) -> &'a str {
        &self.entry.backend_name
    }

    pub fn prompt(&self) -> &'a str {
        self.params().prompt.trim()
    }

    pub fn negative_prompt(&self) -> &'a str {
        self.params().negative_prompt.as_deref().unwrap_or("")
    }

    pub fn width(&self) -> u32 {
        self.params().width.unwrap_or(self.profile.width)
    }

    pub fn height(&self) -> u32 {
        self.params().height.unwrap_or(self.profile.height)
    }

    pub fn steps(&self) -> u32 {
        self.params().steps.unwrap_or(self.profile.steps)
    }

    pub fn cfg(&self) -> f64 {
        self.params().cfg.unwrap_or(self.profile.cfg)
    }

    pub fn denoise(&self) -> f64 {
        self.params().denoise.unwrap_or(DEFAULT_EDIT_DENOISE)
    }

    pub fn frames(&self) -> u32 {
        self.params().frames.unwrap_or(self.profile.frames)
    }

    pub fn fps(&self) -> u32 {
        self.params().fps.unwrap_or(self.profile.fps)
    }

    pub fn duration_secs(&self) -> f64 {
        self.params()
            .duration_secs
            .unwrap_or(self.profile.duration_secs)
    }

    pub fn speed(&self) -> f64 {
        self.params().speed.unwrap_or(1.0)
    }

    pub fn image(&self) -> Result<&'a Path, CoreError> {
        self.request
            .assets
            .image
            .as_deref()
            .ok_or_else(|| CoreError::AssetMissing {
                asset: "image",
                mode: self.mode(),
            })
    }

    pub fn control_image(&self) -> Result<&'a Path, CoreError> {
        self.request
            .assets
            .control_image
            .as_deref()
            .ok_or_else(|| CoreError::AssetMissing {
                asset: "control_image",
                mode: self.mode(),
            })
    }

    pub fn mask(&self) -> Option<&'a Path> {
        self.request.assets.mask.as_deref()
    }

    pub fn audio(&self) -> Option<&'a Path> {
        self.request.assets.audio.as_deref()
    }

    /// Reference audio, required in conditioned modes.
    pub fn require_audio(&self) -> Result<&'a Path, CoreError> {
        self.audio().ok_or_else(|| CoreError::AssetMissing {
            asset: "audio",
            mode: self.mode(),
        })
    }

    pub fn filename_prefix(&self) -> String {
        format!("forge/{}", self.request.media_kind)
    }
}

// ---- shared fragments ----

/// Checkpoint loader; outputs are (MODEL, CLIP, VAE).
pub(crate) fn checkpoint(g: &mut GraphBuilder, ctx: &BuildContext<'_>) -> NodeRef {
    g.add(
        "CheckpointLoaderSimple",
        [("ckpt_name", val(ctx.model_name()))],
    )
}

/// Positive and negative text conditioning from one CLIP output.
pub(crate) fn text_conditioning(
    g: &mut GraphBuilder,
    clip: Input,
    positive: &str,
    negative: &str,
) -> (NodeRef, NodeRef) {
    let pos = g.add(
        "CLIPTextEncode",
        [("text", val(positive)), ("clip", clip.clone())],
    );
    let neg = g.add("CLIPTextEncode", [("text", val(negative)), ("clip", clip)]);
    (pos, neg)
}

/// Route MODEL and CLIP through a `LoraLoader` when one is selected.
pub(crate) fn apply_lora(
    g: &mut GraphBuilder,
    ctx: &BuildContext<'_>,
    model: Input,
    clip: Input,
) -> (Input, Input) {
    let Some(lora) = &ctx.adapters.lora else {
        return (model, clip);
    };
    let loader = g.add(
        "LoraLoader",
        [
            ("lora_name", val(lora.backend_name.as_str())),
            ("strength_model", val(lora.strength)),
            ("strength_clip", val(lora.strength)),
            ("model", model),
            ("clip", clip),
        ],
    );
    (loader.out(0), loader.out(1))
}

pub(crate) struct SamplerInputs {
    pub model: Input,
    pub positive: Input,
    pub negative: Input,
    pub latent: Input,
    pub denoise: f64,
}

/// A `KSampler` weighted by its step count.
pub(crate) fn ksampler(
    g: &mut GraphBuilder,
    ctx: &BuildContext<'_>,
    inputs: SamplerInputs,
) -> NodeRef {
    let steps = ctx.steps();
    g.add_weighted(
        "KSampler",
        steps,
        [
            ("model", inputs.model),
            ("positive", inputs.positive),
            ("negative", inputs.negative),
            ("latent_image", inputs.latent),
            ("seed", val(ctx.seed)),
            ("steps", val(steps)),
            ("cfg", val(ctx.cfg())),
            ("sampler_name", val(ctx.profile.sampler)),
            ("scheduler", val(ctx.profile.scheduler)),
            ("denoise", val(inputs.denoise)),
        ],
    )
}

pub(crate) fn save_image(g: &mut GraphBuilder, ctx: &BuildContext<'_>, images: Input) -> NodeRef {
    g.add(
        "SaveImage",
        [
            ("images", images),
            ("filename_prefix", val(ctx.filename_prefix())),
        ],
    )
}

pub(crate) fn save_audio(g: &mut GraphBuilder, ctx: &BuildContext<'_>, audio: Input) -> NodeRef {
    g.add(
        "SaveAudio",
        [
            ("audio", audio),
            ("filename_prefix", val(ctx.filename_prefix())),
        ],
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;

    use crate::registry::{Family, ModelEntry};
    use crate::workflow::graph::WorkflowGraph;
    use crate::workflow::limits::profile;
    use crate::workflow::request::GenerationRequest;

    use super::{BuildContext, GraphBuilderFn, ResolvedAdapters};

    pub fn entry(file: &str, family: Family) -> ModelEntry {
        ModelEntry::from_file(
            PathBuf::from("/models/checkpoints").join(file),
            file.to_string(),
            family,
            1024,
        )
        .unwrap()
    }

    /// Run `builder` for `request` against a synthetic entry.
    pub fn build(
        builder: GraphBuilderFn,
        request: &GenerationRequest,
        file: &str,
        family: Family,
    ) -> WorkflowGraph {
        build_with(builder, request, file, family, ResolvedAdapters::default())
    }

    pub fn build_with(
        builder: GraphBuilderFn,
        request: &GenerationRequest,
        file: &str,
        family: Family,
        adapters: ResolvedAdapters,
    ) -> WorkflowGraph {
        let entry = entry(file, family);
        let profile = profile(family);
        let ctx = BuildContext {
            request,
            entry: &entry,
            profile: &profile,
            adapters,
            seed: 1234,
        };
        builder(&ctx).unwrap()
    }
}
