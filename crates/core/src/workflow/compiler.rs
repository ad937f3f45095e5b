//! Request compilation.
//!
//! Dispatch is a static table keyed by `(media kind, mode, family)`; each
//! key maps to exactly one builder. [`BuilderTable::validate_complete`] runs
//! at engine start so a family/mode pair without a builder stops the engine
//! instead of silently falling back to a wrong graph shape.

use std::collections::HashMap;

use crate::error::CoreError;
use crate::registry::{AdapterCatalog, AdapterKind, Family, ModelEntry};
use crate::types::{GenerationMode, MediaKind};

use super::builders::{
    image, music, video, voice, BuildContext, GraphBuilderFn, ResolvedAdapter, ResolvedAdapters,
};
use super::graph::WorkflowGraph;
use super::limits::{profile, validate_params};
use super::request::GenerationRequest;

type DispatchKey = (MediaKind, GenerationMode, Family);

use GenerationMode::{Create, Edit, MelodyConditioned, Upscale, VoiceClone};
use MediaKind::{Image, Music, Video, Voice};

/// Every registered builder.
const REGISTRATIONS: &[(MediaKind, GenerationMode, Family, GraphBuilderFn)] = &[
    // Image
    (Image, Create, Family::Lightning, image::create),
    (Image, Create, Family::Turbo, image::create),
    (Image, Create, Family::Flux, image::create),
    (Image, Create, Family::Sdxl, image::create),
    (Image, Create, Family::Standard, image::create),
    (Image, Edit, Family::Lightning, image::edit),
    (Image, Edit, Family::Turbo, image::edit),
    (Image, Edit, Family::Flux, image::edit),
    (Image, Edit, Family::Sdxl, image::edit),
    (Image, Edit, Family::Standard, image::edit),
    (Image, Upscale, Family::Upscaler, image::upscale),
    // Video
    (Video, Create, Family::Ltxv, video::ltxv_create),
    (Video, Edit, Family::Ltxv, video::ltxv_edit),
    (Video, Create, Family::Wan, video::wan_create),
    // Voice
    (Voice, Create, Family::Chatterbox, voice::chatterbox),
    (Voice, VoiceClone, Family::Chatterbox, voice::chatterbox),
    (Voice, Create, Family::Xtts, voice::xtts),
    (Voice, VoiceClone, Family::Xtts, voice::xtts),
    (Voice, Create, Family::F5Tts, voice::f5tts),
    (Voice, VoiceClone, Family::F5Tts, voice::f5tts),
    (Voice, Create, Family::Bark, voice::bark),
    (Voice, Create, Family::Tortoise, voice::tortoise),
    (Voice, VoiceClone, Family::Tortoise, voice::tortoise),
    (Voice, Create, Family::StyleTts, voice::styletts),
    (Voice, VoiceClone, Family::StyleTts, voice::styletts),
    // Music
    (Music, Create, Family::MusicGen, music::musicgen),
    (Music, MelodyConditioned, Family::MusicGen, music::musicgen),
    (Music, Create, Family::AudioCraft, music::audiocraft),
    (Music, MelodyConditioned, Family::AudioCraft, music::audiocraft),
    (Music, Create, Family::StableAudio, music::stable_audio),
    (Music, Create, Family::Riffusion, music::riffusion),
    (Music, Create, Family::AudioLdm, music::audioldm),
];

/// Immutable builder lookup table.
#[derive(Debug, Clone)]
pub struct BuilderTable {
    builders: HashMap<DispatchKey, GraphBuilderFn>,
}

impl BuilderTable {
    /// The table of every builder shipped with the engine.
    pub fn standard() -> Result<Self, CoreError> {
        let mut table = Self::empty();
        for &(kind, mode, family, builder) in REGISTRATIONS {
            table.register(kind, mode, family, builder)?;
        }
        Ok(table)
    }

    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Register a builder. A key may be registered only once.
    pub fn register(
        &mut self,
        media_kind: MediaKind,
        mode: GenerationMode,
        family: Family,
        builder: GraphBuilderFn,
    ) -> Result<(), CoreError> {
        if self
            .builders
            .insert((media_kind, mode, family), builder)
            .is_some()
        {
            return Err(CoreError::Internal(format!(
                "Duplicate graph builder for ({media_kind}, {mode}, {family})"
            )));
        }
        Ok(())
    }

    pub fn lookup(
        &self,
        media_kind: MediaKind,
        mode: GenerationMode,
        family: Family,
    ) -> Option<GraphBuilderFn> {
        self.builders.get(&(media_kind, mode, family)).copied()
    }

    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    /// Every mode a known family advertises must have a builder.
    pub fn validate_complete(&self) -> Result<(), CoreError> {
        let missing: Vec<String> = Family::known()
            .flat_map(|family| {
                let kind = family.media_kind();
                family
                    .supported_modes()
                    .iter()
                    .filter_map(move |&mode| {
                        let kind = kind?;
                        (!self.builders.contains_key(&(kind, mode, family)))
                            .then(|| format!("({kind}, {mode}, {family})"))
                    })
            })
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Internal(format!(
                "Graph builder table incomplete, missing: {}",
                missing.join(", ")
            )))
        }
    }

    /// Validate `request` against `entry` and build its graph, without any
    /// adapters available.
    pub fn compile(
        &self,
        request: &GenerationRequest,
        entry: &ModelEntry,
    ) -> Result<WorkflowGraph, CoreError> {
        self.compile_with(request, entry, &AdapterCatalog::default())
    }

    /// Validate `request` against `entry`, resolve its adapters in
    /// `adapters` and build its graph.
    ///
    /// All validation happens before any builder runs, so a failure never
    /// leaves a partial graph behind.
    pub fn compile_with(
        &self,
        request: &GenerationRequest,
        entry: &ModelEntry,
        adapters: &AdapterCatalog,
    ) -> Result<WorkflowGraph, CoreError> {
        validate_request(request, entry)?;
        let adapters = resolve_adapters(request, entry, adapters)?;

        let builder = self
            .lookup(request.media_kind, request.mode, entry.family)
            .ok_or_else(|| CoreError::UnregisteredBuilder {
                media_kind: request.media_kind,
                mode: request.mode,
                family: entry.family.as_str(),
            })?;

        let profile = profile(entry.family);
        let ctx = BuildContext {
            request,
            entry,
            profile: &profile,
            adapters,
            seed: resolve_seed(request.params.seed),
        };
        builder(&ctx)
    }
}

/// Supplied seeds are reused verbatim; otherwise a fresh 32-bit seed.
pub fn resolve_seed(requested: Option<u64>) -> u64 {
    requested.unwrap_or_else(|| u64::from(rand::random::<u32>()))
}

/// Input assets a mode cannot run without.
pub fn required_assets(media_kind: MediaKind, mode: GenerationMode) -> &'static [&'static str] {
    match (media_kind, mode) {
        (_, Edit) | (_, Upscale) => &["image"],
        (_, VoiceClone) | (_, MelodyConditioned) => &["audio"],
        (_, Create) => &[],
    }
}

/// Pre-build validation: mode support, assets, prompt, numeric ranges.
pub fn validate_request(request: &GenerationRequest, entry: &ModelEntry) -> Result<(), CoreError> {
    if entry.media_kind != request.media_kind || !entry.supports(request.mode) {
        return Err(CoreError::UnsupportedMode {
            family: entry.family.as_str(),
            media_kind: request.media_kind,
            mode: request.mode,
        });
    }

    for &asset in required_assets(request.media_kind, request.mode) {
        let present = match asset {
            "image" => request.assets.image.is_some(),
            _ => request.assets.audio.is_some(),
        };
        if !present {
            return Err(CoreError::AssetMissing {
                asset,
                mode: request.mode,
            });
        }
    }

    let needs_prompt = match request.media_kind {
        Image | Video => request.mode != Upscale,
        Voice => true,
        Music => request.params.style_tags.is_empty(),
    };
    if needs_prompt && request.params.prompt.trim().is_empty() {
        return Err(CoreError::Validation(match request.media_kind {
            Voice => "Text to speak must not be empty".to_string(),
            _ => "Prompt must not be empty".to_string(),
        }));
    }

    validate_params(entry.family, &request.params)
}

/// Resolve the LoRA and ControlNet a request names and check they can
/// attach to `entry`.
pub fn resolve_adapters(
    request: &GenerationRequest,
    entry: &ModelEntry,
    catalog: &AdapterCatalog,
) -> Result<ResolvedAdapters, CoreError> {
    let params = &request.params;
    let mut resolved = ResolvedAdapters::default();

    if let Some(lora) = &params.lora {
        if request.media_kind != Image || !matches!(request.mode, Create | Edit) {
            return Err(CoreError::Validation(format!(
                "LoRA adapters apply to image create and edit only, not {} {}",
                request.media_kind, request.mode
            )));
        }
        resolved.lora = Some(resolve_adapter(
            catalog,
            AdapterKind::Lora,
            &lora.name,
            lora.strength,
            "lora_strength",
            entry,
        )?);
    }

    match (&params.control, &request.assets.control_image) {
        (Some(control), image) => {
            if request.media_kind != Image || request.mode != Create {
                return Err(CoreError::Validation(format!(
                    "ControlNet guidance applies to image create only, not {} {}",
                    request.media_kind, request.mode
                )));
            }
            if image.is_none() {
                return Err(CoreError::AssetMissing {
                    asset: "control_image",
                    mode: request.mode,
                });
            }
            resolved.controlnet = Some(resolve_adapter(
                catalog,
                AdapterKind::ControlNet,
                &control.model,
                control.strength,
                "control_strength",
                entry,
            )?);
        }
        (None, Some(_)) => {
            return Err(CoreError::Validation(
                "A control image needs ControlNet settings".to_string(),
            ));
        }
        (None, None) => {}
    }

    Ok(resolved)
}

fn resolve_adapter(
    catalog: &AdapterCatalog,
    kind: AdapterKind,
    reference: &str,
    strength: f64,
    strength_name: &'static str,
    entry: &ModelEntry,
) -> Result<ResolvedAdapter, CoreError> {
    let adapter = catalog
        .find(kind, reference)
        .ok_or_else(|| CoreError::NotFound {
            entity: kind.as_str(),
            id: reference.to_string(),
        })?;
    if !adapter.is_compatible(entry.family) {
        return Err(CoreError::Validation(format!(
            "{kind} '{}' targets {} and cannot attach to {} model '{}'",
            adapter.name, adapter.base, entry.family, entry.name
        )));
    }
    if !(0.0..=1.0).contains(&strength) {
        return Err(CoreError::UnsupportedParameter {
            name: strength_name,
            value: strength,
            min: 0.0,
            max: 1.0,
            family: entry.family.as_str(),
        });
    }
    Ok(ResolvedAdapter {
        backend_name: adapter.backend_name.clone(),
        strength,
    })
}
