//! Voice graphs: text plus an optional reference-audio node feeding one
//! synthesis node.
//!
//! The built-in direct family compiles to a descriptor graph of the same
//! shape; the direct backend reads [`DIRECT_SYNTHESIS_NODE`] instead of
//! submitting it anywhere.

use crate::error::CoreError;
use crate::types::GenerationMode;
use crate::workflow::graph::{val, AssetKind, GraphBuilder, Input, NodeRef, WorkflowGraph};

use super::{save_audio, BuildContext};

/// Class of the synthesis node in direct-mode descriptors.
pub const DIRECT_SYNTHESIS_NODE: &str = "ChatterboxTTS";

pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_BARK_PRESET: &str = "v2/en_speaker_6";
const DEFAULT_EXAGGERATION: f64 = 0.5;
const DEFAULT_CFG_WEIGHT: f64 = 0.5;

/// Built-in direct voice model.
pub fn chatterbox(ctx: &BuildContext<'_>) -> Result<WorkflowGraph, CoreError> {
    let mut g = ctx.graph();
    let reference = reference_audio(&mut g, ctx)?;
    let quality = if ctx.params().high_quality.unwrap_or(false) {
        "quality"
    } else {
        "fast"
    };
    let mut inputs = vec![
        ("model_name", val(ctx.model_name())),
        ("text", val(ctx.prompt())),
        ("quality", val(quality)),
        (
            "exaggeration",
            val(ctx.params().exaggeration.unwrap_or(DEFAULT_EXAGGERATION)),
        ),
        ("cfg_weight", val(DEFAULT_CFG_WEIGHT)),
        ("speed", val(ctx.speed())),
        ("pitch", val(ctx.params().pitch.unwrap_or(0.0))),
        ("seed", val(ctx.seed)),
    ];
    push_reference(&mut inputs, "reference_audio", reference);
    g.add(DIRECT_SYNTHESIS_NODE, inputs);
    Ok(g.finish(ctx.seed))
}

pub fn xtts(ctx: &BuildContext<'_>) -> Result<WorkflowGraph, CoreError> {
    let mut g = ctx.graph();
    let reference = reference_audio(&mut g, ctx)?;
    let loader = g.add("XTTSLoader", [("model_name", val(ctx.model_name()))]);
    let mut inputs = vec![
        ("model", loader.out(0)),
        ("text", val(ctx.prompt())),
        ("language", val(language(ctx))),
        ("speed", val(ctx.speed())),
        ("seed", val(ctx.seed)),
    ];
    push_reference(&mut inputs, "speaker_wav", reference);
    finish_with_save(g, ctx, "XTTSGenerate", inputs)
}

pub fn f5tts(ctx: &BuildContext<'_>) -> Result<WorkflowGraph, CoreError> {
    let mut g = ctx.graph();
    let reference = reference_audio(&mut g, ctx)?;
    let mut inputs = vec![
        ("model_name", val(ctx.model_name())),
        ("text", val(ctx.prompt())),
        ("ref_text", val("")),
        ("speed", val(ctx.speed())),
        ("seed", val(ctx.seed)),
    ];
    push_reference(&mut inputs, "ref_audio", reference);
    finish_with_save(g, ctx, "F5TTSGenerate", inputs)
}

/// Bark speaks in preset voices and cannot clone.
pub fn bark(ctx: &BuildContext<'_>) -> Result<WorkflowGraph, CoreError> {
    let g = ctx.graph();
    let preset = ctx
        .params()
        .voice_preset
        .as_deref()
        .unwrap_or(DEFAULT_BARK_PRESET);
    let inputs = vec![
        ("model_name", val(ctx.model_name())),
        ("text", val(ctx.prompt())),
        ("voice_preset", val(preset)),
        ("seed", val(ctx.seed)),
    ];
    finish_with_save(g, ctx, "BarkGenerate", inputs)
}

pub fn tortoise(ctx: &BuildContext<'_>) -> Result<WorkflowGraph, CoreError> {
    let mut g = ctx.graph();
    let reference = reference_audio(&mut g, ctx)?;
    let preset = if ctx.params().high_quality.unwrap_or(false) {
        "high_quality"
    } else {
        "fast"
    };
    let mut inputs = vec![
        ("model_name", val(ctx.model_name())),
        ("text", val(ctx.prompt())),
        ("preset", val(preset)),
        ("seed", val(ctx.seed)),
    ];
    push_reference(&mut inputs, "voice_audio", reference);
    finish_with_save(g, ctx, "TortoiseGenerate", inputs)
}

pub fn styletts(ctx: &BuildContext<'_>) -> Result<WorkflowGraph, CoreError> {
    let mut g = ctx.graph();
    let reference = reference_audio(&mut g, ctx)?;
    let diffusion_steps = if ctx.params().high_quality.unwrap_or(false) {
        10
    } else {
        5
    };
    let mut inputs = vec![
        ("model_name", val(ctx.model_name())),
        ("text", val(ctx.prompt())),
        ("diffusion_steps", val(diffusion_steps)),
        ("speed", val(ctx.speed())),
        ("seed", val(ctx.seed)),
    ];
    push_reference(&mut inputs, "reference_audio", reference);
    finish_with_save(g, ctx, "StyleTTS2Generate", inputs)
}

// ---- private helpers ----

/// Loads the reference voice. Required for cloning, optional otherwise.
fn reference_audio(g: &mut GraphBuilder, ctx: &BuildContext<'_>) -> Result<Option<NodeRef>, CoreError> {
    let path = match ctx.mode() {
        GenerationMode::VoiceClone => Some(ctx.require_audio()?),
        _ => ctx.audio(),
    };
    Ok(path.map(|p| g.add_asset_loader("LoadAudio", "audio", p, AssetKind::Audio, vec![])))
}

fn push_reference(inputs: &mut Vec<(&'static str, Input)>, key: &'static str, reference: Option<NodeRef>) {
    if let Some(node) = reference {
        inputs.push((key, node.out(0)));
    }
}

fn language<'a>(ctx: &BuildContext<'a>) -> &'a str {
    ctx.params().language.as_deref().unwrap_or(DEFAULT_LANGUAGE)
}

fn finish_with_save(
    mut g: GraphBuilder,
    ctx: &BuildContext<'_>,
    class_type: &str,
    inputs: Vec<(&'static str, Input)>,
) -> Result<WorkflowGraph, CoreError> {
    let synth = g.add(class_type, inputs);
    save_audio(&mut g, ctx, synth.out(0));
    Ok(g.finish(ctx.seed))
}
