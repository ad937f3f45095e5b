//! Music graphs: text and style tags plus an optional melody reference
//! feeding one synthesis node.

use crate::error::CoreError;
use crate::types::GenerationMode;
use crate::workflow::graph::{val, AssetKind, GraphBuilder, Input, NodeRef, WorkflowGraph};

use super::{save_audio, text_conditioning, BuildContext};

pub const STABLE_AUDIO_TEXT_ENCODER: &str = "t5_base.safetensors";

pub fn musicgen(ctx: &BuildContext<'_>) -> Result<WorkflowGraph, CoreError> {
    let mut g = ctx.graph();
    let melody = melody_reference(&mut g, ctx)?;
    let mut inputs = vec![
        ("model_name", val(ctx.model_name())),
        ("prompt", val(music_prompt(ctx))),
        ("duration", val(ctx.duration_secs())),
        ("top_k", val(250)),
        ("top_p", val(0.0)),
        ("temperature", val(1.0)),
        ("cfg_coef", val(ctx.cfg())),
        ("seed", val(ctx.seed)),
    ];
    if let Some(node) = melody {
        inputs.push(("melody", node.out(0)));
    }
    finish_with_save(g, ctx, "MusicGenGenerate", 1, inputs)
}

pub fn audiocraft(ctx: &BuildContext<'_>) -> Result<WorkflowGraph, CoreError> {
    let mut g = ctx.graph();
    let melody = melody_reference(&mut g, ctx)?;
    let mut inputs = vec![
        ("model_name", val(ctx.model_name())),
        ("prompt", val(music_prompt(ctx))),
        ("duration", val(ctx.duration_secs())),
        ("seed", val(ctx.seed)),
    ];
    if let Some(node) = melody {
        inputs.push(("melody_conditioning", node.out(0)));
    }
    finish_with_save(g, ctx, "AudioCraftGenerate", 1, inputs)
}

/// Stable Audio runs on the stock latent-audio nodes.
pub fn stable_audio(ctx: &BuildContext<'_>) -> Result<WorkflowGraph, CoreError> {
    let mut g = ctx.graph();
    let ckpt = g.add(
        "CheckpointLoaderSimple",
        [("ckpt_name", val(ctx.model_name()))],
    );
    let clip = g.add(
        "CLIPLoader",
        [
            ("clip_name", val(STABLE_AUDIO_TEXT_ENCODER)),
            ("type", val("stable_audio")),
        ],
    );
    let prompt = music_prompt(ctx);
    let (positive, negative) =
        text_conditioning(&mut g, clip.out(0), &prompt, ctx.negative_prompt());
    let seconds = ctx.duration_secs();
    let timed = g.add(
        "ConditioningStableAudio",
        [
            ("positive", positive.out(0)),
            ("negative", negative.out(0)),
            ("seconds_start", val(0.0)),
            ("seconds_total", val(seconds)),
        ],
    );
    let latent = g.add(
        "EmptyLatentAudio",
        [("seconds", val(seconds)), ("batch_size", val(1))],
    );
    let steps = ctx.steps();
    let sampler = g.add_weighted(
        "KSampler",
        steps,
        [
            ("model", ckpt.out(0)),
            ("positive", timed.out(0)),
            ("negative", timed.out(1)),
            ("latent_image", latent.out(0)),
            ("seed", val(ctx.seed)),
            ("steps", val(steps)),
            ("cfg", val(ctx.cfg())),
            ("sampler_name", val(ctx.profile.sampler)),
            ("scheduler", val(ctx.profile.scheduler)),
            ("denoise", val(1.0)),
        ],
    );
    let decoded = g.add(
        "VAEDecodeAudio",
        [("samples", sampler.out(0)), ("vae", ckpt.out(2))],
    );
    save_audio(&mut g, ctx, decoded.out(0));
    Ok(g.finish(ctx.seed))
}

pub fn riffusion(ctx: &BuildContext<'_>) -> Result<WorkflowGraph, CoreError> {
    let g = ctx.graph();
    let steps = ctx.steps();
    let inputs = vec![
        ("model_name", val(ctx.model_name())),
        ("prompt", val(music_prompt(ctx))),
        ("duration", val(ctx.duration_secs())),
        ("steps", val(steps)),
        ("guidance", val(ctx.cfg())),
        ("seed", val(ctx.seed)),
    ];
    finish_with_save(g, ctx, "RiffusionGenerate", steps, inputs)
}

pub fn audioldm(ctx: &BuildContext<'_>) -> Result<WorkflowGraph, CoreError> {
    let g = ctx.graph();
    let steps = ctx.steps();
    let inputs = vec![
        ("model_name", val(ctx.model_name())),
        ("prompt", val(music_prompt(ctx))),
        ("negative_prompt", val(ctx.negative_prompt())),
        ("duration", val(ctx.duration_secs())),
        ("steps", val(steps)),
        ("guidance", val(ctx.cfg())),
        ("seed", val(ctx.seed)),
    ];
    finish_with_save(g, ctx, "AudioLDMGenerate", steps, inputs)
}

/// Prompt text followed by the style tags, comma separated.
pub fn music_prompt(ctx: &BuildContext<'_>) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if !ctx.prompt().is_empty() {
        parts.push(ctx.prompt());
    }
    parts.extend(
        ctx.params()
            .style_tags
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty()),
    );
    parts.join(", ")
}

// ---- private helpers ----

fn melody_reference(g: &mut GraphBuilder, ctx: &BuildContext<'_>) -> Result<Option<NodeRef>, CoreError> {
    let path = match ctx.mode() {
        GenerationMode::MelodyConditioned => Some(ctx.require_audio()?),
        _ => ctx.audio(),
    };
    Ok(path.map(|p| g.add_asset_loader("LoadAudio", "audio", p, AssetKind::Audio, vec![])))
}

fn finish_with_save(
    mut g: GraphBuilder,
    ctx: &BuildContext<'_>,
    class_type: &str,
    steps: u32,
    inputs: Vec<(&'static str, Input)>,
) -> Result<WorkflowGraph, CoreError> {
    let synth = g.add_weighted(class_type, steps, inputs);
    save_audio(&mut g, ctx, synth.out(0));
    Ok(g.finish(ctx.seed))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::registry::Family;
    use crate::types::MediaKind;
    use crate::workflow::builders::test_support::build;
    use crate::workflow::request::{GenerationParams, GenerationRequest};

    fn request(mode: GenerationMode) -> GenerationRequest {
        GenerationRequest::new(MediaKind::Music, mode, "m", "").with_params(GenerationParams {
            prompt: "calm piano".into(),
            style_tags: vec!["ambient".into(), " lofi ".into()],
            duration_secs: Some(30.0),
            ..Default::default()
        })
    }

    #[test]
    fn prompt_joins_style_tags() {
        let graph = build(musicgen, &request(GenerationMode::Create), "musicgen_small.bin", Family::MusicGen);
        let synth = graph.find_class("MusicGenGenerate").unwrap();
        assert_eq!(synth.value("prompt"), Some(&json!("calm piano, ambient, lofi")));
        assert_eq!(synth.value("duration"), Some(&json!(30.0)));
        assert!(synth.input("melody").is_none());
    }

    #[test]
    fn melody_conditioning_links_reference() {
        let req = request(GenerationMode::MelodyConditioned).with_audio("/in/hum.wav");
        let graph = build(musicgen, &req, "musicgen_melody.bin", Family::MusicGen);
        let load = graph.find_class("LoadAudio").unwrap();
        assert_eq!(
            graph.find_class("MusicGenGenerate").unwrap().input("melody"),
            Some(&load.id.out(0))
        );
    }

    #[test]
    fn stable_audio_is_timed_latent_graph() {
        let graph = build(
            stable_audio,
            &request(GenerationMode::Create),
            "stable-audio-open-1.0.safetensors",
            Family::StableAudio,
        );
        let latent = graph.find_class("EmptyLatentAudio").unwrap();
        assert_eq!(latent.value("seconds"), Some(&json!(30.0)));
        assert_eq!(graph.find_class("KSampler").unwrap().step_weight, 100);
        assert!(graph.contains_class("VAEDecodeAudio"));
    }
}
