//! Video graphs: LTX-Video (text- and image-to-video) and Wan.

use crate::error::CoreError;
use crate::workflow::graph::{val, AssetKind, GraphBuilder, Input, NodeRef, WorkflowGraph};

use super::{ksampler, text_conditioning, BuildContext, SamplerInputs};

/// Text encoder the LTX-Video graphs load alongside the checkpoint.
pub const LTXV_TEXT_ENCODER: &str = "t5xxl_fp16.safetensors";

pub const WAN_TEXT_ENCODER: &str = "umt5_xxl_fp8_e4m3fn_scaled.safetensors";
pub const WAN_VAE: &str = "wan_2.1_vae.safetensors";

/// Negative prompt applied when a video request does not carry one.
pub const DEFAULT_VIDEO_NEGATIVE: &str =
    "low quality, worst quality, deformed, distorted, disfigured, motion smear, blurry";

/// How strongly the first frame follows the input image.
const IMAGE_TO_VIDEO_STRENGTH: f64 = 0.9;

/// LTX-Video text-to-video.
pub fn ltxv_create(ctx: &BuildContext<'_>) -> Result<WorkflowGraph, CoreError> {
    ltxv(ctx, None)
}

/// LTX-Video image-to-video: the source image is written into the first
/// latent frame before sampling.
pub fn ltxv_edit(ctx: &BuildContext<'_>) -> Result<WorkflowGraph, CoreError> {
    let image = ctx.image()?;
    ltxv(ctx, Some(image))
}

/// Wan text-to-video.
pub fn wan_create(ctx: &BuildContext<'_>) -> Result<WorkflowGraph, CoreError> {
    let mut g = ctx.graph();
    let unet = g.add(
        "UNETLoader",
        [
            ("unet_name", val(ctx.model_name())),
            ("weight_dtype", val("default")),
        ],
    );
    let clip = g.add(
        "CLIPLoader",
        [("clip_name", val(WAN_TEXT_ENCODER)), ("type", val("wan"))],
    );
    let vae = g.add("VAELoader", [("vae_name", val(WAN_VAE))]);
    let (positive, negative) =
        text_conditioning(&mut g, clip.out(0), ctx.prompt(), negative_prompt(ctx));
    let latent = g.add(
        "EmptyHunyuanLatentVideo",
        [
            ("width", val(ctx.width())),
            ("height", val(ctx.height())),
            ("length", val(ctx.frames())),
            ("batch_size", val(1)),
        ],
    );
    let sampler = ksampler(
        &mut g,
        ctx,
        SamplerInputs {
            model: unet.out(0),
            positive: positive.out(0),
            negative: negative.out(0),
            latent: latent.out(0),
            denoise: 1.0,
        },
    );
    let decoded = g.add(
        "VAEDecode",
        [("samples", sampler.out(0)), ("vae", vae.out(0))],
    );
    save_video(&mut g, ctx, decoded.out(0));
    Ok(g.finish(ctx.seed))
}

// ---- private helpers ----

fn ltxv(ctx: &BuildContext<'_>, image: Option<&std::path::Path>) -> Result<WorkflowGraph, CoreError> {
    let mut g = ctx.graph();
    let ckpt = g.add(
        "CheckpointLoaderSimple",
        [("ckpt_name", val(ctx.model_name()))],
    );
    let clip = g.add(
        "CLIPLoader",
        [("clip_name", val(LTXV_TEXT_ENCODER)), ("type", val("ltxv"))],
    );
    let (positive, negative) =
        text_conditioning(&mut g, clip.out(0), ctx.prompt(), negative_prompt(ctx));
    let conditioned = g.add(
        "LTXVConditioning",
        [
            ("positive", positive.out(0)),
            ("negative", negative.out(0)),
            ("frame_rate", val(ctx.fps())),
        ],
    );
    let empty = g.add(
        "EmptyLTXVLatentVideo",
        [
            ("width", val(ctx.width())),
            ("height", val(ctx.height())),
            ("length", val(ctx.frames())),
            ("batch_size", val(1)),
        ],
    );

    let latent: Input = match image {
        Some(path) => {
            let source = g.add_asset_loader("LoadImage", "image", path, AssetKind::Image, vec![]);
            let seeded = g.add(
                "LTXVImgToVideoInplace",
                [
                    ("vae", ckpt.out(2)),
                    ("image", source.out(0)),
                    ("latent", empty.out(0)),
                    ("strength", val(IMAGE_TO_VIDEO_STRENGTH)),
                    ("bypass", val(false)),
                ],
            );
            seeded.out(0)
        }
        None => empty.out(0),
    };

    let scheduler = g.add(
        "LTXVScheduler",
        [
            ("steps", val(ctx.steps())),
            ("max_shift", val(2.05)),
            ("base_shift", val(0.95)),
            ("stretch", val(true)),
            ("terminal", val(0.1)),
            ("latent", latent.clone()),
        ],
    );
    let sampler_select = g.add("KSamplerSelect", [("sampler_name", val(ctx.profile.sampler))]);
    let sampled = g.add_weighted(
        "SamplerCustom",
        ctx.steps(),
        [
            ("model", ckpt.out(0)),
            ("add_noise", val(true)),
            ("noise_seed", val(ctx.seed)),
            ("cfg", val(ctx.cfg())),
            ("positive", conditioned.out(0)),
            ("negative", conditioned.out(1)),
            ("sampler", sampler_select.out(0)),
            ("sigmas", scheduler.out(0)),
            ("latent_image", latent),
        ],
    );
    let decoded = g.add(
        "VAEDecode",
        [("samples", sampled.out(0)), ("vae", ckpt.out(2))],
    );
    save_video(&mut g, ctx, decoded.out(0));
    Ok(g.finish(ctx.seed))
}

fn negative_prompt<'a>(ctx: &BuildContext<'a>) -> &'a str {
    match ctx.params().negative_prompt.as_deref() {
        Some(neg) if !neg.trim().is_empty() => neg,
        _ => DEFAULT_VIDEO_NEGATIVE,
    }
}

fn save_video(g: &mut GraphBuilder, ctx: &BuildContext<'_>, images: Input) -> NodeRef {
    g.add(
        "SaveAnimatedWEBP",
        [
            ("images", images),
            ("filename_prefix", val(ctx.filename_prefix())),
            ("fps", val(ctx.fps())),
            ("lossless", val(false)),
            ("quality", val(90)),
            ("method", val("default")),
        ],
    )
}
