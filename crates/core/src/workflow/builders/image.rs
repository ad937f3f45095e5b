//! Image graphs: create (optionally ControlNet-guided), edit (img2img /
//! inpaint), upscale. Create and edit route through a LoRA when selected.

use crate::error::CoreError;
use crate::registry::Family;
use crate::workflow::graph::{val, AssetKind, GraphBuilder, Input, WorkflowGraph};
use crate::workflow::request::ControlPreprocessor;

use super::{
    apply_lora, checkpoint, ksampler, save_image, text_conditioning, BuildContext,
    ResolvedAdapter, SamplerInputs,
};

/// Distilled guidance applied to Flux conditioning.
const FLUX_GUIDANCE: f64 = 3.5;

/// Pixels the inpaint mask is grown by before encoding.
const INPAINT_GROW_MASK_BY: u32 = 6;

const CANNY_LOW_THRESHOLD: u32 = 100;
const CANNY_HIGH_THRESHOLD: u32 = 200;
const DEPTH_ANGLE: f64 = std::f64::consts::TAU;
const DEPTH_BG_THRESHOLD: f64 = 0.1;

/// conditioning -> [controlnet] -> sampler -> decode.
pub fn create(ctx: &BuildContext<'_>) -> Result<WorkflowGraph, CoreError> {
    let mut g = ctx.graph();
    let ckpt = checkpoint(&mut g, ctx);
    let (model, clip) = apply_lora(&mut g, ctx, ckpt.out(0), ckpt.out(1));
    let (positive, negative) = conditioning(&mut g, ctx, clip);
    let (positive, negative) = match &ctx.adapters.controlnet {
        Some(controlnet) => apply_control(&mut g, ctx, controlnet, positive, negative)?,
        None => (positive, negative),
    };
    let latent = g.add(
        "EmptyLatentImage",
        [
            ("width", val(ctx.width())),
            ("height", val(ctx.height())),
            ("batch_size", val(1)),
        ],
    );
    let sampler = ksampler(
        &mut g,
        ctx,
        SamplerInputs {
            model,
            positive,
            negative,
            latent: latent.out(0),
            denoise: 1.0,
        },
    );
    let decoded = g.add(
        "VAEDecode",
        [("samples", sampler.out(0)), ("vae", ckpt.out(2))],
    );
    save_image(&mut g, ctx, decoded.out(0));
    Ok(g.finish(ctx.seed))
}

/// image-encode -> partial-denoise sampler -> decode. A mask switches the
/// encoder to the inpainting variant and defaults strength to full.
pub fn edit(ctx: &BuildContext<'_>) -> Result<WorkflowGraph, CoreError> {
    let image = ctx.image()?;
    let mut g = ctx.graph();
    let ckpt = checkpoint(&mut g, ctx);
    let (model, clip) = apply_lora(&mut g, ctx, ckpt.out(0), ckpt.out(1));
    let (positive, negative) = conditioning(&mut g, ctx, clip);
    let source = g.add_asset_loader("LoadImage", "image", image, AssetKind::Image, vec![]);

    let (encoded, denoise) = match ctx.mask() {
        Some(mask) => {
            let mask_node = g.add_asset_loader(
                "LoadImageMask",
                "image",
                mask,
                AssetKind::Mask,
                vec![("channel", val("red"))],
            );
            let encoded = g.add(
                "VAEEncodeForInpaint",
                [
                    ("pixels", source.out(0)),
                    ("vae", ckpt.out(2)),
                    ("mask", mask_node.out(0)),
                    ("grow_mask_by", val(INPAINT_GROW_MASK_BY)),
                ],
            );
            (encoded, ctx.params().denoise.unwrap_or(1.0))
        }
        None => {
            let encoded = g.add(
                "VAEEncode",
                [("pixels", source.out(0)), ("vae", ckpt.out(2))],
            );
            (encoded, ctx.denoise())
        }
    };

    let sampler = ksampler(
        &mut g,
        ctx,
        SamplerInputs {
            model,
            positive,
            negative,
            latent: encoded.out(0),
            denoise,
        },
    );
    let decoded = g.add(
        "VAEDecode",
        [("samples", sampler.out(0)), ("vae", ckpt.out(2))],
    );
    save_image(&mut g, ctx, decoded.out(0));
    Ok(g.finish(ctx.seed))
}

/// Single upscale node, no sampler, no decode.
pub fn upscale(ctx: &BuildContext<'_>) -> Result<WorkflowGraph, CoreError> {
    let image = ctx.image()?;
    let mut g = ctx.graph();
    let source = g.add_asset_loader("LoadImage", "image", image, AssetKind::Image, vec![]);
    let model = g.add(
        "UpscaleModelLoader",
        [("model_name", val(ctx.model_name()))],
    );
    let upscaled = g.add(
        "ImageUpscaleWithModel",
        [("upscale_model", model.out(0)), ("image", source.out(0))],
    );
    save_image(&mut g, ctx, upscaled.out(0));
    Ok(g.finish(ctx.seed))
}

// ---- private helpers ----

fn conditioning(g: &mut GraphBuilder, ctx: &BuildContext<'_>, clip: Input) -> (Input, Input) {
    let (positive, negative) = text_conditioning(g, clip, ctx.prompt(), ctx.negative_prompt());
    if ctx.entry.family == Family::Flux {
        let guided = g.add(
            "FluxGuidance",
            [
                ("conditioning", positive.out(0)),
                ("guidance", val(FLUX_GUIDANCE)),
            ],
        );
        return (guided.out(0), negative.out(0));
    }
    (positive.out(0), negative.out(0))
}

/// Load the control image, derive its hint map and apply the ControlNet to
/// both conditionings.
fn apply_control(
    g: &mut GraphBuilder,
    ctx: &BuildContext<'_>,
    controlnet: &ResolvedAdapter,
    positive: Input,
    negative: Input,
) -> Result<(Input, Input), CoreError> {
    let image = ctx.control_image()?;
    let loader = g.add(
        "ControlNetLoader",
        [("control_net_name", val(controlnet.backend_name.as_str()))],
    );
    let source = g.add_asset_loader("LoadImage", "image", image, AssetKind::Image, vec![]);
    let preprocessor = ctx
        .params()
        .control
        .as_ref()
        .map(|c| c.preprocessor)
        .unwrap_or_default();
    let hint = match preprocessor {
        ControlPreprocessor::None => source.out(0),
        ControlPreprocessor::Canny => g
            .add(
                "CannyEdgePreprocessor",
                [
                    ("image", source.out(0)),
                    ("low_threshold", val(CANNY_LOW_THRESHOLD)),
                    ("high_threshold", val(CANNY_HIGH_THRESHOLD)),
                ],
            )
            .out(0),
        ControlPreprocessor::Depth => g
            .add(
                "MiDaS-DepthMapPreprocessor",
                [
                    ("image", source.out(0)),
                    ("a", val(DEPTH_ANGLE)),
                    ("bg_threshold", val(DEPTH_BG_THRESHOLD)),
                ],
            )
            .out(0),
        ControlPreprocessor::LineArt => g
            .add(
                "LineArtPreprocessor",
                [("image", source.out(0)), ("coarse", val("disable"))],
            )
            .out(0),
    };
    let applied = g.add(
        "ControlNetApplyAdvanced",
        [
            ("positive", positive),
            ("negative", negative),
            ("control_net", loader.out(0)),
            ("image", hint),
            ("strength", val(controlnet.strength)),
            ("start_percent", val(0.0)),
            ("end_percent", val(1.0)),
        ],
    );
    Ok((applied.out(0), applied.out(1)))
}
