//! Per-family parameter defaults and supported ranges.

use crate::error::CoreError;
use crate::registry::Family;

use super::request::GenerationParams;

/// Inclusive numeric range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds<T> {
    pub min: T,
    pub max: T,
}

impl<T: PartialOrd + Copy + Into<f64>> Bounds<T> {
    pub const fn new(min: T, max: T) -> Self {
        Self { min, max }
    }

    fn check(&self, name: &'static str, value: T, family: Family) -> Result<(), CoreError> {
        if value < self.min || value > self.max {
            return Err(CoreError::UnsupportedParameter {
                name,
                value: value.into(),
                min: self.min.into(),
                max: self.max.into(),
                family: family.as_str(),
            });
        }
        Ok(())
    }
}

/// Guidance scale accepted by every family.
pub const CFG_BOUNDS: Bounds<f64> = Bounds::new(0.0, 30.0);

/// Edit strength.
pub const DENOISE_BOUNDS: Bounds<f64> = Bounds::new(0.0, 1.0);

/// Default Edit strength when the request leaves it unset.
pub const DEFAULT_EDIT_DENOISE: f64 = 0.7;

/// Strength presets offered for image-to-image.
pub const EDIT_STRENGTH_PRESETS: &[f64] = &[0.3, 0.5, 0.7, 0.9];

/// Voice pitch shift in semitones.
pub const PITCH_BOUNDS: Bounds<f64> = Bounds::new(-12.0, 12.0);

/// Duration presets offered for music.
pub const MUSIC_DURATION_PRESETS: &[f64] = &[5.0, 15.0, 30.0, 60.0];

/// Style tags offered for music prompts.
pub const MUSIC_STYLE_TAGS: &[&str] = &[
    "ambient",
    "electronic",
    "acoustic",
    "orchestral",
    "lofi",
    "rock",
    "jazz",
    "classical",
];

/// Defaults and supported ranges for one family. `None` bounds mean the
/// parameter does not apply to the family and is ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct FamilyProfile {
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub cfg: f64,
    pub sampler: &'static str,
    pub scheduler: &'static str,
    pub frames: u32,
    pub fps: u32,
    pub duration_secs: f64,
    pub dimension_bounds: Option<Bounds<u32>>,
    pub step_bounds: Option<Bounds<u32>>,
    pub frame_bounds: Option<Bounds<u32>>,
    pub duration_bounds: Option<Bounds<f64>>,
    pub speed_bounds: Option<Bounds<f64>>,
}

const BASE: FamilyProfile = FamilyProfile {
    width: 1024,
    height: 1024,
    steps: 25,
    cfg: 7.0,
    sampler: "euler_ancestral",
    scheduler: "normal",
    frames: 0,
    fps: 0,
    duration_secs: 0.0,
    dimension_bounds: None,
    step_bounds: None,
    frame_bounds: None,
    duration_bounds: None,
    speed_bounds: None,
};

const VOICE: FamilyProfile = FamilyProfile {
    steps: 0,
    cfg: 0.0,
    speed_bounds: Some(Bounds::new(0.5, 2.0)),
    ..BASE
};

const MUSIC: FamilyProfile = FamilyProfile {
    steps: 0,
    cfg: 3.0,
    duration_secs: 15.0,
    duration_bounds: Some(Bounds::new(1.0, 60.0)),
    ..BASE
};

/// Defaults and ranges for `family`.
pub fn profile(family: Family) -> FamilyProfile {
    match family {
        Family::Lightning => FamilyProfile {
            steps: 4,
            cfg: 1.5,
            sampler: "euler",
            scheduler: "sgm_uniform",
            dimension_bounds: Some(Bounds::new(512, 2048)),
            step_bounds: Some(Bounds::new(1, 8)),
            ..BASE
        },
        Family::Turbo => FamilyProfile {
            width: 512,
            height: 512,
            steps: 4,
            cfg: 2.0,
            sampler: "dpmpp_sde",
            scheduler: "karras",
            dimension_bounds: Some(Bounds::new(512, 2048)),
            step_bounds: Some(Bounds::new(1, 8)),
            ..BASE
        },
        Family::Flux => FamilyProfile {
            steps: 20,
            cfg: 1.0,
            sampler: "euler",
            scheduler: "simple",
            dimension_bounds: Some(Bounds::new(256, 2048)),
            step_bounds: Some(Bounds::new(1, 50)),
            ..BASE
        },
        Family::Sdxl => FamilyProfile {
            dimension_bounds: Some(Bounds::new(512, 2048)),
            step_bounds: Some(Bounds::new(1, 150)),
            ..BASE
        },
        Family::Standard => FamilyProfile {
            width: 512,
            height: 512,
            dimension_bounds: Some(Bounds::new(256, 1024)),
            step_bounds: Some(Bounds::new(1, 150)),
            ..BASE
        },
        Family::Upscaler => FamilyProfile {
            steps: 0,
            cfg: 0.0,
            ..BASE
        },
        Family::Ltxv => FamilyProfile {
            width: 768,
            height: 512,
            steps: 30,
            cfg: 3.0,
            sampler: "euler",
            scheduler: "ltxv",
            frames: 97,
            fps: 24,
            dimension_bounds: Some(Bounds::new(256, 1280)),
            step_bounds: Some(Bounds::new(1, 100)),
            frame_bounds: Some(Bounds::new(9, 257)),
            ..BASE
        },
        Family::Wan => FamilyProfile {
            width: 832,
            height: 480,
            steps: 30,
            cfg: 6.0,
            sampler: "uni_pc",
            scheduler: "simple",
            frames: 81,
            fps: 16,
            dimension_bounds: Some(Bounds::new(256, 1280)),
            step_bounds: Some(Bounds::new(1, 100)),
            frame_bounds: Some(Bounds::new(5, 161)),
            ..BASE
        },
        Family::Chatterbox
        | Family::Xtts
        | Family::F5Tts
        | Family::Bark
        | Family::StyleTts => VOICE,
        Family::Tortoise => FamilyProfile {
            speed_bounds: None,
            ..VOICE
        },
        Family::MusicGen | Family::AudioCraft => MUSIC,
        Family::StableAudio => FamilyProfile {
            steps: 100,
            cfg: 7.0,
            sampler: "dpmpp_3m_sde",
            scheduler: "exponential",
            step_bounds: Some(Bounds::new(1, 250)),
            duration_bounds: Some(Bounds::new(1.0, 47.0)),
            ..MUSIC
        },
        Family::Riffusion => FamilyProfile {
            steps: 50,
            cfg: 7.0,
            step_bounds: Some(Bounds::new(1, 150)),
            duration_bounds: Some(Bounds::new(1.0, 30.0)),
            ..MUSIC
        },
        Family::AudioLdm => FamilyProfile {
            steps: 200,
            cfg: 2.5,
            step_bounds: Some(Bounds::new(1, 400)),
            duration_bounds: Some(Bounds::new(1.0, 30.0)),
            ..MUSIC
        },
        Family::Unknown => BASE,
    }
}

/// Reject any supplied parameter outside the family's supported range.
pub fn validate_params(family: Family, params: &GenerationParams) -> Result<(), CoreError> {
    let p = profile(family);

    if let Some(bounds) = p.dimension_bounds {
        if let Some(width) = params.width {
            bounds.check("width", width, family)?;
        }
        if let Some(height) = params.height {
            bounds.check("height", height, family)?;
        }
    }
    if let (Some(bounds), Some(steps)) = (p.step_bounds, params.steps) {
        bounds.check("steps", steps, family)?;
    }
    if let (Some(bounds), Some(frames)) = (p.frame_bounds, params.frames) {
        bounds.check("frames", frames, family)?;
    }
    if let (Some(bounds), Some(duration)) = (p.duration_bounds, params.duration_secs) {
        bounds.check("duration_secs", duration, family)?;
    }
    if let (Some(bounds), Some(speed)) = (p.speed_bounds, params.speed) {
        bounds.check("speed", speed, family)?;
    }
    if let Some(cfg) = params.cfg {
        CFG_BOUNDS.check("cfg", cfg, family)?;
    }
    if let Some(denoise) = params.denoise {
        DENOISE_BOUNDS.check("denoise", denoise, family)?;
    }
    if let Some(pitch) = params.pitch {
        PITCH_BOUNDS.check("pitch", pitch, family)?;
    }
    Ok(())
}
