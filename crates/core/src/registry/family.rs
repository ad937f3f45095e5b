//! Model family table and filename classification.
//!
//! A family is a cluster of model variants that share a workflow shape and
//! default parameters. Classification walks [`FAMILY_PRIORITY`] in order and
//! returns the first family with a keyword contained in the lowercased file
//! name, so specific variants (`sdxl_lightning_4step`) resolve ahead of the
//! generic family their name also mentions (`sdxl`).

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{GenerationMode, MediaKind};

/// Where a family executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// Local synthesis, no graph-execution service involved.
    Direct,
    /// Compiled to a node graph and submitted to the external service.
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    // Image
    Lightning,
    Turbo,
    Flux,
    Sdxl,
    Standard,
    Upscaler,
    // Video
    Ltxv,
    Wan,
    // Voice
    Chatterbox,
    Xtts,
    F5Tts,
    Bark,
    Tortoise,
    StyleTts,
    // Music
    MusicGen,
    StableAudio,
    AudioCraft,
    Riffusion,
    AudioLdm,
    /// Nothing in the table matched.
    Unknown,
}

/// Priority-ordered keyword table. Earlier rows win.
pub const FAMILY_PRIORITY: &[(Family, &[&str])] = &[
    (Family::Lightning, &["lightning"]),
    (Family::Turbo, &["turbo"]),
    (Family::Ltxv, &["ltx-video", "ltxv", "ltx-2", "ltx2", "ltx"]),
    (Family::Wan, &["wan2", "wan_", "wan-"]),
    (Family::Flux, &["flux"]),
    (
        Family::Upscaler,
        &["esrgan", "ultrasharp", "animesharp", "4x-", "4x_"],
    ),
    (Family::Chatterbox, &["chatterbox"]),
    (Family::Xtts, &["xtts", "coqui"]),
    (Family::F5Tts, &["f5-tts", "f5tts", "f5_tts"]),
    (Family::Bark, &["bark"]),
    (Family::Tortoise, &["tortoise"]),
    (Family::StyleTts, &["styletts", "style-tts", "style_tts"]),
    (Family::MusicGen, &["musicgen"]),
    (
        Family::StableAudio,
        &["stable-audio", "stable_audio", "stableaudio"],
    ),
    (Family::AudioCraft, &["audiocraft", "audiogen"]),
    (Family::Riffusion, &["riffusion"]),
    (Family::AudioLdm, &["audioldm"]),
    (
        Family::Sdxl,
        &["sdxl", "sd_xl", "dreamshaperxl", "juggernautxl", "realvisxl"],
    ),
    (
        Family::Standard,
        &[
            "sd15",
            "sd_15",
            "sd-1",
            "sd_1",
            "v1-5",
            "v1_5",
            "dreamshaper",
            "realisticvision",
            "realistic_vision",
            "realvis",
            "deliberate",
        ],
    ),
];

/// Classify a model file by name. Deterministic; only the final path
/// component is considered.
pub fn classify(filename: &str) -> Family {
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(filename)
        .to_lowercase();

    FAMILY_PRIORITY
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| name.contains(k)))
        .map(|(family, _)| *family)
        .unwrap_or(Family::Unknown)
}

impl Family {
    pub fn as_str(self) -> &'static str {
        match self {
            Family::Lightning => "lightning",
            Family::Turbo => "turbo",
            Family::Flux => "flux",
            Family::Sdxl => "sdxl",
            Family::Standard => "standard",
            Family::Upscaler => "upscaler",
            Family::Ltxv => "ltxv",
            Family::Wan => "wan",
            Family::Chatterbox => "chatterbox",
            Family::Xtts => "xtts",
            Family::F5Tts => "f5tts",
            Family::Bark => "bark",
            Family::Tortoise => "tortoise",
            Family::StyleTts => "styletts",
            Family::MusicGen => "musicgen",
            Family::StableAudio => "stable_audio",
            Family::AudioCraft => "audiocraft",
            Family::Riffusion => "riffusion",
            Family::AudioLdm => "audioldm",
            Family::Unknown => "unknown",
        }
    }

    /// Every classifiable family, i.e. everything except `Unknown`.
    pub fn known() -> impl Iterator<Item = Family> {
        FAMILY_PRIORITY.iter().map(|(family, _)| *family)
    }

    pub fn media_kind(self) -> Option<MediaKind> {
        match self {
            Family::Lightning
            | Family::Turbo
            | Family::Flux
            | Family::Sdxl
            | Family::Standard
            | Family::Upscaler => Some(MediaKind::Image),
            Family::Ltxv | Family::Wan => Some(MediaKind::Video),
            Family::Chatterbox
            | Family::Xtts
            | Family::F5Tts
            | Family::Bark
            | Family::Tortoise
            | Family::StyleTts => Some(MediaKind::Voice),
            Family::MusicGen
            | Family::StableAudio
            | Family::AudioCraft
            | Family::Riffusion
            | Family::AudioLdm => Some(MediaKind::Music),
            Family::Unknown => None,
        }
    }

    pub fn supported_modes(self) -> &'static [GenerationMode] {
        use GenerationMode::*;
        match self {
            Family::Lightning | Family::Turbo | Family::Flux | Family::Sdxl | Family::Standard => {
                &[Create, Edit]
            }
            Family::Upscaler => &[Upscale],
            Family::Ltxv => &[Create, Edit],
            Family::Wan => &[Create],
            Family::Chatterbox
            | Family::Xtts
            | Family::F5Tts
            | Family::Tortoise
            | Family::StyleTts => &[Create, VoiceClone],
            Family::Bark => &[Create],
            Family::MusicGen | Family::AudioCraft => &[Create, MelodyConditioned],
            Family::StableAudio | Family::Riffusion | Family::AudioLdm => &[Create],
            Family::Unknown => &[],
        }
    }

    pub fn supports(self, mode: GenerationMode) -> bool {
        self.supported_modes().contains(&mode)
    }

    pub fn backend_mode(self) -> BackendMode {
        match self {
            Family::Chatterbox => BackendMode::Direct,
            _ => BackendMode::External,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lightning_wins_over_sdxl() {
        assert_eq!(classify("sdxl_lightning_4step.safetensors"), Family::Lightning);
    }

    #[test]
    fn turbo_wins_over_sdxl() {
        assert_eq!(classify("sd_xl_turbo_1.0_fp16.safetensors"), Family::Turbo);
    }

    #[test]
    fn sdxl_wins_over_standard() {
        assert_eq!(classify("dreamshaperXL_v21.safetensors"), Family::Sdxl);
        assert_eq!(classify("dreamshaper_8.safetensors"), Family::Standard);
    }

    #[test]
    fn classify_is_case_insensitive() {
        assert_eq!(classify("FLUX1-dev-fp8.safetensors"), Family::Flux);
    }

    #[test]
    fn classify_ignores_directories() {
        assert_eq!(
            classify("/models/flux/sd15_base.safetensors"),
            Family::Standard
        );
    }

    #[test]
    fn classify_is_deterministic() {
        let names = [
            "ltx-video-2b-v0.9.safetensors",
            "wan2.1_t2v_1.3B.safetensors",
            "4x-UltraSharp.pth",
            "musicgen_small.bin",
            "random_weights.ckpt",
        ];
        for name in names {
            let first = classify(name);
            for _ in 0..3 {
                assert_eq!(classify(name), first);
            }
        }
    }

    #[test]
    fn unmatched_names_are_unknown() {
        assert_eq!(classify("mystery.safetensors"), Family::Unknown);
        assert!(Family::Unknown.media_kind().is_none());
        assert!(Family::Unknown.supported_modes().is_empty());
    }

    #[test]
    fn audio_families_classify() {
        assert_eq!(classify("xtts_v2.pth"), Family::Xtts);
        assert_eq!(classify("F5-TTS_base.safetensors"), Family::F5Tts);
        assert_eq!(classify("stable-audio-open-1.0.safetensors"), Family::StableAudio);
        assert_eq!(classify("audioldm2-music.ckpt"), Family::AudioLdm);
    }

    #[test]
    fn only_chatterbox_is_direct() {
        for family in Family::known() {
            let expected = if family == Family::Chatterbox {
                BackendMode::Direct
            } else {
                BackendMode::External
            };
            assert_eq!(family.backend_mode(), expected, "{family}");
        }
    }

    #[test]
    fn every_known_family_has_a_media_kind_and_modes() {
        for family in Family::known() {
            assert!(family.media_kind().is_some(), "{family}");
            assert!(!family.supported_modes().is_empty(), "{family}");
        }
    }
}
