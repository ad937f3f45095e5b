//! Prompt enhancement: append quality and style modifiers to a short
//! image prompt.

use std::fmt;
use std::str::FromStr;

use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Modifiers added to every enhanced prompt.
pub const QUALITY_MODIFIERS: &[&str] = &[
    "highly detailed",
    "professional",
    "masterpiece",
    "best quality",
    "sharp focus",
    "intricate details",
    "beautiful lighting",
];

/// Modifiers picked from each, at most.
const MODIFIERS_PER_GROUP: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptStyle {
    /// Infer from keywords in the prompt.
    #[default]
    Auto,
    Photo,
    Art,
    Cinematic,
    Portrait,
    Fantasy,
    Anime,
}

/// Keywords that select a style under [`PromptStyle::Auto`]. Earlier rows
/// win; nothing matching falls back to [`PromptStyle::Art`].
const STYLE_KEYWORDS: &[(PromptStyle, &[&str])] = &[
    (PromptStyle::Photo, &["photo", "photograph", "realistic", "real"]),
    (PromptStyle::Portrait, &["portrait", "headshot", "face", "person"]),
    (PromptStyle::Anime, &["anime", "manga", "cartoon"]),
    (
        PromptStyle::Fantasy,
        &["fantasy", "magic", "dragon", "wizard", "elf"],
    ),
    (PromptStyle::Cinematic, &["movie", "film", "cinematic", "scene"]),
];

impl PromptStyle {
    /// Resolve [`PromptStyle::Auto`] against `prompt`.
    pub fn resolve(self, prompt: &str) -> Self {
        if self != PromptStyle::Auto {
            return self;
        }
        let lower = prompt.to_lowercase();
        STYLE_KEYWORDS
            .iter()
            .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
            .map(|&(style, _)| style)
            .unwrap_or(PromptStyle::Art)
    }

    pub fn modifiers(self) -> &'static [&'static str] {
        match self {
            PromptStyle::Auto => &[],
            PromptStyle::Photo => &["photorealistic", "8k uhd", "dslr", "soft lighting", "film grain"],
            PromptStyle::Art => &[
                "digital art",
                "trending on artstation",
                "concept art",
                "illustration",
            ],
            PromptStyle::Cinematic => &[
                "cinematic lighting",
                "dramatic",
                "volumetric lighting",
                "ray tracing",
            ],
            PromptStyle::Portrait => &["studio lighting", "professional portrait", "bokeh background"],
            PromptStyle::Fantasy => &["fantasy art", "magical", "ethereal glow", "mystical atmosphere"],
            PromptStyle::Anime => &["anime style", "cel shaded", "vibrant colors", "clean linework"],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PromptStyle::Auto => "auto",
            PromptStyle::Photo => "photo",
            PromptStyle::Art => "art",
            PromptStyle::Cinematic => "cinematic",
            PromptStyle::Portrait => "portrait",
            PromptStyle::Fantasy => "fantasy",
            PromptStyle::Anime => "anime",
        }
    }
}

impl fmt::Display for PromptStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PromptStyle {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(PromptStyle::Auto),
            "photo" => Ok(PromptStyle::Photo),
            "art" => Ok(PromptStyle::Art),
            "cinematic" => Ok(PromptStyle::Cinematic),
            "portrait" => Ok(PromptStyle::Portrait),
            "fantasy" => Ok(PromptStyle::Fantasy),
            "anime" => Ok(PromptStyle::Anime),
            other => Err(CoreError::Validation(format!(
                "Unknown prompt style '{other}'"
            ))),
        }
    }
}

/// `prompt, <3 quality modifiers>, <up to 3 style modifiers>`.
///
/// A blank prompt comes back trimmed and otherwise untouched.
pub fn enhance_prompt<R: Rng + ?Sized>(prompt: &str, style: PromptStyle, rng: &mut R) -> String {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return String::new();
    }
    let style = style.resolve(prompt);

    let mut parts = vec![prompt];
    parts.extend(QUALITY_MODIFIERS.choose_multiple(rng, MODIFIERS_PER_GROUP).copied());
    parts.extend(style.modifiers().choose_multiple(rng, MODIFIERS_PER_GROUP).copied());
    parts.join(", ")
}
