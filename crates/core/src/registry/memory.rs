//! Memory footprint estimation and admission badges.
//!
//! Estimates are `size_gb * family_multiplier + family_extra + overhead`.
//! Badges compare that requirement against *available* memory (never
//! total), so they move as the host's load changes.

use serde::{Deserialize, Serialize};

use super::family::Family;
use super::ModelEntry;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Runtime overhead added to every estimate (framework, buffers, activations).
pub const RUNTIME_OVERHEAD_GB: f64 = 1.5;

/// Multiplier used for families without a table entry.
pub const FALLBACK_MULTIPLIER: f64 = 1.5;

/* --------------------------------------------------------------------------
   Admission thresholds (requirement / available)
   -------------------------------------------------------------------------- */

/// At or below this ratio a model comfortably fits.
pub const FITS_MAX_RATIO: f64 = 0.5;

/// At or below this ratio a model fits with little headroom.
pub const TIGHT_MAX_RATIO: f64 = 0.77;

/// At or below this ratio a model may run but risks swapping.
pub const RISKY_MAX_RATIO: f64 = 1.0;

/// Four-tier admission signal shown next to each model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionBadge {
    Fits,
    Tight,
    Risky,
    WontFit,
}

impl AdmissionBadge {
    pub fn as_str(self) -> &'static str {
        match self {
            AdmissionBadge::Fits => "fits",
            AdmissionBadge::Tight => "tight",
            AdmissionBadge::Risky => "risky",
            AdmissionBadge::WontFit => "wont_fit",
        }
    }
}

/// Per-family weight multiplier applied to the on-disk size.
pub fn family_multiplier(family: Family) -> f64 {
    match family {
        Family::Lightning => 1.0,
        Family::Turbo => 1.1,
        Family::Flux => 1.4,
        Family::Sdxl => 1.2,
        Family::Standard => 1.1,
        Family::Upscaler => 1.2,
        Family::Ltxv => 1.8,
        Family::Wan => 2.5,
        Family::Chatterbox => 1.3,
        Family::Xtts => 1.4,
        Family::F5Tts => 1.3,
        Family::Bark => 2.0,
        Family::Tortoise => 2.5,
        Family::StyleTts => 1.2,
        Family::MusicGen => 1.5,
        Family::StableAudio => 1.8,
        Family::AudioCraft => 2.0,
        Family::Riffusion => 1.2,
        Family::AudioLdm => 1.5,
        Family::Unknown => FALLBACK_MULTIPLIER,
    }
}

/// Fixed extra memory for families that load auxiliary encoders.
pub fn family_extra_gb(family: Family) -> f64 {
    match family {
        Family::Ltxv => 1.5,
        Family::Wan => 3.0,
        Family::Flux => 2.0,
        _ => 0.0,
    }
}

/// Estimated peak memory in GB for a model of `family` weighing `size_bytes`.
///
/// Rounded to one decimal; monotonically non-decreasing in `size_bytes`.
pub fn estimate_for(family: Family, size_bytes: u64) -> f64 {
    let size_gb = size_bytes as f64 / BYTES_PER_GB;
    let raw = size_gb * family_multiplier(family) + family_extra_gb(family) + RUNTIME_OVERHEAD_GB;
    (raw * 10.0).round() / 10.0
}

/// Estimated peak memory in GB for a registry entry.
pub fn estimate_memory(entry: &ModelEntry) -> f64 {
    estimate_for(entry.family, entry.size_bytes)
}

/// Badge for a raw requirement against currently available memory.
pub fn badge_for(required_gb: f64, available_gb: f64) -> AdmissionBadge {
    if required_gb <= 0.0 {
        return AdmissionBadge::Fits;
    }
    if available_gb <= 0.0 {
        return AdmissionBadge::WontFit;
    }
    let ratio = required_gb / available_gb;
    if ratio <= FITS_MAX_RATIO {
        AdmissionBadge::Fits
    } else if ratio <= TIGHT_MAX_RATIO {
        AdmissionBadge::Tight
    } else if ratio <= RISKY_MAX_RATIO {
        AdmissionBadge::Risky
    } else {
        AdmissionBadge::WontFit
    }
}

/// Admission badge for `entry` given the currently available memory in GB.
pub fn admission_badge(entry: &ModelEntry, available_gb: f64) -> AdmissionBadge {
    badge_for(entry.estimated_memory_gb, available_gb)
}
