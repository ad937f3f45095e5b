//! Named, saved generation settings.
//!
//! Provides the preset record, name validation, and an ordered book of
//! presets keyed by name. Persistence lives in the pipeline crate.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{GenerationMode, MediaKind, Timestamp};
use crate::workflow::{GenerationParams, GenerationRequest};

/* --------------------------------------------------------------------------
   Validation limits
   -------------------------------------------------------------------------- */

/// Maximum length for a preset name.
pub const MAX_PRESET_NAME_LEN: usize = 100;

/* --------------------------------------------------------------------------
   Types
   -------------------------------------------------------------------------- */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    pub media_kind: MediaKind,
    pub mode: GenerationMode,
    pub model: String,
    pub params: GenerationParams,
    pub created_at: Timestamp,
}

impl Preset {
    /// Capture a request's settings. The seed is dropped so each use of the
    /// preset explores a new variation.
    pub fn from_request(name: &str, request: &GenerationRequest) -> Result<Self, CoreError> {
        validate_preset_name(name)?;
        let mut params = request.params.clone();
        params.seed = None;
        Ok(Self {
            name: name.trim().to_string(),
            media_kind: request.media_kind,
            mode: request.mode,
            model: request.model.clone(),
            params,
            created_at: chrono::Utc::now(),
        })
    }

    /// A request using these settings. Input assets must be attached by
    /// the caller.
    pub fn to_request(&self) -> GenerationRequest {
        GenerationRequest {
            media_kind: self.media_kind,
            mode: self.mode,
            model: self.model.clone(),
            params: self.params.clone(),
            assets: Default::default(),
        }
    }
}

/* --------------------------------------------------------------------------
   Validation functions
   -------------------------------------------------------------------------- */

/// Validate a preset name: non-blank and within length limit.
pub fn validate_preset_name(name: &str) -> Result<(), CoreError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CoreError::Validation(
            "Preset name must not be empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_PRESET_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "Preset name too long: {} chars (max {MAX_PRESET_NAME_LEN})",
            name.chars().count()
        )));
    }
    Ok(())
}

/* --------------------------------------------------------------------------
   Preset book
   -------------------------------------------------------------------------- */

/// Presets ordered by name, unique by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresetBook {
    presets: Vec<Preset>,
}

impl PresetBook {
    pub fn from_presets(presets: Vec<Preset>) -> Self {
        let mut book = Self::default();
        for preset in presets {
            book.upsert(preset);
        }
        book
    }

    /// Insert or replace by name. Returns the replaced preset, if any.
    pub fn upsert(&mut self, preset: Preset) -> Option<Preset> {
        match self.presets.binary_search_by(|p| p.name.cmp(&preset.name)) {
            Ok(i) => Some(std::mem::replace(&mut self.presets[i], preset)),
            Err(i) => {
                self.presets.insert(i, preset);
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Preset> {
        self.presets.iter().find(|p| p.name == name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Preset> {
        let i = self.presets.iter().position(|p| p.name == name)?;
        Some(self.presets.remove(i))
    }

    /// Presets for one media kind, by name.
    pub fn for_media_kind(&self, kind: MediaKind) -> impl Iterator<Item = &Preset> {
        self.presets.iter().filter(move |p| p.media_kind == kind)
    }

    pub fn presets(&self) -> &[Preset] {
        &self.presets
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest::new(MediaKind::Image, GenerationMode::Create, "sd15", "a cat")
            .with_seed(9)
    }

    #[test]
    fn empty_name_rejected() {
        assert_matches!(validate_preset_name("   "), Err(CoreError::Validation(_)));
    }

    #[test]
    fn long_name_rejected() {
        let name = "x".repeat(MAX_PRESET_NAME_LEN + 1);
        assert!(validate_preset_name(&name).is_err());
        assert!(validate_preset_name(&"x".repeat(MAX_PRESET_NAME_LEN)).is_ok());
    }

    #[test]
    fn preset_drops_seed_and_round_trips_settings() {
        let preset = Preset::from_request(" Moody cats ", &request()).unwrap();
        assert_eq!(preset.name, "Moody cats");
        assert_eq!(preset.params.seed, None);
        let req = preset.to_request();
        assert_eq!(req.params.prompt, "a cat");
        assert_eq!(req.model, "sd15");
    }

    #[test]
    fn book_upserts_by_name_in_order() {
        let mut book = PresetBook::default();
        book.upsert(Preset::from_request("b", &request()).unwrap());
        book.upsert(Preset::from_request("a", &request()).unwrap());
        let replaced = book.upsert(Preset::from_request("b", &request()).unwrap());
        assert!(replaced.is_some());
        let names: Vec<_> = book.presets().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(book.remove("a").is_some());
        assert!(book.get("a").is_none());
    }
}
