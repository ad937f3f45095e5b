use std::fmt;

use serde::{Deserialize, Serialize};

/// Engine-local job identifier.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// The kind of media a request produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Voice,
    Music,
}

impl MediaKind {
    pub const ALL: [MediaKind; 4] = [
        MediaKind::Image,
        MediaKind::Video,
        MediaKind::Voice,
        MediaKind::Music,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Voice => "voice",
            MediaKind::Music => "music",
        }
    }

    /// File extension used when the backend does not report one.
    pub fn default_extension(self) -> &'static str {
        match self {
            MediaKind::Image => "png",
            MediaKind::Video => "mp4",
            MediaKind::Voice | MediaKind::Music => "wav",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a request uses its model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    Create,
    Edit,
    Upscale,
    VoiceClone,
    MelodyConditioned,
}

impl GenerationMode {
    pub const ALL: [GenerationMode; 5] = [
        GenerationMode::Create,
        GenerationMode::Edit,
        GenerationMode::Upscale,
        GenerationMode::VoiceClone,
        GenerationMode::MelodyConditioned,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GenerationMode::Create => "create",
            GenerationMode::Edit => "edit",
            GenerationMode::Upscale => "upscale",
            GenerationMode::VoiceClone => "voice_clone",
            GenerationMode::MelodyConditioned => "melody_conditioned",
        }
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
