//! Produced files and the metadata needed to reproduce them.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{GenerationMode, JobId, MediaKind, Timestamp};
use crate::workflow::{GenerationParams, GenerationRequest};

/// A file written for a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub job_id: JobId,
    pub path: PathBuf,
    pub media_kind: MediaKind,
    pub metadata: ArtifactMetadata,
    pub created_at: Timestamp,
}

/// Settings recall: everything needed to regenerate the same output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub seed: u64,
    pub mode: GenerationMode,
    pub model: String,
    pub family: String,
    /// Parameters as submitted, with the resolved seed filled in.
    pub parameters: GenerationParams,
    /// Wall-clock generation time.
    pub duration_ms: i64,
}

impl Artifact {
    /// A request equal to the original, pinned to the recorded seed.
    ///
    /// Input assets are not part of the artifact and must be attached again
    /// for Edit, Upscale and conditioned modes.
    pub fn replay_request(&self) -> GenerationRequest {
        let mut params = self.metadata.parameters.clone();
        params.seed = Some(self.metadata.seed);
        GenerationRequest {
            media_kind: self.media_kind,
            mode: self.metadata.mode,
            model: self.metadata.model.clone(),
            params,
            assets: Default::default(),
        }
    }
}

/// Deterministic output file name:
/// `{kind}_{YYYYmmdd_HHMMSS}_{job8}_s{seed}[_{index}].{ext}`.
pub fn artifact_file_name(
    media_kind: MediaKind,
    job_id: JobId,
    seed: u64,
    timestamp: Timestamp,
    index: usize,
    extension: &str,
) -> String {
    let short_id: String = job_id.simple().to_string().chars().take(8).collect();
    let suffix = if index == 0 {
        String::new()
    } else {
        format!("_{index}")
    };
    format!(
        "{}_{}_{short_id}_s{seed}{suffix}.{}",
        media_kind.as_str(),
        timestamp.format("%Y%m%d_%H%M%S"),
        extension.trim_start_matches('.'),
    )
}
