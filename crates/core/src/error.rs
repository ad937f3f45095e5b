use std::path::PathBuf;

use crate::types::{GenerationMode, MediaKind};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A generic, caller-actionable validation failure.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A mode requires an input asset that the request did not carry.
    #[error("Missing input {asset} required for {mode} requests")]
    AssetMissing {
        asset: &'static str,
        mode: GenerationMode,
    },

    /// A numeric parameter falls outside the family's supported range.
    #[error("Parameter {name} = {value} is outside the supported range {min}..={max} for {family}")]
    UnsupportedParameter {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
        family: &'static str,
    },

    /// The selected model cannot serve this media kind / mode.
    #[error("Model family {family} does not support {media_kind} {mode}")]
    UnsupportedMode {
        family: &'static str,
        media_kind: MediaKind,
        mode: GenerationMode,
    },

    /// No graph builder is registered for the dispatch key.
    #[error("No graph builder registered for ({media_kind}, {mode}, {family})")]
    UnregisteredBuilder {
        media_kind: MediaKind,
        mode: GenerationMode,
        family: &'static str,
    },

    /// A job state transition outside the allowed adjacency list.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Entity not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// True for errors raised by request validation, before any graph exists.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CoreError::Validation(_)
                | CoreError::AssetMissing { .. }
                | CoreError::UnsupportedParameter { .. }
                | CoreError::UnsupportedMode { .. }
        )
    }
}
