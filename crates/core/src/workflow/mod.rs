//! Workflow compiler: turns a [`GenerationRequest`] plus the [`ModelEntry`]
//! it targets into an immutable [`WorkflowGraph`].
//!
//! [`ModelEntry`]: crate::registry::ModelEntry

pub mod builders;
pub mod compiler;
pub mod graph;
pub mod limits;
pub mod prompt;
pub mod request;

pub use compiler::{resolve_adapters, resolve_seed, BuilderTable};
pub use graph::{AssetKind, GraphAsset, NodeRef, WorkflowGraph};
pub use prompt::{enhance_prompt, PromptStyle};
pub use request::{
    ControlPreprocessor, ControlSettings, GenerationParams, GenerationRequest, InputAssets,
    LoraSelection,
};
