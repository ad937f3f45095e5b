//! Domain model for the generation engine: the model registry, workflow
//! compilation, job lifecycle, progress normalization and the execution
//! backend seam. No I/O beyond filesystem scanning lives here.

pub mod artifact;
pub mod backend;
pub mod batch;
pub mod config;
pub mod error;
pub mod hardware;
pub mod history;
pub mod job;
pub mod preset;
pub mod progress;
pub mod registry;
pub mod types;
pub mod workflow;
