//! Async orchestration for the generation engine.
//!
//! Routes compiled jobs to an execution backend, owns each job's
//! lifecycle from submission to artifact retrieval, and keeps the
//! process-scoped state (model registry snapshot, memory signal,
//! history, presets) behind the [`Engine`](engine::Engine) facade.

pub mod direct;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod events;
pub mod progress;
pub mod registry;
pub mod resolver;
pub mod router;
pub mod sampler;
pub mod store;
