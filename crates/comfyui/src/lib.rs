//! ComfyUI WebSocket and REST client library.
//!
//! Provides typed message parsing, WebSocket connection management,
//! HTTP API wrappers, reconnection logic, history parsing, and the
//! [`ComfyUIBackend`](backend::ComfyUIBackend) adapter that exposes a
//! ComfyUI server as an execution backend.

pub mod api;
pub mod backend;
pub mod client;
pub mod events;
pub mod history;
pub mod messages;
pub mod processor;
pub mod reconnect;
