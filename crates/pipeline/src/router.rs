//! Backend selection per request.
//!
//! The entry's backend mode picks the target. Every request probes its
//! target with a bounded timeout; nothing is cached, because a backend
//! that was down a minute ago may be up now (and the reverse).

use std::sync::Arc;
use std::time::Duration;

use forge_core::backend::ExecutionBackend;
use forge_core::registry::{BackendMode, ModelEntry};

use crate::error::EngineError;

pub struct BackendRouter {
    external: Arc<dyn ExecutionBackend>,
    direct: Arc<dyn ExecutionBackend>,
    probe_timeout: Duration,
}

impl BackendRouter {
    pub fn new(
        external: Arc<dyn ExecutionBackend>,
        direct: Arc<dyn ExecutionBackend>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            external,
            direct,
            probe_timeout,
        }
    }

    /// Pick and probe the backend for `entry`.
    pub async fn route(&self, entry: &ModelEntry) -> Result<Arc<dyn ExecutionBackend>, EngineError> {
        let backend = match entry.backend_mode {
            BackendMode::Direct => Arc::clone(&self.direct),
            BackendMode::External => Arc::clone(&self.external),
        };

        let probe = tokio::time::timeout(self.probe_timeout, backend.probe()).await;
        let message = match probe {
            Ok(Ok(())) => {
                tracing::debug!(backend = backend.name(), model = %entry.name, "Backend reachable");
                return Ok(backend);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "no response within {} ms",
                self.probe_timeout.as_millis()
            ),
        };

        tracing::warn!(
            backend = backend.name(),
            model = %entry.name,
            error = %message,
            "Backend reachability probe failed",
        );
        Err(EngineError::BackendUnreachable {
            backend: backend.name(),
            message,
        })
    }

    pub fn external(&self) -> &Arc<dyn ExecutionBackend> {
        &self.external
    }

    pub fn direct(&self) -> &Arc<dyn ExecutionBackend> {
        &self.direct
    }
}
