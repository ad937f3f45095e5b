//! A ComfyUI server as an [`ExecutionBackend`].
//!
//! Submission uploads the graph's input assets, rewrites the loader
//! inputs to the uploaded names and posts the prompt under the job id as
//! client id. Progress arrives over a per-job WebSocket; status, outputs
//! and downloads go through the REST API.

use async_trait::async_trait;
use forge_core::backend::{BackendError, ExecutionBackend, OutputRef, RemoteStatus, Submission};
use forge_core::progress::BackendEvent;
use forge_core::types::JobId;
use forge_core::workflow::WorkflowGraph;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::{rejection_message, ComfyUIApi, ComfyUIApiError};
use crate::client::ComfyUIClient;
use crate::history::{history_outputs, history_status};
use crate::processor::forward_events;
use crate::reconnect::ReconnectConfig;

/// Buffered progress events per job.
const EVENT_BUFFER: usize = 256;

pub struct ComfyUIBackend {
    api: ComfyUIApi,
    client: ComfyUIClient,
    reconnect: ReconnectConfig,
    /// Parent of every per-job stream task; cancelled on shutdown.
    cancel: CancellationToken,
}

impl ComfyUIBackend {
    pub fn new(api_url: &str) -> Self {
        let client = ComfyUIClient::new(api_url.to_string());
        Self {
            api: ComfyUIApi::new(client.api_url().to_string()),
            client,
            reconnect: ReconnectConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn api(&self) -> &ComfyUIApi {
        &self.api
    }

    /// Stop all progress stream tasks.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    // ---- private helpers ----

    /// Upload local assets and return the prompt document with loader
    /// inputs pointing at the uploaded files.
    async fn prepare_prompt(&self, graph: &WorkflowGraph) -> Result<serde_json::Value, BackendError> {
        let mut prompt = graph.to_prompt();
        for asset in &graph.assets {
            let bytes = tokio::fs::read(&asset.path).await.map_err(|e| {
                BackendError::Rejected(format!(
                    "Cannot read input file {}: {e}",
                    asset.path.display()
                ))
            })?;
            let file_name = asset
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "input".to_string());

            let uploaded = self
                .api
                .upload_file(bytes, &file_name)
                .await
                .map_err(map_api_error)?;

            tracing::debug!(
                node = %asset.node.key(),
                file = %uploaded.node_reference(),
                "Uploaded input asset",
            );

            if let Some(inputs) = prompt
                .get_mut(asset.node.key())
                .and_then(|n| n.get_mut("inputs"))
                .and_then(|i| i.as_object_mut())
            {
                inputs.insert(
                    asset.input.clone(),
                    serde_json::Value::String(uploaded.node_reference()),
                );
            }
        }
        Ok(prompt)
    }
}

#[async_trait]
impl ExecutionBackend for ComfyUIBackend {
    fn name(&self) -> &'static str {
        "comfyui"
    }

    async fn probe(&self) -> Result<(), BackendError> {
        self.api
            .system_stats()
            .await
            .map(|_| ())
            .map_err(|e| BackendError::Unreachable(format!("{}: {e}", self.api.api_url())))
    }

    async fn submit(&self, submission: Submission<'_>) -> Result<String, BackendError> {
        let prompt = self.prepare_prompt(submission.graph).await?;
        let client_id = submission.job_id.to_string();

        let response = self
            .api
            .submit_workflow(&prompt, &client_id)
            .await
            .map_err(map_api_error)?;

        tracing::info!(
            job_id = %submission.job_id,
            prompt_id = %response.prompt_id,
            queue_position = response.number,
            "Workflow submitted to ComfyUI",
        );
        Ok(response.prompt_id)
    }

    async fn open_events(
        &self,
        job_id: JobId,
        backend_job_id: &str,
    ) -> Result<mpsc::Receiver<BackendEvent>, BackendError> {
        let connection = self
            .client
            .connect(&job_id.to_string())
            .await
            .map_err(|e| BackendError::StreamUnavailable(e.to_string()))?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(forward_events(
            self.client.clone(),
            connection,
            backend_job_id.to_string(),
            tx,
            self.reconnect.clone(),
            self.cancel.child_token(),
        ));
        Ok(rx)
    }

    async fn poll_status(&self, backend_job_id: &str) -> Result<RemoteStatus, BackendError> {
        let history = self
            .api
            .get_history(backend_job_id)
            .await
            .map_err(map_api_error)?;
        if let Some(status) = history_status(&history, backend_job_id) {
            return Ok(status);
        }

        let queue = self.api.get_queue().await.map_err(map_api_error)?;
        Ok(if queue.is_running(backend_job_id) {
            RemoteStatus::Running
        } else if queue.is_pending(backend_job_id) {
            RemoteStatus::Pending
        } else {
            RemoteStatus::Unknown
        })
    }

    async fn cancel(&self, backend_job_id: &str) -> Result<(), BackendError> {
        let queue = self.api.get_queue().await.map_err(map_api_error)?;
        if queue.is_running(backend_job_id) {
            self.api.interrupt().await.map_err(map_api_error)?;
        } else {
            self.api
                .cancel_execution(backend_job_id)
                .await
                .map_err(map_api_error)?;
        }
        tracing::info!(prompt_id = %backend_job_id, "ComfyUI execution cancelled");
        Ok(())
    }

    async fn collect_outputs(&self, backend_job_id: &str) -> Result<Vec<OutputRef>, BackendError> {
        let history = self
            .api
            .get_history(backend_job_id)
            .await
            .map_err(map_api_error)?;
        if history.get(backend_job_id).is_none() {
            return Err(BackendError::NotFound(backend_job_id.to_string()));
        }
        Ok(history_outputs(&history, backend_job_id))
    }

    async fn fetch_output(&self, output: &OutputRef) -> Result<Vec<u8>, BackendError> {
        match output {
            OutputRef::Remote {
                filename,
                subfolder,
                folder_type,
            } => self
                .api
                .view(filename, subfolder, folder_type)
                .await
                .map_err(map_api_error),
            OutputRef::Local { path } => tokio::fs::read(path)
                .await
                .map_err(|e| BackendError::Transport(format!("{}: {e}", path.display()))),
        }
    }
}

/// Classify an API failure. A 400 from ComfyUI is a validation
/// rejection of the graph; anything else is transport trouble.
fn map_api_error(error: ComfyUIApiError) -> BackendError {
    if error.is_unreachable() {
        return BackendError::Unreachable(error.to_string());
    }
    match error {
        ComfyUIApiError::ApiError { status: 400, body } => {
            BackendError::Rejected(rejection_message(&body))
        }
        ComfyUIApiError::ApiError { status: 404, body } => BackendError::NotFound(body),
        other => BackendError::Transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn bad_request_maps_to_rejection() {
        let err = map_api_error(ComfyUIApiError::ApiError {
            status: 400,
            body: r#"{"error":{"message":"Prompt has no outputs"},"node_errors":{}}"#.into(),
        });
        assert_matches!(err, BackendError::Rejected(msg) if msg == "Prompt has no outputs");
    }

    #[test]
    fn server_error_maps_to_transport() {
        let err = map_api_error(ComfyUIApiError::ApiError {
            status: 500,
            body: "boom".into(),
        });
        assert_matches!(err, BackendError::Transport(_));
    }

    #[tokio::test]
    async fn probe_fails_when_nothing_listens() {
        let backend = ComfyUIBackend::new("http://127.0.0.1:1");
        assert_matches!(backend.probe().await, Err(BackendError::Unreachable(_)));
    }

    #[tokio::test]
    async fn missing_input_asset_is_rejected_before_upload() {
        use forge_core::workflow::graph::{GraphBuilder, AssetKind};

        let mut g = GraphBuilder::new("image/edit/standard");
        g.add_asset_loader(
            "LoadImage",
            "image",
            std::path::Path::new("/nonexistent/forge-input.png"),
            AssetKind::Image,
            vec![],
        );
        let graph = g.finish(1);
        let backend = ComfyUIBackend::new("http://127.0.0.1:1");
        let result = backend
            .submit(Submission {
                job_id: uuid::Uuid::new_v4(),
                graph: &graph,
            })
            .await;
        assert_matches!(result, Err(BackendError::Rejected(msg)) if msg.contains("forge-input.png"));
    }
}
