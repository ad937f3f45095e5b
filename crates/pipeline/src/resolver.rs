//! Artifact retrieval for completed jobs.
//!
//! Fetches every output the backend reports, writes it into the output
//! directory under a deterministic name and records the job in history.
//! A fetch failure after a reported success is returned as
//! [`EngineError::ArtifactFetch`] and leaves no files behind; the job
//! itself stays `Completed`. A history write failure does not fail the
//! job but is reported alongside the artifacts.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use forge_core::artifact::{artifact_file_name, Artifact, ArtifactMetadata};
use forge_core::backend::{ExecutionBackend, OutputRef};
use forge_core::history::HistoryEntry;
use forge_core::job::Job;

use crate::error::EngineError;
use crate::store::HistoryStore;

/// Artifacts of a completed job.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOutputs {
    pub artifacts: Vec<Artifact>,
    /// Set when the history entry could not be persisted.
    pub history_error: Option<String>,
}

pub struct ArtifactResolver {
    output_dir: PathBuf,
    fetch_timeout: Duration,
    history: Arc<HistoryStore>,
}

impl ArtifactResolver {
    pub fn new(output_dir: PathBuf, fetch_timeout: Duration, history: Arc<HistoryStore>) -> Self {
        Self {
            output_dir,
            fetch_timeout,
            history,
        }
    }

    pub fn output_dir(&self) -> &PathBuf {
        &self.output_dir
    }

    /// Materialize the outputs of a completed job.
    pub async fn resolve(
        &self,
        job: &Job,
        backend: &dyn ExecutionBackend,
    ) -> Result<ResolvedOutputs, EngineError> {
        let fetch_err = |message: String| EngineError::ArtifactFetch {
            job_id: job.id,
            message,
        };

        let backend_job_id = job
            .backend_job_id
            .as_deref()
            .ok_or_else(|| fetch_err("job has no backend id".to_string()))?;

        let outputs = tokio::time::timeout(self.fetch_timeout, backend.collect_outputs(backend_job_id))
            .await
            .map_err(|_| fetch_err("listing outputs timed out".to_string()))?
            .map_err(|e| fetch_err(e.to_string()))?;
        if outputs.is_empty() {
            return Err(fetch_err("backend reported no outputs".to_string()));
        }

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| fetch_err(format!("{}: {e}", self.output_dir.display())))?;

        let mut artifacts = Vec::with_capacity(outputs.len());
        for (index, output) in outputs.iter().enumerate() {
            match self.materialize(job, backend, output, index).await {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => {
                    // Files without a history entry are unreachable; drop them.
                    discard(job, &artifacts).await;
                    return Err(e);
                }
            }
        }

        let entry = HistoryEntry {
            created_at: job.created_at,
            job: job.summary(),
            artifacts: artifacts.clone(),
        };
        let history_error = match self.history.append(entry).await {
            Ok(()) => None,
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to record history entry");
                Some(e.to_string())
            }
        };

        Ok(ResolvedOutputs {
            artifacts,
            history_error,
        })
    }

    /// Fetch one output and write it under its artifact name.
    async fn materialize(
        &self,
        job: &Job,
        backend: &dyn ExecutionBackend,
        output: &OutputRef,
        index: usize,
    ) -> Result<Artifact, EngineError> {
        let fetch_err = |message: String| EngineError::ArtifactFetch {
            job_id: job.id,
            message,
        };

        let bytes = tokio::time::timeout(self.fetch_timeout, backend.fetch_output(output))
            .await
            .map_err(|_| fetch_err(format!("fetching {} timed out", output.file_name())))?
            .map_err(|e| fetch_err(format!("{}: {e}", output.file_name())))?;

        let seed = job.graph.seed;
        let finished_at = job.finished_at.unwrap_or_else(chrono::Utc::now);
        let extension = output
            .extension()
            .unwrap_or_else(|| job.request.media_kind.default_extension().to_string());
        let name = artifact_file_name(
            job.request.media_kind,
            job.id,
            seed,
            finished_at,
            index,
            &extension,
        );
        let path = self.output_dir.join(name);
        if let Err(e) = tokio::fs::write(&path, &bytes).await {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(fetch_err(format!("{}: {e}", path.display())));
        }

        tracing::info!(
            job_id = %job.id,
            path = %path.display(),
            bytes = bytes.len(),
            "Artifact written",
        );

        let mut parameters = job.request.params.clone();
        parameters.seed = Some(seed);
        Ok(Artifact {
            job_id: job.id,
            path,
            media_kind: job.request.media_kind,
            metadata: ArtifactMetadata {
                seed,
                mode: job.request.mode,
                model: job.model.name.clone(),
                family: job.model.family.as_str().to_string(),
                parameters,
                duration_ms: job.elapsed_ms(),
            },
            created_at: finished_at,
        })
    }
}

/// Remove files already written for a job whose retrieval failed.
async fn discard(job: &Job, artifacts: &[Artifact]) {
    for artifact in artifacts {
        if let Err(e) = tokio::fs::remove_file(&artifact.path).await {
            tracing::warn!(
                job_id = %job.id,
                path = %artifact.path.display(),
                error = %e,
                "Failed to remove partial artifact",
            );
        }
    }
}
