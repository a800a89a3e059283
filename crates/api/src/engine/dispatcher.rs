//! Execution dispatcher and status lookup.
//!
//! Every submission gets a fresh [`JobId`] and a persisted input artifact
//! before the Resource Probe is asked anything. The probe's answer at that
//! moment alone decides the mode:
//!
//! - sufficient resources: the worker runs now and the caller waits for the
//!   PNG ([`Submission::Immediate`]);
//! - otherwise: the worker is spawned onto the runtime and the caller gets
//!   the id back ([`Submission::Deferred`]).
//!
//! In both modes the worker runs in its own task, so a dropped connection
//! or a request timeout never cancels a generation half way.

use std::sync::Arc;

use dsd_core::error::CoreError;
use dsd_core::hardware::probe::ResourceProbe;
use dsd_core::job::{GenerationParams, JobId};
use dsd_core::layout::{FailureRecord, JobState};
use dsd_pipeline::worker::{GenerationOutput, GenerationWorker, WorkerError};

/// A validated generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Raw uploaded image bytes, persisted verbatim as the input artifact.
    pub image: Vec<u8>,
    pub params: GenerationParams,
}

/// What [`ExecutionDispatcher::submit`] did with a request.
#[derive(Debug)]
pub enum Submission {
    /// Generated inline; the artifact is returned directly.
    Immediate(GenerationOutput),
    /// Generation continues in the background under this id.
    Deferred(JobId),
}

/// Answer to a status poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Ready(Vec<u8>),
    InProgress,
    Failed(FailureRecord),
    Unknown,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The upload could not be written; no job exists.
    #[error("Failed to save uploaded image: {0}")]
    Persist(#[source] CoreError),

    /// The inline generation failed.
    #[error("Error processing image: {0}")]
    Generation(#[from] WorkerError),
}

pub struct ExecutionDispatcher {
    probe: Arc<dyn ResourceProbe>,
    worker: Arc<GenerationWorker>,
}

impl ExecutionDispatcher {
    pub fn new(probe: Arc<dyn ResourceProbe>, worker: Arc<GenerationWorker>) -> Self {
        Self { probe, worker }
    }

    /// Create a job for `request` and run it inline or in the background.
    ///
    /// Not idempotent: identical requests produce independent jobs.
    pub async fn submit(&self, request: GenerationRequest) -> Result<Submission, DispatchError> {
        let layout = self.worker.layout();
        let id = JobId::new();
        layout
            .write_input(id, &request.image)
            .await
            .map_err(DispatchError::Persist)?;
        let job = layout.job(id, request.params);

        if self.resources_available().await {
            tracing::info!(job_id = %id, "Sufficient resources, generating inline");
            let worker = Arc::clone(&self.worker);
            let output = tokio::spawn(async move { worker.execute(&job).await })
                .await
                .map_err(|e| WorkerError::Aborted(e.to_string()))??;
            Ok(Submission::Immediate(output))
        } else {
            tracing::info!(job_id = %id, "Insufficient resources, deferring generation");
            tokio::spawn(Arc::clone(&self.worker).run_detached(job));
            Ok(Submission::Deferred(id))
        }
    }

    /// Ask the probe on the blocking pool; device queries are synchronous
    /// driver calls. A probe that panics counts as insufficient.
    async fn resources_available(&self) -> bool {
        let probe = Arc::clone(&self.probe);
        match tokio::task::spawn_blocking(move || probe.has_sufficient_resources()).await {
            Ok(sufficient) => sufficient,
            Err(e) => {
                tracing::warn!(error = %e, "Resource probe failed, deferring generation");
                false
            }
        }
    }

    /// Report the state of `id` from the artifacts on disk.
    pub async fn poll(&self, id: JobId) -> Result<PollOutcome, CoreError> {
        let layout = self.worker.layout();
        Ok(match layout.state(id).await? {
            JobState::Ready => PollOutcome::Ready(layout.read_output(id).await?),
            JobState::Failed(record) => PollOutcome::Failed(record),
            JobState::InProgress => PollOutcome::InProgress,
            JobState::Unknown => PollOutcome::Unknown,
        })
    }
}
