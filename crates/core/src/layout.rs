//! Identifier-keyed storage layout and derived job state.
//!
//! A job's artifacts live in two flat directories:
//!
//! | Artifact       | Path                               |
//! |----------------|------------------------------------|
//! | input          | `{upload_dir}/{id}_input.png`      |
//! | output         | `{output_dir}/{id}_output.png`     |
//! | failure marker | `{output_dir}/{id}_error.json`     |
//!
//! There is no index file and no status ledger. [`JobLayout::state`] derives
//! progress from which of these files exist, which only holds because every
//! write goes through [`publish`]: a temporary sibling is written and synced,
//! then renamed into place, so an existing output file is always complete.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::CoreError;
use crate::job::{ArtifactRole, GenerationParams, Job, JobId};
use crate::types::Timestamp;

/// Extension of both image artifacts.
pub const ARTIFACT_EXTENSION: &str = "png";

/// Suffix of the failure marker written next to the output artifact.
const FAILURE_SUFFIX: &str = "error.json";

// ---------------------------------------------------------------------------
// Derived state
// ---------------------------------------------------------------------------

/// Persisted record of a generation that will never produce an output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub request_id: JobId,
    pub error: String,
    pub failed_at: Timestamp,
}

/// Job progress as observed on disk.
///
/// Precedence is `Ready` > `Failed` > `InProgress` > `Unknown`.
#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    /// Output artifact exists and is complete.
    Ready,
    /// The worker gave up and left a failure marker.
    Failed(FailureRecord),
    /// Input accepted, no terminal artifact yet.
    InProgress,
    /// Nothing on disk for this identifier.
    Unknown,
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// Maps job identifiers to deterministic artifact paths.
#[derive(Debug, Clone)]
pub struct JobLayout {
    upload_dir: PathBuf,
    output_dir: PathBuf,
}

impl JobLayout {
    pub fn new(upload_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    /// Create both directories if they do not exist yet.
    pub async fn ensure_dirs(&self) -> Result<(), CoreError> {
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        tokio::fs::create_dir_all(&self.output_dir).await?;
        Ok(())
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path of the artifact `role` for job `id`.
    pub fn artifact_path(&self, id: JobId, role: ArtifactRole) -> PathBuf {
        let dir = match role {
            ArtifactRole::Input => &self.upload_dir,
            ArtifactRole::Output => &self.output_dir,
        };
        dir.join(format!("{id}_{}.{ARTIFACT_EXTENSION}", role.as_str()))
    }

    pub fn input_path(&self, id: JobId) -> PathBuf {
        self.artifact_path(id, ArtifactRole::Input)
    }

    pub fn output_path(&self, id: JobId) -> PathBuf {
        self.artifact_path(id, ArtifactRole::Output)
    }

    pub fn failure_path(&self, id: JobId) -> PathBuf {
        self.output_dir.join(format!("{id}_{FAILURE_SUFFIX}"))
    }

    /// Build the [`Job`] for `id` with its resolved artifact paths.
    pub fn job(&self, id: JobId, params: GenerationParams) -> Job {
        Job {
            id,
            params,
            input_path: self.input_path(id),
            output_path: self.output_path(id),
        }
    }

    /// Persist the uploaded input artifact. Written once, before dispatch.
    pub async fn write_input(&self, id: JobId, bytes: &[u8]) -> Result<PathBuf, CoreError> {
        let path = self.input_path(id);
        publish(&path, bytes).await?;
        Ok(path)
    }

    /// Atomically publish the output artifact. After this returns, the job
    /// is `Ready`.
    pub async fn publish_output(&self, id: JobId, bytes: &[u8]) -> Result<PathBuf, CoreError> {
        let path = self.output_path(id);
        publish(&path, bytes).await?;
        Ok(path)
    }

    /// Atomically write the failure marker for `id`.
    pub async fn record_failure(
        &self,
        id: JobId,
        error: impl Into<String>,
    ) -> Result<FailureRecord, CoreError> {
        let record = FailureRecord {
            request_id: id,
            error: error.into(),
            failed_at: chrono::Utc::now(),
        };
        let bytes = serde_json::to_vec_pretty(&record)
            .map_err(|e| CoreError::Internal(format!("Failed to encode failure record: {e}")))?;
        publish(&self.failure_path(id), &bytes).await?;
        Ok(record)
    }

    /// Derive the current state of `id` from the filesystem.
    pub async fn state(&self, id: JobId) -> Result<JobState, CoreError> {
        if tokio::fs::try_exists(self.output_path(id)).await? {
            return Ok(JobState::Ready);
        }

        let failure_path = self.failure_path(id);
        if tokio::fs::try_exists(&failure_path).await? {
            let bytes = tokio::fs::read(&failure_path).await?;
            let record = serde_json::from_slice(&bytes).map_err(|e| {
                CoreError::Internal(format!(
                    "Corrupt failure record {}: {e}",
                    failure_path.display()
                ))
            })?;
            return Ok(JobState::Failed(record));
        }

        if tokio::fs::try_exists(self.input_path(id)).await? {
            return Ok(JobState::InProgress);
        }

        Ok(JobState::Unknown)
    }

    /// Read the published output artifact.
    pub async fn read_output(&self, id: JobId) -> Result<Vec<u8>, CoreError> {
        match tokio::fs::read(self.output_path(id)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CoreError::NotFound {
                entity: "Output artifact",
                id: id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Atomic publish
// ---------------------------------------------------------------------------

/// Write `bytes` to `path` so observers see either nothing or the whole file.
///
/// The data goes to a hidden temporary sibling (same directory, so the
/// rename stays on one filesystem), is flushed and synced, then renamed over
/// `path`. The temporary file is removed if any step fails.
pub async fn publish(path: &Path, bytes: &[u8]) -> Result<(), CoreError> {
    let dir = path.parent().ok_or_else(|| {
        CoreError::Internal(format!("Artifact path {} has no parent", path.display()))
    })?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CoreError::Internal(format!("Invalid artifact path {}", path.display())))?;
    let tmp_path = dir.join(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));

    let result = write_then_rename(&tmp_path, path, bytes).await;
    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(&tmp_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %tmp_path.display(), error = %e, "Failed to remove temporary artifact");
            }
        }
    }
    result
}

async fn write_then_rename(tmp_path: &Path, path: &Path, bytes: &[u8]) -> Result<(), CoreError> {
    let mut file = tokio::fs::File::create(tmp_path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(tmp_path, path).await?;
    Ok(())
}
