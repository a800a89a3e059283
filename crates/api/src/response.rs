//! Response bodies shared by the generation handlers.

use dsd_core::job::JobId;
use serde::Serialize;

/// Status value reported while a job has no terminal artifact.
pub const STATUS_PROCESSING: &str = "processing";

/// `{ "message", "request_id", "status": "processing" }`.
///
/// Returned with 200 when a submission is deferred and with 202 when a poll
/// finds the job still running.
#[derive(Debug, Serialize)]
pub struct ProcessingResponse {
    pub message: &'static str,
    pub request_id: JobId,
    pub status: &'static str,
}

impl ProcessingResponse {
    pub fn started(request_id: JobId) -> Self {
        Self {
            message: "Processing started",
            request_id,
            status: STATUS_PROCESSING,
        }
    }

    pub fn not_complete(request_id: JobId) -> Self {
        Self {
            message: "Processing not complete",
            request_id,
            status: STATUS_PROCESSING,
        }
    }
}
