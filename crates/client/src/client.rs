//! HTTP client for submitting jobs and collecting their output.

use dsd_core::job::{GenerationParams, JobId};
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backoff::{next_delay, BackoffConfig};
use crate::error::ClientError;

/// One job to submit.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub image: Vec<u8>,
    /// File name sent with the image part.
    pub file_name: String,
    pub params: GenerationParams,
}

/// How the server accepted a submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Submitted {
    /// Generated inline; these are the output bytes.
    Immediate(Vec<u8>),
    /// Queued; poll with this id.
    Deferred(JobId),
}

/// Answer to a single poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    Ready(Vec<u8>),
    Processing,
}

#[derive(Deserialize)]
struct DeferredBody {
    request_id: JobId,
}

pub struct GenerationClient {
    client: reqwest::Client,
    base_url: String,
}

impl GenerationClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// POST the job to `/generate`.
    ///
    /// The response content type decides the outcome: an image means the
    /// job ran inline, JSON carries the id of a deferred job.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Submitted, ClientError> {
        let params = &request.params;
        let form = Form::new()
            .part("image", Part::bytes(request.image).file_name(request.file_name))
            .text("text", params.prompt.clone())
            .text("use_gemini", params.enhance_prompt.to_string())
            .text("guidance", params.guidance.to_string())
            .text("i_guidance", params.image_guidance.to_string())
            .text("t_guidance", params.text_guidance.to_string());

        let response = self
            .client
            .post(format!("{}/generate", self.base_url))
            .multipart(form)
            .send()
            .await?;
        let response = ensure_status(response, &[StatusCode::OK]).await?;

        let content_type = content_type(&response);
        if content_type.starts_with("image/") {
            return Ok(Submitted::Immediate(response.bytes().await?.to_vec()));
        }
        if content_type.starts_with("application/json") {
            let text = response.text().await?;
            let body: DeferredBody = serde_json::from_str(&text)
                .map_err(|e| ClientError::UnexpectedResponse(format!("{e}: {text}")))?;
            tracing::info!(request_id = %body.request_id, "Job deferred");
            return Ok(Submitted::Deferred(body.request_id));
        }
        Err(ClientError::UnexpectedResponse(format!(
            "unsupported content type '{content_type}'"
        )))
    }

    /// Ask once whether the output for `id` is available.
    ///
    /// Any status other than 200 or 202 is an error, including the 404 for
    /// an unknown id and the 500 for a failed job.
    pub async fn poll_once(&self, id: JobId) -> Result<PollStatus, ClientError> {
        let response = self
            .client
            .get(format!("{}/result/{id}", self.base_url))
            .send()
            .await?;
        let response = ensure_status(response, &[StatusCode::OK, StatusCode::ACCEPTED]).await?;

        if response.status() == StatusCode::ACCEPTED {
            return Ok(PollStatus::Processing);
        }
        let content_type = content_type(&response);
        if !content_type.starts_with("image/") {
            return Err(ClientError::UnexpectedResponse(format!(
                "expected an image, got '{content_type}'"
            )));
        }
        Ok(PollStatus::Ready(response.bytes().await?.to_vec()))
    }

    /// Poll until the output is ready, the budget runs out or `cancel` fires.
    pub async fn wait_for_result(
        &self,
        id: JobId,
        config: &BackoffConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, ClientError> {
        let started = Instant::now();
        let mut delay = config.initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let status = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                status = self.poll_once(id) => status?,
            };
            if let PollStatus::Ready(bytes) = status {
                tracing::info!(request_id = %id, attempt, "Result ready");
                return Ok(bytes);
            }

            let elapsed = started.elapsed();
            if elapsed >= config.max_total {
                return Err(ClientError::Timeout { waited: elapsed });
            }
            let pause = delay.min(config.max_total - elapsed);
            tracing::info!(
                request_id = %id,
                attempt,
                delay_ms = pause.as_millis() as u64,
                "Still processing",
            );

            // Wait before the next poll, respecting cancellation.
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = tokio::time::sleep(pause) => {}
            }

            delay = next_delay(delay, config);
        }
    }
}

fn content_type(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Pass the response through if its status is one of `expected`, otherwise
/// turn it into [`ClientError::Server`] with the body text.
async fn ensure_status(
    response: reqwest::Response,
    expected: &[StatusCode],
) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if !expected.contains(&status) {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(ClientError::Server {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}
