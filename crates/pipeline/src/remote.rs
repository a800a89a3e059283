//! HTTP client for the inference sidecar that hosts the diffusion model.
//!
//! The sidecar exposes two endpoints:
//!
//! | Method | Path     | Body                                          | Success            |
//! |--------|----------|-----------------------------------------------|--------------------|
//! | POST   | `/load`  | JSON [`ModelSource`]                          | any 2xx            |
//! | POST   | `/infer` | multipart: `image` (PNG) + `params` (JSON)    | 2xx with PNG body  |

use std::sync::Arc;

use async_trait::async_trait;
use dsd_core::imaging;
use image::DynamicImage;
use reqwest::multipart::{Form, Part};
use serde::Serialize;

use crate::engine::{EngineError, EngineLoader, InferenceEngine, InferenceRequest};

/// Where the sidecar should load weights from.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSource {
    pub model_path: String,
    pub lora_path: String,
    pub base_model: String,
}

/// Errors from the sidecar HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum RemoteEngineError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The sidecar returned a non-2xx status code.
    #[error("Inference sidecar error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The sidecar answered 2xx but the body was not a usable image.
    #[error("Inference sidecar returned an invalid image: {0}")]
    InvalidImage(String),
}

/// Sidecar wire names for the generation parameters.
#[derive(Debug, Serialize)]
struct InferParams<'a> {
    prompt: &'a str,
    negative_prompt: &'a str,
    num_inference_steps: u32,
    height: u32,
    width: u32,
    guidance_scale: f32,
    guidance_scale_real_i: f32,
    guidance_scale_real_t: f32,
    gemini_prompt: bool,
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Asks the sidecar to load the model, then hands out a [`RemoteEngine`].
pub struct RemoteEngineLoader {
    client: reqwest::Client,
    api_url: String,
    source: ModelSource,
}

impl RemoteEngineLoader {
    /// * `api_url` - Base HTTP URL, e.g. `http://127.0.0.1:8188`.
    pub fn new(api_url: String, source: ModelSource) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, source)
    }

    /// Create a loader reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String, source: ModelSource) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            source,
        }
    }

    async fn request_load(&self) -> Result<(), RemoteEngineError> {
        tracing::info!(
            model_path = %self.source.model_path,
            lora_path = %self.source.lora_path,
            base_model = %self.source.base_model,
            "Requesting model load from inference sidecar",
        );
        let response = self
            .client
            .post(format!("{}/load", self.api_url))
            .json(&self.source)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl EngineLoader for RemoteEngineLoader {
    async fn load(&self) -> Result<Arc<dyn InferenceEngine>, EngineError> {
        self.request_load()
            .await
            .map_err(|e| EngineError::Load(e.to_string()))?;

        Ok(Arc::new(RemoteEngine {
            client: self.client.clone(),
            api_url: self.api_url.clone(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// A loaded model behind the sidecar's `/infer` endpoint.
pub struct RemoteEngine {
    client: reqwest::Client,
    api_url: String,
}

impl RemoteEngine {
    async fn infer(&self, request: &InferenceRequest) -> Result<DynamicImage, RemoteEngineError> {
        let png = imaging::encode_png(&request.image)
            .map_err(|e| RemoteEngineError::InvalidImage(e.to_string()))?;
        let params = InferParams {
            prompt: &request.prompt,
            negative_prompt: &request.negative_prompt,
            num_inference_steps: request.num_inference_steps,
            height: request.height,
            width: request.width,
            guidance_scale: request.guidance,
            guidance_scale_real_i: request.image_guidance,
            guidance_scale_real_t: request.text_guidance,
            gemini_prompt: request.prompt_enhanced,
        };
        let params_json = serde_json::to_string(&params)
            .map_err(|e| RemoteEngineError::InvalidImage(format!("params: {e}")))?;

        let form = Form::new()
            .part(
                "image",
                Part::bytes(png)
                    .file_name("image.png")
                    .mime_str("image/png")?,
            )
            .part("params", Part::text(params_json).mime_str("application/json")?);

        let response = self
            .client
            .post(format!("{}/infer", self.api_url))
            .multipart(form)
            .send()
            .await?;
        let bytes = ensure_success(response).await?.bytes().await?;

        image::load_from_memory(&bytes).map_err(|e| RemoteEngineError::InvalidImage(e.to_string()))
    }
}

#[async_trait]
impl InferenceEngine for RemoteEngine {
    async fn generate(&self, request: InferenceRequest) -> Result<DynamicImage, EngineError> {
        self.infer(&request)
            .await
            .map_err(|e| EngineError::Inference(e.to_string()))
    }
}

/// Ensure the response has a success status code. Returns the response
/// unchanged on success, or a [`RemoteEngineError::ApiError`] containing
/// the status and body text on failure.
async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, RemoteEngineError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(RemoteEngineError::ApiError {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}
