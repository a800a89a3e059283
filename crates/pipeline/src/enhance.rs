//! Prompt enhancement through a multimodal captioning service.
//!
//! Enhancement is advisory: the worker treats every [`EnhanceError`] as a
//! signal to keep the caller's own prompt, never as a job failure.

use async_trait::async_trait;
use base64::Engine as _;
use dsd_core::imaging;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Public Gemini REST endpoint.
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
/// Captioning model used when none is configured.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

#[derive(Debug, thiserror::Error)]
pub enum EnhanceError {
    /// No credential configured; enhancement is switched off.
    #[error("Prompt enhancement is not configured")]
    Disabled,

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Captioning API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    #[error("Captioning API returned no text")]
    EmptyResponse,

    #[error("Failed to encode reference image: {0}")]
    Encode(String),
}

/// Rewrites a prompt with knowledge of the conditioning image.
#[async_trait]
pub trait PromptEnhancer: Send + Sync {
    async fn enhance(&self, image: &DynamicImage, prompt: &str) -> Result<String, EnhanceError>;
}

/// Enhancer used when no API key is configured. Always declines.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledEnhancer;

#[async_trait]
impl PromptEnhancer for DisabledEnhancer {
    async fn enhance(&self, _image: &DynamicImage, _prompt: &str) -> Result<String, EnhanceError> {
        Err(EnhanceError::Disabled)
    }
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [RequestPart<'a>; 2],
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum RequestPart<'a> {
    Text(String),
    InlineData { mime_type: &'a str, data: String },
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Gemini `generateContent` client.
pub struct GeminiEnhancer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiEnhancer {
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_base_url(reqwest::Client::new(), api_key, model, DEFAULT_GEMINI_BASE_URL.into())
    }

    /// Point the client at a different host (used by tests).
    pub fn with_base_url(
        client: reqwest::Client,
        api_key: String,
        model: String,
        base_url: String,
    ) -> Self {
        Self {
            client,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn instruction(prompt: &str) -> String {
        format!(
            "You write prompts for a subject-driven image generator. The attached image \
             shows the reference subject. Rewrite the user's prompt so it names and \
             describes that subject precisely (appearance, colours, distinctive details) \
             while keeping the scene the user asked for. Answer with the rewritten \
             prompt only, on a single line.\n\nUser prompt: {prompt}"
        )
    }
}

#[async_trait]
impl PromptEnhancer for GeminiEnhancer {
    async fn enhance(&self, image: &DynamicImage, prompt: &str) -> Result<String, EnhanceError> {
        let png = imaging::encode_png(image).map_err(|e| EnhanceError::Encode(e.to_string()))?;
        let body = GenerateContentRequest {
            contents: [Content {
                parts: [
                    RequestPart::Text(Self::instruction(prompt)),
                    RequestPart::InlineData {
                        mime_type: "image/png",
                        data: base64::engine::general_purpose::STANDARD.encode(png),
                    },
                ],
            }],
        };

        let response = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            ))
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(EnhanceError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateContentResponse = response.json().await?;
        parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.text)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(EnhanceError::EmptyResponse)
    }
}
