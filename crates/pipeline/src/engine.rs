//! The shared inference engine and its once-only, retrying initialisation.
//!
//! One engine instance serves the whole process. [`EngineHandle`] owns it:
//!
//! - the first caller of [`EngineHandle::ensure_loaded`] runs the loader
//!   while every concurrent caller waits on the same lock;
//! - a failed load is not cached, the next call tries again;
//! - [`EngineHandle::generate`] holds a second lock for the duration of the
//!   call, so at most one generation computes at a time.

use std::sync::Arc;

use async_trait::async_trait;
use dsd_core::job::GenerationParams;
use image::DynamicImage;
use tokio::sync::Mutex;

// ---------------------------------------------------------------------------
// Pipeline constants
// ---------------------------------------------------------------------------

/// Denoising steps per generation.
pub const NUM_INFERENCE_STEPS: u32 = 28;
/// Output width: conditioning image and result side by side.
pub const OUTPUT_WIDTH: u32 = 1024;
/// Output height.
pub const OUTPUT_HEIGHT: u32 = 512;

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Everything the diffusion pipeline needs for one call.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Square RGB conditioning image at canonical resolution.
    pub image: DynamicImage,
    /// Normalised (single-line) prompt.
    pub prompt: String,
    pub negative_prompt: String,
    pub guidance: f32,
    pub image_guidance: f32,
    pub text_guidance: f32,
    pub num_inference_steps: u32,
    pub width: u32,
    pub height: u32,
    /// Whether `prompt` came from the enhancement service.
    pub prompt_enhanced: bool,
}

impl InferenceRequest {
    pub fn new(
        image: DynamicImage,
        prompt: String,
        params: &GenerationParams,
        prompt_enhanced: bool,
    ) -> Self {
        Self {
            image,
            prompt,
            negative_prompt: String::new(),
            guidance: params.guidance,
            image_guidance: params.image_guidance,
            text_guidance: params.text_guidance,
            num_inference_steps: NUM_INFERENCE_STEPS,
            width: OUTPUT_WIDTH,
            height: OUTPUT_HEIGHT,
            prompt_enhanced,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine could not be brought up (weights missing, sidecar down...).
    #[error("Failed to initialize model pipeline: {0}")]
    Load(String),

    /// The engine was up but the generation itself failed.
    #[error("Inference failed: {0}")]
    Inference(String),
}

/// The diffusion pipeline, treated as an opaque function.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    async fn generate(&self, request: InferenceRequest) -> Result<DynamicImage, EngineError>;
}

/// Builds the engine. Expensive; called until it succeeds once.
#[async_trait]
pub trait EngineLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn InferenceEngine>, EngineError>;
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Lazily initialised, serialised access to the process-wide engine.
pub struct EngineHandle {
    loader: Arc<dyn EngineLoader>,
    slot: Mutex<Option<Arc<dyn InferenceEngine>>>,
    gate: Mutex<()>,
}

impl EngineHandle {
    pub fn new(loader: Arc<dyn EngineLoader>) -> Self {
        Self {
            loader,
            slot: Mutex::new(None),
            gate: Mutex::new(()),
        }
    }

    /// Return the engine, loading it first if needed.
    ///
    /// Idempotent once a load has succeeded.
    pub async fn ensure_loaded(&self) -> Result<Arc<dyn InferenceEngine>, EngineError> {
        let mut slot = self.slot.lock().await;
        if let Some(engine) = slot.as_ref() {
            return Ok(Arc::clone(engine));
        }

        tracing::info!("Loading inference engine");
        match self.loader.load().await {
            Ok(engine) => {
                tracing::info!("Inference engine loaded");
                *slot = Some(Arc::clone(&engine));
                Ok(engine)
            }
            Err(e) => {
                tracing::error!(error = %e, "Inference engine failed to load");
                Err(e)
            }
        }
    }

    /// Whether a load has already succeeded. Never triggers one.
    pub async fn is_loaded(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Run one generation, waiting for any generation already in flight.
    pub async fn generate(&self, request: InferenceRequest) -> Result<DynamicImage, EngineError> {
        let engine = self.ensure_loaded().await?;
        let _turn = self.gate.lock().await;
        engine.generate(request).await
    }
}
