//! The Generation Worker.
//!
//! One run takes a [`Job`] whose input artifact is already on disk and
//! leaves exactly one terminal artifact behind: the published output, or a
//! failure marker. Steps:
//!
//! 1. decode the input and centre-crop / resize it to the canonical square;
//! 2. normalise the prompt, then optionally replace it with the enhanced
//!    prompt (falling back to the original on any enhancement error);
//! 3. run the shared inference engine;
//! 4. encode the result as PNG and atomically publish it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dsd_core::error::CoreError;
use dsd_core::imaging::{self, CANONICAL_RESOLUTION};
use dsd_core::job::{normalize_prompt, Job, JobId};
use dsd_core::layout::JobLayout;
use futures::FutureExt;
use image::DynamicImage;

use crate::engine::{EngineError, EngineHandle, InferenceRequest};
use crate::enhance::PromptEnhancer;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The run panicked or its blocking task was cancelled.
    #[error("Generation aborted: {0}")]
    Aborted(String),
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    /// PNG bytes, identical to the published output artifact.
    pub png: Vec<u8>,
    /// The prompt the inference engine actually received.
    pub prompt: String,
    pub prompt_enhanced: bool,
}

pub struct GenerationWorker {
    engine: Arc<EngineHandle>,
    enhancer: Arc<dyn PromptEnhancer>,
    layout: Arc<JobLayout>,
}

impl GenerationWorker {
    pub fn new(
        engine: Arc<EngineHandle>,
        enhancer: Arc<dyn PromptEnhancer>,
        layout: Arc<JobLayout>,
    ) -> Self {
        Self {
            engine,
            enhancer,
            layout,
        }
    }

    pub fn layout(&self) -> &JobLayout {
        &self.layout
    }

    /// Run `job` and make its outcome visible on disk.
    ///
    /// Errors and panics inside the run are caught here and turned into a
    /// failure marker, so a broken job never takes the process down and
    /// never stays "in progress" forever when the marker can be written.
    pub async fn execute(&self, job: &Job) -> Result<GenerationOutput, WorkerError> {
        let outcome = AssertUnwindSafe(self.run(job)).catch_unwind().await;
        let err = match outcome {
            Ok(Ok(output)) => return Ok(output),
            Ok(Err(e)) => e,
            Err(panic) => WorkerError::Aborted(panic_message(panic.as_ref())),
        };

        tracing::error!(job_id = %job.id, error = %err, "Generation failed");
        self.mark_failed(job.id, &err).await;
        Err(err)
    }

    /// Background entry point: execute and log, reporting nothing upward.
    pub async fn run_detached(self: Arc<Self>, job: Job) {
        tracing::info!(job_id = %job.id, "Deferred generation started");
        if let Ok(output) = self.execute(&job).await {
            tracing::info!(
                job_id = %job.id,
                bytes = output.png.len(),
                prompt_enhanced = output.prompt_enhanced,
                "Deferred generation complete",
            );
        }
    }

    /// The generation steps proper, without failure bookkeeping.
    pub async fn run(&self, job: &Job) -> Result<GenerationOutput, WorkerError> {
        let input = tokio::fs::read(&job.input_path)
            .await
            .map_err(CoreError::from)?;
        let image = blocking(move || {
            let decoded = imaging::decode_rgb(&input)?;
            Ok(imaging::normalize_square(&decoded, CANONICAL_RESOLUTION))
        })
        .await?;

        let (prompt, prompt_enhanced) = self.resolve_prompt(job, &image).await;

        let request = InferenceRequest::new(image, prompt.clone(), &job.params, prompt_enhanced);
        let result = self.engine.generate(request).await?;

        let png = blocking(move || imaging::encode_png(&result)).await?;
        self.layout.publish_output(job.id, &png).await?;

        tracing::info!(job_id = %job.id, path = %job.output_path.display(), "Output artifact published");
        Ok(GenerationOutput {
            png,
            prompt,
            prompt_enhanced,
        })
    }

    /// Normalised prompt, replaced by the enhanced one when requested and
    /// available.
    async fn resolve_prompt(&self, job: &Job, image: &DynamicImage) -> (String, bool) {
        let original = normalize_prompt(&job.params.prompt);
        if !job.params.enhance_prompt {
            return (original, false);
        }

        match self.enhancer.enhance(image, &original).await {
            Ok(enhanced) => {
                let enhanced = normalize_prompt(&enhanced);
                tracing::info!(
                    job_id = %job.id,
                    original = %original,
                    enhanced = %enhanced,
                    "Prompt enhanced",
                );
                (enhanced, true)
            }
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Failed to enhance prompt, using original");
                (original, false)
            }
        }
    }

    async fn mark_failed(&self, id: JobId, err: &WorkerError) {
        if let Err(e) = self.layout.record_failure(id, err.to_string()).await {
            tracing::error!(job_id = %id, error = %e, "Failed to record generation failure");
        }
    }
}

/// Run CPU-bound image work on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, WorkerError>
where
    F: FnOnce() -> Result<T, CoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| WorkerError::Aborted(e.to_string()))?
        .map_err(WorkerError::from)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use dsd_core::job::GenerationParams;
    use dsd_core::layout::JobState;

    use crate::engine::{EngineLoader, InferenceEngine};
    use crate::enhance::{DisabledEnhancer, EnhanceError};

    enum Behaviour {
        Succeed,
        Fail,
        Panic,
    }

    struct RecordingEngine {
        behaviour: Behaviour,
        seen: Mutex<Vec<(String, u32, u32)>>,
    }

    #[async_trait]
    impl InferenceEngine for RecordingEngine {
        async fn generate(&self, request: InferenceRequest) -> Result<DynamicImage, EngineError> {
            self.seen.lock().unwrap().push((
                request.prompt.clone(),
                request.image.width(),
                request.image.height(),
            ));
            match self.behaviour {
                Behaviour::Succeed => Ok(DynamicImage::new_rgb8(request.width, request.height)),
                Behaviour::Fail => Err(EngineError::Inference("CUDA out of memory".into())),
                Behaviour::Panic => panic!("engine blew up"),
            }
        }
    }

    struct FixedLoader(Arc<RecordingEngine>);

    #[async_trait]
    impl EngineLoader for FixedLoader {
        async fn load(&self) -> Result<Arc<dyn InferenceEngine>, EngineError> {
            Ok(Arc::clone(&self.0) as Arc<dyn InferenceEngine>)
        }
    }

    struct FixedEnhancer(&'static str);

    #[async_trait]
    impl PromptEnhancer for FixedEnhancer {
        async fn enhance(&self, _image: &DynamicImage, _prompt: &str) -> Result<String, EnhanceError> {
            Ok(self.0.to_string())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        engine: Arc<RecordingEngine>,
        worker: Arc<GenerationWorker>,
    }

    async fn fixture(behaviour: Behaviour, enhancer: Arc<dyn PromptEnhancer>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let layout = Arc::new(JobLayout::new(dir.path().join("up"), dir.path().join("out")));
        layout.ensure_dirs().await.unwrap();
        let engine = Arc::new(RecordingEngine {
            behaviour,
            seen: Mutex::new(Vec::new()),
        });
        let handle = Arc::new(EngineHandle::new(Arc::new(FixedLoader(Arc::clone(&engine)))));
        let worker = Arc::new(GenerationWorker::new(handle, enhancer, layout));
        Fixture {
            _dir: dir,
            engine,
            worker,
        }
    }

    async fn submit(worker: &GenerationWorker, params: GenerationParams) -> Job {
        let id = JobId::new();
        let png = imaging::encode_png(&DynamicImage::new_rgb8(640, 480)).unwrap();
        worker.layout().write_input(id, &png).await.unwrap();
        worker.layout().job(id, params)
    }

    #[tokio::test]
    async fn enhancement_failure_falls_back_to_stripped_prompt() {
        let f = fixture(Behaviour::Succeed, Arc::new(DisabledEnhancer)).await;
        let job = submit(&f.worker, GenerationParams::new("a red cup\n")).await;

        let output = f.worker.execute(&job).await.unwrap();

        assert_eq!(output.prompt, "a red cup");
        assert!(!output.prompt_enhanced);
        assert_eq!(f.worker.layout().state(job.id).await.unwrap(), JobState::Ready);
        assert_eq!(f.worker.layout().read_output(job.id).await.unwrap(), output.png);
    }

    #[tokio::test]
    async fn enhanced_prompt_is_normalised_before_inference() {
        let f = fixture(Behaviour::Succeed, Arc::new(FixedEnhancer("a glossy\r\n red cup\n"))).await;
        let job = submit(&f.worker, GenerationParams::new("a red cup")).await;

        let output = f.worker.execute(&job).await.unwrap();

        assert_eq!(output.prompt, "a glossy red cup");
        assert!(output.prompt_enhanced);
        assert_eq!(f.engine.seen.lock().unwrap()[0].0, "a glossy red cup");
    }

    #[tokio::test]
    async fn enhancer_is_skipped_when_not_requested() {
        let f = fixture(Behaviour::Succeed, Arc::new(FixedEnhancer("ignored"))).await;
        let mut params = GenerationParams::new("plain prompt");
        params.enhance_prompt = false;
        let job = submit(&f.worker, params).await;

        let output = f.worker.execute(&job).await.unwrap();
        assert_eq!(output.prompt, "plain prompt");
    }

    #[tokio::test]
    async fn engine_receives_canonical_square() {
        let f = fixture(Behaviour::Succeed, Arc::new(DisabledEnhancer)).await;
        let job = submit(&f.worker, GenerationParams::new("p")).await;

        f.worker.execute(&job).await.unwrap();

        let seen = f.engine.seen.lock().unwrap();
        assert_eq!((seen[0].1, seen[0].2), (512, 512));
    }

    #[tokio::test]
    async fn engine_failure_leaves_failure_marker() {
        let f = fixture(Behaviour::Fail, Arc::new(DisabledEnhancer)).await;
        let job = submit(&f.worker, GenerationParams::new("p")).await;

        let err = f.worker.execute(&job).await.unwrap_err();
        assert_matches!(err, WorkerError::Engine(EngineError::Inference(_)));

        assert_matches!(
            f.worker.layout().state(job.id).await.unwrap(),
            JobState::Failed(record) if record.error.contains("CUDA out of memory")
        );
    }

    #[tokio::test]
    async fn panicking_engine_is_contained() {
        let f = fixture(Behaviour::Panic, Arc::new(DisabledEnhancer)).await;
        let job = submit(&f.worker, GenerationParams::new("p")).await;

        Arc::clone(&f.worker).run_detached(job.clone()).await;

        assert_matches!(
            f.worker.layout().state(job.id).await.unwrap(),
            JobState::Failed(record) if record.error.contains("engine blew up")
        );
    }

    #[tokio::test]
    async fn corrupt_input_fails_the_job() {
        let f = fixture(Behaviour::Succeed, Arc::new(DisabledEnhancer)).await;
        let id = JobId::new();
        f.worker.layout().write_input(id, b"not a png").await.unwrap();
        let job = f.worker.layout().job(id, GenerationParams::new("p"));

        assert_matches!(f.worker.execute(&job).await, Err(WorkerError::Core(CoreError::Validation(_))));
        assert_matches!(f.worker.layout().state(id).await.unwrap(), JobState::Failed(_));
        assert!(f.engine.seen.lock().unwrap().is_empty());
    }
}
