#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use dsd_core::hardware::probe::{ExecutionMode, ResourceProbe};
use dsd_pipeline::engine::{EngineError, EngineLoader, InferenceEngine, InferenceRequest};
use dsd_pipeline::enhance::{DisabledEnhancer, EnhanceError, PromptEnhancer};
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tower::ServiceExt;

use dsd_api::config::{EnhancerConfig, ModelConfig, ProbeConfig, ServerConfig, StorageConfig};
use dsd_api::router::build_app_router;
use dsd_api::state::AppState;

pub const BOUNDARY: &str = "dsd-test-boundary";

/// Build a test `ServerConfig` that stores artifacts under `root`.
pub fn test_config(root: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        max_upload_bytes: 4 * 1024 * 1024,
        storage: StorageConfig {
            upload_dir: root.join("uploads"),
            output_dir: root.join("outputs"),
        },
        model: ModelConfig {
            model_path: "models/transformer".into(),
            lora_path: "models/lora.safetensors".into(),
            base_model: "base".into(),
            inference_url: "http://127.0.0.1:1".into(),
        },
        enhancer: EnhancerConfig {
            api_key: None,
            model: "test-model".into(),
        },
        probe: ProbeConfig {
            execution_mode: ExecutionMode::Auto,
            min_free_vram_gib: 24,
            gpu_device_index: 0,
        },
    }
}

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Probe whose answer can be flipped between requests.
pub struct SwitchProbe(AtomicBool);

impl SwitchProbe {
    pub fn new(sufficient: bool) -> Self {
        Self(AtomicBool::new(sufficient))
    }

    pub fn set(&self, sufficient: bool) {
        self.0.store(sufficient, Ordering::SeqCst);
    }
}

impl ResourceProbe for SwitchProbe {
    fn has_sufficient_resources(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Engine that returns a blank canvas of the requested size.
///
/// With a gate, every generation waits for one permit, so tests can observe
/// jobs while they are in flight.
pub struct FakeEngine {
    gate: Option<Semaphore>,
    fail: bool,
    requests: Mutex<Vec<(String, u32, u32)>>,
}

impl FakeEngine {
    pub fn new(gated: bool, fail: bool) -> Self {
        Self {
            gate: gated.then(|| Semaphore::new(0)),
            fail,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Let `n` gated generations proceed.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|(p, _, _)| p.clone()).collect()
    }

    /// Dimensions of each conditioning image received.
    pub fn input_dimensions(&self) -> Vec<(u32, u32)> {
        self.requests.lock().unwrap().iter().map(|(_, w, h)| (*w, *h)).collect()
    }
}

#[async_trait]
impl InferenceEngine for FakeEngine {
    async fn generate(&self, request: InferenceRequest) -> Result<DynamicImage, EngineError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        self.requests.lock().unwrap().push((
            request.prompt.clone(),
            request.image.width(),
            request.image.height(),
        ));
        if self.fail {
            return Err(EngineError::Inference("CUDA out of memory".into()));
        }
        Ok(DynamicImage::new_rgb8(request.width, request.height))
    }
}

pub struct FakeLoader {
    engine: Arc<FakeEngine>,
    fail: bool,
    loads: AtomicUsize,
}

impl FakeLoader {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineLoader for FakeLoader {
    async fn load(&self) -> Result<Arc<dyn InferenceEngine>, EngineError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EngineError::Load("weights not found".into()));
        }
        let engine: Arc<dyn InferenceEngine> = self.engine.clone();
        Ok(engine)
    }
}

pub struct FailingEnhancer;

#[async_trait]
impl PromptEnhancer for FailingEnhancer {
    async fn enhance(&self, _image: &DynamicImage, _prompt: &str) -> Result<String, EnhanceError> {
        Err(EnhanceError::EmptyResponse)
    }
}

/// Returns a fixed caption.
pub struct FixedEnhancer(pub &'static str);

#[async_trait]
impl PromptEnhancer for FixedEnhancer {
    async fn enhance(&self, _image: &DynamicImage, _prompt: &str) -> Result<String, EnhanceError> {
        Ok(self.0.to_string())
    }
}

// ---------------------------------------------------------------------------
// Test application
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub app: Router,
    pub engine: Arc<FakeEngine>,
    pub loader: Arc<FakeLoader>,
    pub probe: Arc<SwitchProbe>,
    pub config: ServerConfig,
    _dir: TempDir,
}

pub struct TestAppBuilder {
    sufficient: bool,
    gated: bool,
    engine_fails: bool,
    loader_fails: bool,
    enhancer: Arc<dyn PromptEnhancer>,
    max_upload_bytes: Option<usize>,
    request_timeout_secs: Option<u64>,
}

impl TestApp {
    /// Defaults: deferred execution, ungated engine, enhancement disabled.
    pub fn builder() -> TestAppBuilder {
        TestAppBuilder {
            sufficient: false,
            gated: false,
            engine_fails: false,
            loader_fails: false,
            enhancer: Arc::new(DisabledEnhancer),
            max_upload_bytes: None,
            request_timeout_secs: None,
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.config.storage.upload_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.storage.output_dir
    }

    pub fn router(&self) -> Router {
        self.app.clone()
    }
}

impl TestAppBuilder {
    pub fn immediate(mut self) -> Self {
        self.sufficient = true;
        self
    }

    pub fn gated(mut self) -> Self {
        self.gated = true;
        self
    }

    pub fn failing_engine(mut self) -> Self {
        self.engine_fails = true;
        self
    }

    pub fn failing_loader(mut self) -> Self {
        self.loader_fails = true;
        self
    }

    pub fn enhancer(mut self, enhancer: impl PromptEnhancer + 'static) -> Self {
        self.enhancer = Arc::new(enhancer);
        self
    }

    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = Some(bytes);
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = Some(secs);
        self
    }

    pub fn build(self) -> TestApp {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = test_config(dir.path());
        if let Some(bytes) = self.max_upload_bytes {
            config.max_upload_bytes = bytes;
        }
        if let Some(secs) = self.request_timeout_secs {
            config.request_timeout_secs = secs;
        }
        std::fs::create_dir_all(&config.storage.upload_dir).unwrap();
        std::fs::create_dir_all(&config.storage.output_dir).unwrap();

        let engine = Arc::new(FakeEngine::new(self.gated, self.engine_fails));
        let loader = Arc::new(FakeLoader {
            engine: Arc::clone(&engine),
            fail: self.loader_fails,
            loads: AtomicUsize::new(0),
        });
        let probe = Arc::new(SwitchProbe::new(self.sufficient));

        let state = AppState::new(
            &config,
            probe.clone(),
            loader.clone(),
            self.enhancer,
        );
        let app = build_app_router(state, &config);

        TestApp {
            app,
            engine,
            loader,
            probe,
            config,
            _dir: dir,
        }
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

/// Multipart form builder with a fixed boundary.
#[derive(Default)]
pub struct Form {
    body: Vec<u8>,
}

impl Form {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
        self
    }

    pub fn file(mut self, name: &str, filename: &str, bytes: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.body
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        self.body
    }
}

/// Standard submission: a small PNG plus `prompt`, enhancement off.
pub fn generation_form(prompt: &str) -> Form {
    Form::new()
        .file("image", "input.png", &png_bytes(64, 48))
        .text("text", prompt)
        .text("use_gemini", "false")
}

pub async fn post_form(app: Router, uri: &str, form: Form) -> Response {
    let request = Request::post(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(form.finish()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).unwrap()
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = std::io::Cursor::new(Vec::new());
    DynamicImage::new_rgb8(width, height)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Poll `/result/{id}` until it stops answering 202.
pub async fn wait_for_result(app: &Router, id: &str) -> Response {
    let uri = format!("/result/{id}");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let response = get(app.clone(), &uri).await;
        if response.status() != StatusCode::ACCEPTED {
            return response;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {id} still processing after 10s"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Names of the files currently in `dir`.
pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    files.sort();
    files
}
