use std::path::PathBuf;
use std::str::FromStr;

use dsd_core::hardware::probe::{ExecutionMode, DEFAULT_MIN_FREE_VRAM_GIB};
use dsd_pipeline::enhance::DEFAULT_GEMINI_MODEL;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    /// A single `*` allows any origin.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `60`). Not applied to
    /// submissions, which may run a generation inline.
    pub request_timeout_secs: u64,
    /// Largest accepted request body in bytes (default: 32 MiB).
    pub max_upload_bytes: usize,
    pub storage: StorageConfig,
    pub model: ModelConfig,
    pub enhancer: EnhancerConfig,
    pub probe: ProbeConfig,
}

/// Where job artifacts are written.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
}

/// Model weights and the sidecar that serves them.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model_path: String,
    pub lora_path: String,
    pub base_model: String,
    pub inference_url: String,
}

/// Prompt-enhancement credentials. `api_key == None` disables enhancement.
#[derive(Debug, Clone)]
pub struct EnhancerConfig {
    pub api_key: Option<String>,
    pub model: String,
}

/// Execution-mode selection.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub execution_mode: ExecutionMode,
    pub min_free_vram_gib: u64,
    pub gpu_device_index: u32,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                                   |
    /// |------------------------|-------------------------------------------|
    /// | `HOST`                 | `0.0.0.0`                                 |
    /// | `PORT`                 | `8000`                                    |
    /// | `CORS_ORIGINS`         | `*`                                       |
    /// | `REQUEST_TIMEOUT_SECS` | `60`                                      |
    /// | `MAX_UPLOAD_BYTES`     | `33554432`                                |
    /// | `UPLOAD_DIR`           | `uploads`                                 |
    /// | `OUTPUT_DIR`           | `outputs`                                 |
    /// | `MODEL_PATH`           | `models/transformer`                      |
    /// | `LORA_PATH`            | `models/pytorch_lora_weights.safetensors` |
    /// | `BASE_MODEL`           | `black-forest-labs/FLUX.1-dev`            |
    /// | `INFERENCE_URL`        | `http://127.0.0.1:8188`                   |
    /// | `GOOGLE_API_KEY`       | unset                                     |
    /// | `GEMINI_MODEL`         | `gemini-2.0-flash`                        |
    /// | `EXECUTION_MODE`       | `auto`                                    |
    /// | `MIN_FREE_VRAM_GIB`    | `24`                                      |
    /// | `GPU_DEVICE_INDEX`     | `0`                                       |
    ///
    /// Panics on malformed values so misconfiguration fails at startup.
    pub fn from_env() -> Self {
        let cors_origins: Vec<String> = env_or("CORS_ORIGINS", "*")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse("PORT", 8000),
            cors_origins,
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", 60),
            max_upload_bytes: env_parse("MAX_UPLOAD_BYTES", 32 * 1024 * 1024),
            storage: StorageConfig {
                upload_dir: env_or("UPLOAD_DIR", "uploads").into(),
                output_dir: env_or("OUTPUT_DIR", "outputs").into(),
            },
            model: ModelConfig {
                model_path: env_or("MODEL_PATH", "models/transformer"),
                lora_path: env_or("LORA_PATH", "models/pytorch_lora_weights.safetensors"),
                base_model: env_or("BASE_MODEL", "black-forest-labs/FLUX.1-dev"),
                inference_url: env_or("INFERENCE_URL", "http://127.0.0.1:8188"),
            },
            enhancer: EnhancerConfig {
                api_key: std::env::var("GOOGLE_API_KEY")
                    .ok()
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty()),
                model: env_or("GEMINI_MODEL", DEFAULT_GEMINI_MODEL),
            },
            probe: ProbeConfig {
                execution_mode: env_parse("EXECUTION_MODE", ExecutionMode::Auto),
                min_free_vram_gib: env_parse("MIN_FREE_VRAM_GIB", DEFAULT_MIN_FREE_VRAM_GIB),
                gpu_device_index: env_parse("GPU_DEVICE_INDEX", 0),
            },
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{key} has an invalid value '{raw}': {e}")),
        Err(_) => default,
    }
}
