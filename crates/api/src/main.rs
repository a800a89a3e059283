use std::net::SocketAddr;
use std::sync::Arc;

use dsd_core::hardware::probe::{ExecutionMode, MemoryThreshold, ResourceProbe, StaticProbe};
use dsd_core::layout::JobLayout;
use dsd_gpu::NvmlProbe;
use dsd_pipeline::{DisabledEnhancer, GeminiEnhancer, ModelSource, PromptEnhancer, RemoteEngineLoader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dsd_api::config::ServerConfig;
use dsd_api::router::build_app_router;
use dsd_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dsd_api=debug,dsd_pipeline=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Storage ---
    JobLayout::new(&config.storage.upload_dir, &config.storage.output_dir)
        .ensure_dirs()
        .await
        .expect("Failed to create artifact directories");
    tracing::info!(
        upload_dir = %config.storage.upload_dir.display(),
        output_dir = %config.storage.output_dir.display(),
        "Artifact directories ready"
    );

    // --- Resource probe ---
    let probe: Arc<dyn ResourceProbe> = match config.probe.execution_mode {
        ExecutionMode::Auto => Arc::new(NvmlProbe::new(
            config.probe.gpu_device_index,
            MemoryThreshold::from_gib(config.probe.min_free_vram_gib),
        )),
        ExecutionMode::Immediate => Arc::new(StaticProbe(true)),
        ExecutionMode::Deferred => Arc::new(StaticProbe(false)),
    };
    tracing::info!(mode = ?config.probe.execution_mode, "Execution mode selected");

    // --- Inference engine ---
    let loader = Arc::new(RemoteEngineLoader::new(
        config.model.inference_url.clone(),
        ModelSource {
            model_path: config.model.model_path.clone(),
            lora_path: config.model.lora_path.clone(),
            base_model: config.model.base_model.clone(),
        },
    ));

    // --- Prompt enhancement ---
    let enhancer: Arc<dyn PromptEnhancer> = match &config.enhancer.api_key {
        Some(key) => Arc::new(GeminiEnhancer::new(key.clone(), config.enhancer.model.clone())),
        None => {
            tracing::warn!("GOOGLE_API_KEY not set, prompt enhancement disabled");
            Arc::new(DisabledEnhancer)
        }
    };

    // --- App state + router ---
    let state = AppState::new(&config, probe, loader, enhancer);
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix). Background
/// generations still running at that point are dropped with the runtime and
/// leave no output artifact.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
