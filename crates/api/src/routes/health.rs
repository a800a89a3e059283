use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// `healthy` once the inference engine is loaded, `unhealthy` otherwise.
    pub status: &'static str,
    pub model_loaded: bool,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ApiInfoResponse {
    pub message: &'static str,
}

/// GET /health -- reports engine readiness, loading it if needed.
///
/// Always answers 200; a failed load shows up as `unhealthy` and is retried
/// on the next call.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let model_loaded = match state.engine.ensure_loaded().await {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not load the engine");
            false
        }
    };

    Json(HealthResponse {
        status: if model_loaded { "healthy" } else { "unhealthy" },
        model_loaded,
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /api
async fn api_info() -> Json<ApiInfoResponse> {
    Json(ApiInfoResponse {
        message: "Diffusion Self-Distillation API is running",
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api", get(api_info))
}
