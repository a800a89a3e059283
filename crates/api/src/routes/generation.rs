use axum::routing::{get, post};
use axum::Router;

use crate::handlers::generation;
use crate::state::AppState;

/// Submission routes, mounted at the root.
///
/// ```text
/// POST /generate                  submit (multipart)
/// POST /generate/                 submit, trailing-slash alias
/// ```
///
/// An inline generation holds the connection for the whole inference, so
/// these routes are mounted outside the request timeout.
pub fn submit_router() -> Router<AppState> {
    Router::new()
        .route("/generate", post(generation::generate))
        .route("/generate/", post(generation::generate))
}

/// Polling routes, mounted at the root.
///
/// ```text
/// GET  /result/{request_id}       poll for the output
/// ```
pub fn result_router() -> Router<AppState> {
    Router::new().route("/result/{request_id}", get(generation::get_result))
}
