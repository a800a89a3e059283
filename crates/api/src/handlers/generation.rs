//! Handlers for job submission and result polling.

use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dsd_core::imaging;
use dsd_core::job::{GenerationParams, JobId};

use crate::engine::{GenerationRequest, PollOutcome, Submission};
use crate::error::{AppError, AppResult};
use crate::response::ProcessingResponse;
use crate::state::AppState;

const PNG_CONTENT_TYPE: &str = "image/png";

/// POST /generate
///
/// Accepts a multipart form with an `image` file and a `text` prompt, plus
/// optional `use_gemini`, `guidance`, `i_guidance` and `t_guidance` fields.
/// Responds with the PNG itself when the job ran inline, or with a
/// `processing` body carrying the `request_id` to poll.
pub async fn generate(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<Response> {
    let multipart = multipart.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let request = parse_generation_form(multipart).await?;

    match state.dispatcher.submit(request).await? {
        Submission::Immediate(output) => Ok(png_response(output.png)),
        Submission::Deferred(id) => Ok(Json(ProcessingResponse::started(id)).into_response()),
    }
}

/// GET /result/{request_id}
///
/// 200 with the PNG once published, 202 while the job is still running,
/// 500 if the job failed and 404 for identifiers that were never issued.
pub async fn get_result(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> AppResult<Response> {
    // A malformed id can never name an artifact.
    let id: JobId = request_id
        .parse()
        .map_err(|_| AppError::UnknownRequest(request_id.clone()))?;

    match state.dispatcher.poll(id).await? {
        PollOutcome::Ready(png) => Ok(png_response(png)),
        PollOutcome::InProgress => Ok((
            StatusCode::ACCEPTED,
            Json(ProcessingResponse::not_complete(id)),
        )
            .into_response()),
        PollOutcome::Failed(record) => Err(AppError::GenerationFailed {
            request_id: Some(record.request_id),
            message: record.error,
        }),
        PollOutcome::Unknown => Err(AppError::UnknownRequest(id.to_string())),
    }
}

fn png_response(png: Vec<u8>) -> Response {
    ([(CONTENT_TYPE, PNG_CONTENT_TYPE)], png).into_response()
}

// ---------------------------------------------------------------------------
// Form parsing
// ---------------------------------------------------------------------------

async fn parse_generation_form(mut multipart: Multipart) -> AppResult<GenerationRequest> {
    let mut image: Option<Vec<u8>> = None;
    let mut text: Option<String> = None;
    let mut use_gemini: Option<String> = None;
    let mut guidance: Option<String> = None;
    let mut i_guidance: Option<String> = None;
    let mut t_guidance: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == "image" {
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(e.to_string()))?;
            image = Some(data.to_vec());
            continue;
        }

        let slot = match name.as_str() {
            "text" => &mut text,
            "use_gemini" => &mut use_gemini,
            "guidance" => &mut guidance,
            "i_guidance" => &mut i_guidance,
            "t_guidance" => &mut t_guidance,
            _ => continue, // ignore unknown fields
        };
        let value = field
            .text()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        *slot = Some(value);
    }

    let image = image.ok_or_else(|| AppError::BadRequest("Missing required 'image' field".into()))?;
    let text = text.ok_or_else(|| AppError::BadRequest("Missing required 'text' field".into()))?;

    if image.is_empty() {
        return Err(AppError::BadRequest("Uploaded image is empty".into()));
    }
    let (width, height) = imaging::probe_dimensions(&image)
        .map_err(|e| AppError::BadRequest(format!("Invalid image: {e}")))?;
    tracing::debug!(width, height, bytes = image.len(), "Accepted upload");

    let mut params = GenerationParams::new(text);
    if let Some(raw) = use_gemini {
        params.enhance_prompt = parse_flag("use_gemini", &raw)?;
    }
    if let Some(raw) = guidance {
        params.guidance = parse_scalar("guidance", &raw)?;
    }
    if let Some(raw) = i_guidance {
        params.image_guidance = parse_scalar("i_guidance", &raw)?;
    }
    if let Some(raw) = t_guidance {
        params.text_guidance = parse_scalar("t_guidance", &raw)?;
    }
    params.validate()?;

    Ok(GenerationRequest { image, params })
}

/// Parse a boolean form field. Accepts the spellings HTML forms and shell
/// scripts commonly send.
fn parse_flag(name: &str, raw: &str) -> AppResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(AppError::BadRequest(format!(
            "'{name}' must be a boolean, got '{other}'"
        ))),
    }
}

fn parse_scalar(name: &str, raw: &str) -> AppResult<f32> {
    raw.trim()
        .parse::<f32>()
        .map_err(|_| AppError::BadRequest(format!("'{name}' must be a number, got '{raw}'")))
}
