//! JSON API handlers for the rendering endpoint and health probe.

use std::time::Instant;

use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderName, header},
    response::{IntoResponse, Response},
};
use time::OffsetDateTime;
use torchio_api_types::{HealthStatus, RenderDocumentRequest, normalize_filename};
use tracing::info;

use crate::application::{
    error::AppError,
    pipeline::{PdfRequest, PdfOutcome},
    render::PdfOptions,
};

use super::{AppState, middleware::RequestContext};

const MIN_DOCUMENT_BYTES: usize = 10;

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "healthy".to_string(),
        service: "torchio".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: OffsetDateTime::now_utc(),
    })
}

pub async fn render_pdf(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(payload): Json<RenderDocumentRequest>,
) -> Result<Response, AppError> {
    let started_at = Instant::now();
    let (request, filename) = validate_request(payload, state.max_document_bytes)?;

    info!(
        target = "torchio::http::api",
        request_id = ctx.request_id,
        filename = filename,
        page_size = request.options.page_size.as_str(),
        margin = request.options.margin.as_str(),
        html_bytes = request.content.len(),
        "PDF generation requested"
    );

    let PdfOutcome { bytes, hit } = state.pipeline.handle(request).await?;

    info!(
        target = "torchio::http::api",
        request_id = ctx.request_id,
        cache = if hit { "hit" } else { "miss" },
        pdf_bytes = bytes.len(),
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        "PDF generation completed"
    );

    let headers = [
        (
            header::CONTENT_TYPE,
            "application/pdf".to_string(),
        ),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        ),
        (X_CACHE, if hit { "HIT" } else { "MISS" }.to_string()),
        (X_REQUEST_ID, ctx.request_id),
    ];

    Ok((headers, bytes).into_response())
}

fn validate_request(
    payload: RenderDocumentRequest,
    max_document_bytes: usize,
) -> Result<(PdfRequest, String), AppError> {
    let html = payload.html;
    if html.len() < MIN_DOCUMENT_BYTES {
        return Err(AppError::validation(format!(
            "document too small; expected at least {MIN_DOCUMENT_BYTES} bytes of HTML"
        )));
    }
    if html.len() > max_document_bytes {
        return Err(AppError::validation(format!(
            "document too large; limit is {max_document_bytes} bytes"
        )));
    }

    let page_size = match payload.page_size.as_deref() {
        Some(raw) => raw
            .parse()
            .map_err(|err: crate::application::render::OptionsError| {
                AppError::validation(err.to_string())
            })?,
        None => Default::default(),
    };
    let margin = match payload.margin.as_deref() {
        Some(raw) => raw
            .parse()
            .map_err(|err: crate::application::render::OptionsError| {
                AppError::validation(err.to_string())
            })?,
        None => Default::default(),
    };

    let filename = normalize_filename(payload.filename.as_deref().unwrap_or_default());

    Ok((
        PdfRequest {
            content: html,
            options: PdfOptions { page_size, margin },
        },
        filename,
    ))
}
