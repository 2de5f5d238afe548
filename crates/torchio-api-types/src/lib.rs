//! Shared request and response types for the Torchio PDF rendering API.
//!
//! These types define the JSON wire contract between the Torchio server and
//! its clients. Validation of rendering options (page size, margin) lives in
//! the server; this crate only carries the payload shapes plus the filename
//! hygiene both sides agree on.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Maximum length accepted for a client-supplied download filename.
pub const MAX_FILENAME_BYTES: usize = 255;

const DEFAULT_FILENAME: &str = "document.pdf";

/// Body of `POST /api/v1/pdf`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderDocumentRequest {
    /// Full HTML document to render. The server enforces size bounds.
    pub html: String,
    /// Download filename suggested to the client. Normalised server-side.
    #[serde(default)]
    pub filename: Option<String>,
    /// Page size name (A3, A4, A5, Letter, Legal). Defaults to A4.
    #[serde(default)]
    pub page_size: Option<String>,
    /// Page margin such as `0.5in`, `12mm`, `1cm` or `18px`. Defaults to 0.5in.
    #[serde(default)]
    pub margin: Option<String>,
}

impl RenderDocumentRequest {
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            filename: None,
            page_size: None,
            margin: None,
        }
    }
}

/// JSON body returned alongside 4xx/5xx statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error: String,
    pub detail: String,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub version: String,
    #[serde(with = "time::serde::timestamp")]
    pub timestamp: OffsetDateTime,
}

/// Normalise a client-supplied filename into a safe attachment name.
///
/// Path components are stripped, the character set is restricted to
/// `[A-Za-z0-9._-]`, a `.pdf` suffix is enforced and the result is capped at
/// [`MAX_FILENAME_BYTES`]. An empty or fully-rejected input falls back to
/// `document.pdf`.
pub fn normalize_filename(raw: &str) -> String {
    let base = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let mut cleaned: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();

    // Strip leading dots so the attachment can never be a hidden/relative name.
    while cleaned.starts_with('.') {
        cleaned.remove(0);
    }

    if cleaned.is_empty() {
        return DEFAULT_FILENAME.to_string();
    }

    if !cleaned.to_ascii_lowercase().ends_with(".pdf") {
        cleaned.push_str(".pdf");
    }

    if cleaned.len() > MAX_FILENAME_BYTES {
        let stem_budget = MAX_FILENAME_BYTES - ".pdf".len();
        let stem: String = cleaned
            .trim_end_matches(".pdf")
            .chars()
            .take(stem_budget)
            .collect();
        cleaned = format!("{stem}.pdf");
    }

    cleaned
}
