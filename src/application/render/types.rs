use std::{fmt, path::Path, str::FromStr};

use thiserror::Error;

/// Supported page sizes, matching what the engine CLI accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PageSize {
    A3,
    #[default]
    A4,
    A5,
    Letter,
    Legal,
}

impl PageSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageSize::A3 => "A3",
            PageSize::A4 => "A4",
            PageSize::A5 => "A5",
            PageSize::Letter => "Letter",
            PageSize::Legal => "Legal",
        }
    }
}

impl FromStr for PageSize {
    type Err = OptionsError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "A3" => Ok(PageSize::A3),
            "A4" => Ok(PageSize::A4),
            "A5" => Ok(PageSize::A5),
            "Letter" => Ok(PageSize::Letter),
            "Legal" => Ok(PageSize::Legal),
            other => Err(OptionsError::PageSize(other.to_string())),
        }
    }
}

impl fmt::Display for PageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const MARGIN_UNITS: [&str; 4] = ["in", "mm", "cm", "px"];

/// A validated page margin such as `0.5in` or `12mm`.
///
/// Held in normalised form so that equal margins spell identically in cache
/// fingerprints and engine arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Margin(String);

impl Margin {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Default for Margin {
    fn default() -> Self {
        Self("0.5in".to_string())
    }
}

impl FromStr for Margin {
    type Err = OptionsError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let invalid = || OptionsError::Margin(raw.to_string());

        let split = trimmed
            .char_indices()
            .find(|(_, c)| c.is_ascii_alphabetic())
            .map(|(i, _)| i)
            .ok_or_else(invalid)?;
        let (number, unit) = trimmed.split_at(split);

        if !MARGIN_UNITS.contains(&unit) {
            return Err(invalid());
        }
        if number.is_empty()
            || !number.starts_with(|c: char| c.is_ascii_digit())
            || !number.ends_with(|c: char| c.is_ascii_digit())
            || number.chars().filter(|c| *c == '.').count() > 1
            || !number.chars().all(|c| c.is_ascii_digit() || c == '.')
        {
            return Err(invalid());
        }

        let value: f64 = number.parse().map_err(|_| invalid())?;
        if !value.is_finite() {
            return Err(invalid());
        }

        Ok(Self(format!("{value}{unit}")))
    }
}

impl fmt::Display for Margin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// Render options accepted alongside an HTML document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PdfOptions {
    pub page_size: PageSize,
    pub margin: Margin,
}

impl PdfOptions {
    /// Canonical encoding folded into cache key derivation. Stable across
    /// processes; equal options always produce the identical fingerprint.
    pub fn fingerprint(&self) -> String {
        format!("{}|{}", self.page_size.as_str(), self.margin.as_str())
    }
}

/// Rejections raised while parsing client-supplied render options.
#[derive(Debug, Clone, Error)]
pub enum OptionsError {
    #[error("unknown page size `{0}`; expected A3, A4, A5, Letter or Legal")]
    PageSize(String),
    #[error("invalid margin `{0}`; expected <number><in|mm|cm|px>")]
    Margin(String),
}

/// Structured errors surfaced by the render path. Cloneable so an outcome can
/// fan out to every caller waiting on the same in-flight render.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("pdf engine invocation failed (exit {exit_code:?}): {stderr}")]
    Engine {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("pdf engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("render i/o failure: {0}")]
    Io(String),
    #[error("render worker terminated before completing")]
    WorkerGone,
}

/// Black-box PDF engine collaborator.
///
/// Implementations are synchronous and deterministic: given the same document
/// and options they return identical bytes or the same error, so a failing
/// render is never retried.
pub trait PdfEngine: Send + Sync {
    fn render(&self, document: &Path, options: &PdfOptions) -> Result<Vec<u8>, RenderError>;
}
