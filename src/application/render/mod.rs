//! Rendering executor and engine boundary.
//!
//! The engine itself is a black box behind [`PdfEngine`]: it accepts a
//! document path plus options and returns PDF bytes or a structured error.
//! [`RenderPool`] owns the concurrency boundary — CPU-bound engine work runs
//! on blocking threads gated by a fixed number of worker permits, so the
//! request-serving loop never blocks on a render.

mod engine;
mod pool;
mod types;

pub use engine::WkhtmltopdfEngine;
pub use pool::RenderPool;
pub use types::{Margin, OptionsError, PageSize, PdfEngine, PdfOptions, RenderError};
