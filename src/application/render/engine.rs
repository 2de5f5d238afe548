use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::Instant,
};

use tracing::{info, warn};

use super::types::{PdfEngine, PdfOptions, RenderError};

const SOURCE: &str = "application::render::engine";

/// PDF engine backed by the `wkhtmltopdf` command-line tool.
///
/// The engine is treated as an opaque collaborator: it reads the document
/// from a path supplied by the caller, writes the PDF to a scoped temporary
/// file and its stderr is captured into the error on failure.
#[derive(Debug, Clone)]
pub struct WkhtmltopdfEngine {
    cli_path: PathBuf,
}

impl WkhtmltopdfEngine {
    pub fn new(cli_path: PathBuf) -> Self {
        Self { cli_path }
    }
}

impl PdfEngine for WkhtmltopdfEngine {
    fn render(&self, document: &Path, options: &PdfOptions) -> Result<Vec<u8>, RenderError> {
        let started_at = Instant::now();

        let output_file = tempfile::Builder::new()
            .suffix(".pdf")
            .tempfile()
            .map_err(|err| RenderError::Io(err.to_string()))?;
        let output_path = output_file.path().to_path_buf();

        let margin = options.margin.as_str();
        let output = Command::new(&self.cli_path)
            .arg("--quiet")
            .arg("--page-size")
            .arg(options.page_size.as_str())
            .arg("--margin-top")
            .arg(margin)
            .arg("--margin-bottom")
            .arg(margin)
            .arg("--margin-left")
            .arg(margin)
            .arg("--margin-right")
            .arg(margin)
            .arg(document)
            .arg(&output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|err| {
                warn!(
                    target_module = SOURCE,
                    op = "engine.render",
                    result = "error",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error_code = "spawn_cli",
                    error = %err,
                    "Failed to spawn PDF engine"
                );
                if err.kind() == ErrorKind::NotFound {
                    RenderError::EngineUnavailable(err.to_string())
                } else {
                    RenderError::Io(err.to_string())
                }
            })?;

        if !output.status.success() {
            let exit_code = output.status.code();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(
                target_module = SOURCE,
                op = "engine.render",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                error_code = "engine_cli",
                stderr = %stderr,
                "PDF engine invocation failed"
            );
            return Err(RenderError::Engine { exit_code, stderr });
        }

        let bytes = fs::read(&output_path).map_err(|err| RenderError::Io(err.to_string()))?;

        info!(
            target_module = SOURCE,
            op = "engine.render",
            result = "rendered",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            page_size = options.page_size.as_str(),
            margin = margin,
            pdf_bytes = bytes.len(),
            "PDF rendered via CLI"
        );

        Ok(bytes)
    }
}
