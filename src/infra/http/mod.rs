//! HTTP surface: routing, middleware and listener lifecycle.

pub mod api;
mod middleware;

pub use middleware::RequestContext;

use std::sync::Arc;

use axum::{
    Router,
    middleware as axum_middleware,
    routing::{get, post},
};
use tracing::info;

use crate::application::{error::AppError, pipeline::PdfPipeline};
use crate::config::ServerSettings;
use crate::infra::error::InfraError;

use middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<PdfPipeline>,
    /// Upper bound accepted for the `html` field, from `render.max_document_bytes`.
    pub max_document_bytes: usize,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/api/v1/pdf", post(api::render_pdf))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

/// Bind the configured listener and serve until a shutdown signal arrives.
///
/// After the signal, in-flight connections get the configured graceful window
/// to drain; the listener stops accepting immediately.
pub async fn serve(settings: &ServerSettings, state: AppState) -> Result<(), AppError> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.addr, "HTTP listener bound");

    let grace = settings.graceful_shutdown;
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal());

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = expired_grace(grace) => {
            info!(
                grace_secs = grace.as_secs(),
                "graceful shutdown window elapsed; dropping remaining connections"
            );
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!("shutdown signal received; draining connections");
}

async fn expired_grace(grace: std::time::Duration) {
    shutdown_signal().await;
    tokio::time::sleep(grace).await;
}
