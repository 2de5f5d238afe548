use std::{process, sync::Arc};

use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

use torchio::{
    application::{
        error::AppError,
        pipeline::PdfPipeline,
        render::{OptionsError, PdfEngine, PdfOptions, RenderPool, WkhtmltopdfEngine},
    },
    cache::{CacheConfig, MemoryBackend, PdfCache, RedisBackend},
    config,
    infra::{
        error::InfraError,
        http::{self, AppState},
        telemetry,
    },
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::RenderFile(args) => run_render_file(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let cache = Arc::new(build_cache(&settings).await);
    let engine: Arc<dyn PdfEngine> = Arc::new(WkhtmltopdfEngine::new(
        settings.render.engine_path.clone(),
    ));
    let pool = Arc::new(RenderPool::new(engine, settings.render.pool_size));
    let pipeline = Arc::new(PdfPipeline::new(cache, pool));

    let state = AppState {
        pipeline,
        max_document_bytes: settings.render.max_document_bytes.get() as usize,
    };

    info!(
        pool_size = settings.render.pool_size.get(),
        engine = %settings.render.engine_path.display(),
        cache_ttl_secs = settings.cache.ttl.as_secs(),
        "torchio starting"
    );

    http::serve(&settings.server, state).await
}

/// Build the cache from configuration. A store that is unreachable at startup
/// downgrades to a disabled cache with a warning; availability of the render
/// path never depends on cache health.
async fn build_cache(settings: &config::Settings) -> PdfCache {
    let cache_config = CacheConfig::from(&settings.cache);

    match settings.cache.url.as_deref() {
        None => {
            info!("cache disabled; every request takes the render path");
            PdfCache::disabled(cache_config)
        }
        Some(url) if url.starts_with("memory") => {
            info!("using in-process memory cache");
            PdfCache::new(Arc::new(MemoryBackend::new()), cache_config)
        }
        Some(url) => match RedisBackend::connect(url).await {
            Ok(backend) => {
                info!(url = url, "connected to cache store");
                PdfCache::new(Arc::new(backend), cache_config)
            }
            Err(err) => {
                warn!(
                    url = url,
                    error = %err,
                    "cache store unreachable at startup; continuing without cache"
                );
                PdfCache::disabled(cache_config)
            }
        },
    }
}

async fn run_render_file(
    settings: config::Settings,
    args: config::RenderFileArgs,
) -> Result<(), AppError> {
    let page_size = args
        .page_size
        .parse()
        .map_err(|err: OptionsError| AppError::validation(err.to_string()))?;
    let margin = args
        .margin
        .parse()
        .map_err(|err: OptionsError| AppError::validation(err.to_string()))?;
    let options = PdfOptions { page_size, margin };

    if !args.input.is_file() {
        return Err(AppError::validation(format!(
            "input `{}` is not a readable file",
            args.input.display()
        )));
    }

    let engine = WkhtmltopdfEngine::new(settings.render.engine_path.clone());
    let input = args.input;
    let bytes = tokio::task::spawn_blocking(move || engine.render(&input, &options))
        .await
        .map_err(|err| AppError::unexpected(format!("render task failed: {err}")))?
        .map_err(AppError::Render)?;

    std::fs::write(&args.output, &bytes).map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        output = %args.output.display(),
        pdf_bytes = bytes.len(),
        "PDF written"
    );
    Ok(())
}
