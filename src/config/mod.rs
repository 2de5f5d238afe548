//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU64, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "torchio";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8300;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
const DEFAULT_CACHE_NAMESPACE: &str = "pdf";
const DEFAULT_ENGINE_PATH: &str = "wkhtmltopdf";
const DEFAULT_POOL_SIZE: usize = 4;
const DEFAULT_MAX_DOCUMENT_BYTES: u64 = 500_000;

/// Command-line arguments for the Torchio binary.
#[derive(Debug, Parser)]
#[command(name = "torchio", version, about = "Torchio PDF rendering service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "TORCHIO_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the Torchio HTTP service.
    Serve(Box<ServeArgs>),
    /// Render a single local HTML file to PDF and exit.
    #[command(name = "render")]
    RenderFile(RenderFileArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the cache store URL (redis://…, rediss://…, or memory://).
    #[arg(long = "cache-url", value_name = "URL")]
    pub cache_url: Option<String>,

    /// Override the cache entry time-to-live.
    #[arg(long = "cache-ttl-seconds", value_name = "SECONDS")]
    pub cache_ttl_seconds: Option<u64>,

    /// Override the cache key namespace.
    #[arg(long = "cache-namespace", value_name = "NAME")]
    pub cache_namespace: Option<String>,

    /// Override the PDF engine executable path.
    #[arg(long = "render-engine-path", value_name = "PATH")]
    pub engine_path: Option<PathBuf>,

    /// Override the render worker pool size.
    #[arg(long = "render-pool-size", value_name = "COUNT")]
    pub pool_size: Option<usize>,

    /// Override the maximum accepted HTML document size in bytes.
    #[arg(long = "render-max-document-bytes", value_name = "BYTES")]
    pub max_document_bytes: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct RenderFileArgs {
    /// Path to the HTML document to render.
    #[arg(value_name = "INPUT", value_hint = ValueHint::FilePath)]
    pub input: PathBuf,

    /// Path to the PDF file to write.
    #[arg(value_name = "OUTPUT", value_hint = ValueHint::FilePath)]
    pub output: PathBuf,

    /// Page size name (A3, A4, A5, Letter, Legal).
    #[arg(long = "page-size", default_value = "A4", value_name = "SIZE")]
    pub page_size: String,

    /// Page margin such as `0.5in` or `12mm`.
    #[arg(long, default_value = "0.5in", value_name = "MARGIN")]
    pub margin: String,

    /// Override the PDF engine executable path.
    #[arg(long = "render-engine-path", value_name = "PATH")]
    pub engine_path: Option<PathBuf>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub render: RenderSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Store URL; `None` disables caching entirely.
    pub url: Option<String>,
    pub ttl: Duration,
    pub namespace: String,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub engine_path: PathBuf,
    pub pool_size: NonZeroUsize,
    pub max_document_bytes: NonZeroU64,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("TORCHIO").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::RenderFile(args)) => raw.apply_render_file_overrides(args),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    render: RawRenderSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(cache_url) = overrides.cache_url.as_ref() {
            self.cache.url = Some(cache_url.clone());
        }
        if let Some(ttl) = overrides.cache_ttl_seconds {
            self.cache.ttl_seconds = Some(ttl);
        }
        if let Some(namespace) = overrides.cache_namespace.as_ref() {
            self.cache.namespace = Some(namespace.clone());
        }
        if let Some(path) = overrides.engine_path.as_ref() {
            self.render.engine_path = Some(path.clone());
        }
        if let Some(size) = overrides.pool_size {
            self.render.pool_size = Some(size);
        }
        if let Some(bytes) = overrides.max_document_bytes {
            self.render.max_document_bytes = Some(bytes);
        }
    }

    fn apply_render_file_overrides(&mut self, args: &RenderFileArgs) {
        if let Some(path) = args.engine_path.as_ref() {
            self.render.engine_path = Some(path.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            render,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;
        let render = build_render_settings(render)?;

        Ok(Self {
            server,
            logging,
            cache,
            render,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let url = cache.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    if let Some(raw_url) = url.as_ref() {
        let parsed = Url::parse(raw_url)
            .map_err(|err| LoadError::invalid("cache.url", format!("failed to parse: {err}")))?;
        match parsed.scheme() {
            "redis" | "rediss" | "memory" => {}
            other => {
                return Err(LoadError::invalid(
                    "cache.url",
                    format!("unsupported scheme `{other}`; expected redis, rediss or memory"),
                ));
            }
        }
    }

    let ttl_seconds = cache.ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS);
    if ttl_seconds == 0 {
        return Err(LoadError::invalid(
            "cache.ttl_seconds",
            "must be greater than zero",
        ));
    }

    let namespace = cache
        .namespace
        .unwrap_or_else(|| DEFAULT_CACHE_NAMESPACE.to_string());
    if namespace.trim().is_empty() || namespace.contains(':') {
        return Err(LoadError::invalid(
            "cache.namespace",
            "must be non-empty and must not contain `:`",
        ));
    }

    Ok(CacheSettings {
        url,
        ttl: Duration::from_secs(ttl_seconds),
        namespace,
    })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let engine_path = render
        .engine_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENGINE_PATH));
    if engine_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "render.engine_path",
            "path must not be empty",
        ));
    }

    let pool_size_value = render.pool_size.unwrap_or(DEFAULT_POOL_SIZE);
    let pool_size = NonZeroUsize::new(pool_size_value)
        .ok_or_else(|| LoadError::invalid("render.pool_size", "must be greater than zero"))?;

    let max_document_bytes_value = render
        .max_document_bytes
        .unwrap_or(DEFAULT_MAX_DOCUMENT_BYTES);
    let max_document_bytes = NonZeroU64::new(max_document_bytes_value).ok_or_else(|| {
        LoadError::invalid("render.max_document_bytes", "must be greater than zero")
    })?;
    usize::try_from(max_document_bytes_value).map_err(|_| {
        LoadError::invalid(
            "render.max_document_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(RenderSettings {
        engine_path,
        pool_size,
        max_document_bytes,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    url: Option<String>,
    ttl_seconds: Option<u64>,
    namespace: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    engine_path: Option<PathBuf>,
    pool_size: Option<usize>,
    max_document_bytes: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}
