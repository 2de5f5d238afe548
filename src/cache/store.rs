//! Best-effort storage for rendered PDF bytes.
//!
//! The store speaks a minimal `GET`/`SETEX` protocol through the
//! [`KeyValueBackend`] seam. [`PdfCache`] absorbs every backend failure:
//! reads degrade to misses and writes are dropped, so cache health never
//! gates the render path.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use metrics::counter;
use redis::{AsyncCommands, aio::ConnectionManager};
use thiserror::Error;
use tracing::{debug, warn};

use super::config::CacheConfig;
use super::keys::ContentKey;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";

const METRIC_CACHE_HIT: &str = "torchio_pdf_cache_hit_total";
const METRIC_CACHE_MISS: &str = "torchio_pdf_cache_miss_total";
const METRIC_CACHE_STORE_ERROR: &str = "torchio_pdf_cache_store_error_total";

/// Failures raised by a store backend. Confined to this module's callers;
/// [`PdfCache`] never lets one escape.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("store connection failed: {0}")]
    Connection(String),
    #[error("store operation failed: {0}")]
    Operation(String),
}

/// Key-value protocol consumed by the cache: `GET key` and `SETEX key ttl value`.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    async fn store(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;
}

/// Redis-backed production store.
///
/// The connection manager is created once at startup and shared across all
/// requests; it re-establishes dropped connections on its own.
#[derive(Clone)]
pub struct RedisBackend {
    manager: ConnectionManager,
}

impl RedisBackend {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client =
            redis::Client::open(url).map_err(|err| CacheError::Connection(err.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|err| CacheError::Connection(err.to_string()))?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl KeyValueBackend for RedisBackend {
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.manager.clone();
        conn.get(key)
            .await
            .map_err(|err| CacheError::Operation(err.to_string()))
    }

    async fn store(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .set_ex(key, value, ttl.as_secs())
            .await
            .map_err(|err| CacheError::Operation(err.to_string()))?;
        Ok(())
    }
}

/// In-process store for single-instance deployments and tests.
///
/// Honors the same TTL semantics as the Redis backend; expired entries are
/// dropped lazily on the next fetch.
#[derive(Default)]
pub struct MemoryBackend {
    entries: std::sync::Mutex<HashMap<String, (Vec<u8>, tokio::time::Instant)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueBackend for MemoryBackend {
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = tokio::time::Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "memory.fetch");
        match entries.get(key) {
            Some((_, deadline)) if now >= *deadline => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn store(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let deadline = tokio::time::Instant::now() + ttl;
        let mut entries = mutex_lock(&self.entries, SOURCE, "memory.store");
        entries.insert(key.to_string(), (value.to_vec(), deadline));
        Ok(())
    }
}

/// Content-addressed cache facade used by the request pipeline.
pub struct PdfCache {
    backend: Option<Arc<dyn KeyValueBackend>>,
    config: CacheConfig,
}

impl PdfCache {
    pub fn new(backend: Arc<dyn KeyValueBackend>, config: CacheConfig) -> Self {
        Self {
            backend: Some(backend),
            config,
        }
    }

    /// A cache that never stores anything; every read is a miss.
    pub fn disabled(config: CacheConfig) -> Self {
        Self {
            backend: None,
            config,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    /// Derive the store key for a document under this cache's namespace.
    pub fn key(&self, content: &str, options_fingerprint: &str) -> ContentKey {
        ContentKey::derive(&self.config.namespace, content, options_fingerprint)
    }

    /// Look up previously rendered bytes. Never fails: backend errors are
    /// logged, counted and reported as a miss.
    pub async fn get(&self, key: &ContentKey) -> Option<Bytes> {
        let backend = self.backend.as_ref()?;
        match backend.fetch(key.as_str()).await {
            Ok(Some(value)) => {
                counter!(METRIC_CACHE_HIT).increment(1);
                debug!(
                    target_module = SOURCE,
                    op = "cache.get",
                    result = "hit",
                    key = %key,
                    pdf_bytes = value.len(),
                    "PDF served from cache"
                );
                Some(Bytes::from(value))
            }
            Ok(None) => {
                counter!(METRIC_CACHE_MISS).increment(1);
                debug!(
                    target_module = SOURCE,
                    op = "cache.get",
                    result = "miss",
                    key = %key,
                    "PDF not cached"
                );
                None
            }
            Err(err) => {
                counter!(METRIC_CACHE_STORE_ERROR).increment(1);
                counter!(METRIC_CACHE_MISS).increment(1);
                warn!(
                    target_module = SOURCE,
                    op = "cache.get",
                    result = "store_error",
                    key = %key,
                    error = %err,
                    "Cache read failed; treating as miss"
                );
                None
            }
        }
    }

    /// Store rendered bytes under the configured TTL. Best-effort: a failed
    /// write is logged and dropped, and the caller learns only a boolean.
    pub async fn put(&self, key: &ContentKey, bytes: &Bytes) -> bool {
        let Some(backend) = self.backend.as_ref() else {
            return false;
        };
        match backend.store(key.as_str(), bytes, self.config.ttl).await {
            Ok(()) => {
                debug!(
                    target_module = SOURCE,
                    op = "cache.put",
                    result = "stored",
                    key = %key,
                    pdf_bytes = bytes.len(),
                    ttl_secs = self.config.ttl.as_secs(),
                    "PDF cached"
                );
                true
            }
            Err(err) => {
                counter!(METRIC_CACHE_STORE_ERROR).increment(1);
                warn!(
                    target_module = SOURCE,
                    op = "cache.put",
                    result = "store_error",
                    key = %key,
                    error = %err,
                    "Cache write failed; entry dropped"
                );
                false
            }
        }
    }
}
