//! Cache configuration.

use std::time::Duration;

const DEFAULT_TTL: Duration = Duration::from_secs(3600);
const DEFAULT_NAMESPACE: &str = "pdf";

/// Resolved cache parameters handed to [`super::PdfCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entry time-to-live applied at write time; expiry is enforced by the store.
    pub ttl: Duration,
    /// Key namespace prepended as `<namespace>:<digest>`.
    pub namespace: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            ttl: settings.ttl,
            namespace: settings.namespace.clone(),
        }
    }
}
