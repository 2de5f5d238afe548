//! Torchio PDF Cache
//!
//! Content-addressed caching for rendered PDF documents against an external
//! key-value store:
//!
//! - **Keys**: fixed-length SHA-256 digests of the document plus a canonical
//!   encoding of its render options, namespaced for shared keyspaces.
//! - **Store**: best-effort `GET`/`SETEX` protocol; every store failure
//!   degrades to a miss (read) or a dropped write, never to a request error.
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `torchio.toml`:
//!
//! ```toml
//! [cache]
//! url = "redis://127.0.0.1:6379"
//! ttl_seconds = 3600
//! namespace = "pdf"
//! ```
//!
//! Omitting `url` disables caching; every request then takes the render path.

mod config;
mod keys;
mod lock;
mod store;

pub use config::CacheConfig;
pub use keys::ContentKey;
pub use store::{CacheError, KeyValueBackend, MemoryBackend, PdfCache, RedisBackend};
