//! Torchio: a self-hosted HTML-to-PDF rendering service.
//!
//! Requests flow through a content-addressed pipeline: a SHA-256 key is
//! derived from the document and its render options, a best-effort external
//! cache is consulted, and on a miss the document is rendered by an external
//! engine inside a bounded worker pool, deduplicating concurrent renders of
//! identical content. Cache health never gates availability; only the engine
//! does.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
