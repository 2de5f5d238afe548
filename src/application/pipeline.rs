//! Request coordination: key derivation, cache lookup, render dispatch.

use std::{sync::Arc, time::Instant};

use bytes::Bytes;
use metrics::{counter, histogram};
use tracing::debug;

use crate::application::flight::{Admission, FlightTable};
use crate::application::render::{PdfOptions, RenderError, RenderPool};
use crate::cache::PdfCache;

const SOURCE: &str = "application::pipeline";

const METRIC_RENDER_TOTAL: &str = "torchio_pdf_render_total";
const METRIC_RENDER_FAILURE: &str = "torchio_pdf_render_failure_total";
const METRIC_RENDER_MS: &str = "torchio_pdf_render_ms";
const METRIC_SINGLEFLIGHT_SHARED: &str = "torchio_pdf_singleflight_shared_total";

/// Validated render request handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfRequest {
    pub content: String,
    pub options: PdfOptions,
}

/// Bytes plus the cache disposition of this request.
#[derive(Debug, Clone)]
pub struct PdfOutcome {
    pub bytes: Bytes,
    pub hit: bool,
}

/// Orchestrates the cache-and-dispatch pipeline.
///
/// `handle` is the only entry point: derive the content key, consult the
/// cache, and on a miss render through the bounded pool — deduplicating
/// concurrent renders of the same key — then store the result best-effort.
/// The pipeline never talks to the engine directly and has no branch for
/// cache failures; those are absorbed inside [`PdfCache`].
pub struct PdfPipeline {
    cache: Arc<PdfCache>,
    pool: Arc<RenderPool>,
    flights: FlightTable,
}

impl PdfPipeline {
    pub fn new(cache: Arc<PdfCache>, pool: Arc<RenderPool>) -> Self {
        Self {
            cache,
            pool,
            flights: FlightTable::new(),
        }
    }

    pub async fn handle(&self, request: PdfRequest) -> Result<PdfOutcome, RenderError> {
        let key = self
            .cache
            .key(&request.content, &request.options.fingerprint());

        if let Some(bytes) = self.cache.get(&key).await {
            return Ok(PdfOutcome { bytes, hit: true });
        }

        match self.flights.join(&key) {
            Admission::Follower(rx) => {
                counter!(METRIC_SINGLEFLIGHT_SHARED).increment(1);
                debug!(
                    target_module = SOURCE,
                    op = "pipeline.handle",
                    result = "shared",
                    key = %key,
                    "Attached to in-flight render"
                );
                let bytes = rx.await.map_err(|_| RenderError::WorkerGone)??;
                Ok(PdfOutcome { bytes, hit: false })
            }
            Admission::Leader(guard) => {
                counter!(METRIC_RENDER_TOTAL).increment(1);
                let started_at = Instant::now();
                let outcome = self
                    .pool
                    .submit(request.content, request.options)
                    .await;
                histogram!(METRIC_RENDER_MS)
                    .record(started_at.elapsed().as_secs_f64() * 1000.0);

                if let Ok(bytes) = outcome.as_ref() {
                    // Best-effort write; a dropped entry only costs a later re-render.
                    let _ = self.cache.put(&key, bytes).await;
                } else {
                    counter!(METRIC_RENDER_FAILURE).increment(1);
                }

                guard.complete(&outcome);
                let bytes = outcome?;
                Ok(PdfOutcome { bytes, hit: false })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        fs,
        num::NonZeroUsize,
        path::Path,
        sync::{
            Condvar, Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;

    use crate::application::render::{PdfEngine, PdfOptions};
    use crate::cache::{CacheConfig, CacheError, KeyValueBackend, MemoryBackend};

    const DOC: &str = "<html><body>A</body></html>";

    struct CountingEngine {
        invocations: AtomicUsize,
    }

    impl CountingEngine {
        fn new() -> Self {
            Self {
                invocations: AtomicUsize::new(0),
            }
        }
    }

    impl PdfEngine for CountingEngine {
        fn render(&self, document: &Path, _options: &PdfOptions) -> Result<Vec<u8>, RenderError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            let source = fs::read(document).map_err(|err| RenderError::Io(err.to_string()))?;
            let mut rendered = b"%PDF-1.7 ".to_vec();
            rendered.extend_from_slice(&source);
            Ok(rendered)
        }
    }

    struct FailingEngine;

    impl PdfEngine for FailingEngine {
        fn render(&self, _document: &Path, _options: &PdfOptions) -> Result<Vec<u8>, RenderError> {
            Err(RenderError::Engine {
                exit_code: Some(1),
                stderr: "parse failure".to_string(),
            })
        }
    }

    /// Engine whose first render blocks until the test releases it, so
    /// followers can deterministically attach to the in-flight entry.
    struct GatedEngine {
        invocations: AtomicUsize,
        started: AtomicUsize,
        gate: Mutex<bool>,
        released: Condvar,
    }

    impl GatedEngine {
        fn new() -> Self {
            Self {
                invocations: AtomicUsize::new(0),
                started: AtomicUsize::new(0),
                gate: Mutex::new(false),
                released: Condvar::new(),
            }
        }

        fn release(&self) {
            let mut open = self.gate.lock().expect("gate lock");
            *open = true;
            self.released.notify_all();
        }
    }

    impl PdfEngine for GatedEngine {
        fn render(&self, _document: &Path, _options: &PdfOptions) -> Result<Vec<u8>, RenderError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            self.started.fetch_add(1, Ordering::SeqCst);
            let mut open = self.gate.lock().expect("gate lock");
            while !*open {
                open = self.released.wait(open).expect("gate wait");
            }
            Ok(b"%PDF-1.7 gated".to_vec())
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl KeyValueBackend for FailingBackend {
        async fn fetch(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            Err(CacheError::Connection("connection refused".to_string()))
        }

        async fn store(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Connection("connection refused".to_string()))
        }
    }

    fn pipeline_with(
        engine: Arc<dyn PdfEngine>,
        backend: Arc<dyn KeyValueBackend>,
        workers: usize,
    ) -> (PdfPipeline, Arc<PdfCache>) {
        let cache = Arc::new(PdfCache::new(backend, CacheConfig::default()));
        let pool = Arc::new(RenderPool::new(
            engine,
            NonZeroUsize::new(workers).expect("non-zero"),
        ));
        (PdfPipeline::new(Arc::clone(&cache), pool), cache)
    }

    fn request(content: &str) -> PdfRequest {
        PdfRequest {
            content: content.to_string(),
            options: PdfOptions::default(),
        }
    }

    #[tokio::test]
    async fn miss_then_hit_renders_exactly_once() {
        let engine = Arc::new(CountingEngine::new());
        let (pipeline, _cache) =
            pipeline_with(engine.clone(), Arc::new(MemoryBackend::new()), 2);

        let first = pipeline.handle(request(DOC)).await.expect("first render");
        assert!(!first.hit);
        assert_eq!(engine.invocations.load(Ordering::SeqCst), 1);

        let second = pipeline.handle(request(DOC)).await.expect("cached");
        assert!(second.hit);
        assert_eq!(second.bytes, first.bytes);
        assert_eq!(engine.invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_options_render_separately() {
        let engine = Arc::new(CountingEngine::new());
        let (pipeline, _cache) =
            pipeline_with(engine.clone(), Arc::new(MemoryBackend::new()), 2);

        pipeline.handle(request(DOC)).await.expect("a4 render");

        let letter = PdfRequest {
            content: DOC.to_string(),
            options: PdfOptions {
                page_size: "Letter".parse().expect("page size"),
                ..Default::default()
            },
        };
        let outcome = pipeline.handle(letter).await.expect("letter render");
        assert!(!outcome.hit);
        assert_eq!(engine.invocations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unreachable_store_never_fails_a_request() {
        let engine = Arc::new(CountingEngine::new());
        let (pipeline, _cache) = pipeline_with(engine.clone(), Arc::new(FailingBackend), 2);

        for _ in 0..2 {
            let outcome = pipeline.handle(request(DOC)).await.expect("rendered");
            assert!(!outcome.hit);
            assert!(outcome.bytes.starts_with(b"%PDF-1.7"));
        }
        // Every request took the render path while the store was down.
        assert_eq!(engine.invocations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_render_writes_no_cache_entry() {
        let backend = Arc::new(MemoryBackend::new());
        let (pipeline, cache) = pipeline_with(Arc::new(FailingEngine), backend, 2);

        let err = pipeline
            .handle(request("<bad-markup"))
            .await
            .expect_err("render failure surfaces");
        assert!(matches!(err, RenderError::Engine { .. }));

        let key = cache.key("<bad-markup", &PdfOptions::default().fingerprint());
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_identical_requests_share_one_render() {
        let engine = Arc::new(GatedEngine::new());
        let (pipeline, _cache) =
            pipeline_with(engine.clone(), Arc::new(MemoryBackend::new()), 4);
        let pipeline = Arc::new(pipeline);

        let leader = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            async move { pipeline.handle(request(DOC)).await }
        });

        // Wait for the leader to occupy the engine before the followers join.
        while engine.started.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let followers: Vec<_> = (0..3)
            .map(|_| {
                tokio::spawn({
                    let pipeline = Arc::clone(&pipeline);
                    async move { pipeline.handle(request(DOC)).await }
                })
            })
            .collect();

        // Give the followers time to attach to the in-flight entry.
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.release();

        let lead_outcome = leader.await.expect("join").expect("leader render");
        assert!(!lead_outcome.hit);
        for follower in followers {
            let outcome = follower.await.expect("join").expect("shared render");
            assert!(!outcome.hit);
            assert_eq!(outcome.bytes, lead_outcome.bytes);
        }

        assert_eq!(engine.invocations.load(Ordering::SeqCst), 1);

        // The shared result was cached; the next request is a plain hit.
        let cached = pipeline.handle(request(DOC)).await.expect("cached");
        assert!(cached.hit);
        assert_eq!(engine.invocations.load(Ordering::SeqCst), 1);
    }
}
