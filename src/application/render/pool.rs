use std::{io::Write, num::NonZeroUsize, sync::Arc};

use bytes::Bytes;
use tokio::sync::Semaphore;
use tracing::warn;

use super::types::{PdfEngine, PdfOptions, RenderError};

const SOURCE: &str = "application::render::pool";

/// Bounded pool that isolates CPU-bound rendering from the serving loop.
///
/// Each submission waits for one of the fixed worker permits, then runs the
/// engine on the blocking thread pool. Submissions beyond capacity queue on
/// the semaphore; none are rejected.
pub struct RenderPool {
    engine: Arc<dyn PdfEngine>,
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl RenderPool {
    pub fn new(engine: Arc<dyn PdfEngine>, workers: NonZeroUsize) -> Self {
        Self {
            engine,
            permits: Arc::new(Semaphore::new(workers.get())),
            capacity: workers.get(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Render `content` with the engine, awaiting a free worker slot.
    ///
    /// The document is materialised into a named temporary file for the
    /// engine; the file is removed on every exit path, including engine
    /// failure, when the handle drops at the end of the worker closure.
    pub async fn submit(&self, content: String, options: PdfOptions) -> Result<Bytes, RenderError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| RenderError::WorkerGone)?;
        let engine = Arc::clone(&self.engine);

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;

            let mut document = tempfile::Builder::new()
                .suffix(".html")
                .tempfile()
                .map_err(|err| RenderError::Io(err.to_string()))?;
            document
                .write_all(content.as_bytes())
                .map_err(|err| RenderError::Io(err.to_string()))?;
            document
                .flush()
                .map_err(|err| RenderError::Io(err.to_string()))?;

            engine.render(document.path(), &options).map(Bytes::from)
        });

        match handle.await {
            Ok(result) => result,
            Err(err) => {
                warn!(
                    target_module = SOURCE,
                    op = "pool.submit",
                    result = "worker_gone",
                    error = %err,
                    "Render worker terminated before completing"
                );
                Err(RenderError::WorkerGone)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        fs,
        path::{Path, PathBuf},
        sync::atomic::{AtomicUsize, Ordering},
        sync::Mutex,
        thread,
        time::Duration,
    };

    /// Engine stub that tracks concurrency and echoes the document back.
    struct InstrumentedEngine {
        active: AtomicUsize,
        peak: AtomicUsize,
        invocations: AtomicUsize,
        hold: Duration,
        last_document: Mutex<Option<PathBuf>>,
    }

    impl InstrumentedEngine {
        fn with_hold(hold: Duration) -> Self {
            Self {
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                invocations: AtomicUsize::new(0),
                hold,
                last_document: Mutex::new(None),
            }
        }
    }

    impl PdfEngine for InstrumentedEngine {
        fn render(&self, document: &Path, _options: &PdfOptions) -> Result<Vec<u8>, RenderError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.invocations.fetch_add(1, Ordering::SeqCst);
            *self.last_document.lock().expect("lock") = Some(document.to_path_buf());

            let source = fs::read(document).map_err(|err| RenderError::Io(err.to_string()))?;
            if !self.hold.is_zero() {
                thread::sleep(self.hold);
            }

            self.active.fetch_sub(1, Ordering::SeqCst);
            let mut rendered = b"%PDF-1.7 ".to_vec();
            rendered.extend_from_slice(&source);
            Ok(rendered)
        }
    }

    struct FailingEngine {
        last_document: Mutex<Option<PathBuf>>,
    }

    impl PdfEngine for FailingEngine {
        fn render(&self, document: &Path, _options: &PdfOptions) -> Result<Vec<u8>, RenderError> {
            *self.last_document.lock().expect("lock") = Some(document.to_path_buf());
            Err(RenderError::Engine {
                exit_code: Some(1),
                stderr: "parse failure".to_string(),
            })
        }
    }

    fn pool_of(engine: Arc<dyn PdfEngine>, workers: usize) -> RenderPool {
        RenderPool::new(engine, NonZeroUsize::new(workers).expect("non-zero"))
    }

    #[tokio::test]
    async fn materialises_document_for_the_engine() {
        let engine = Arc::new(InstrumentedEngine::with_hold(Duration::ZERO));
        let pool = pool_of(engine.clone(), 1);

        let bytes = pool
            .submit("<html><body>A</body></html>".to_string(), PdfOptions::default())
            .await
            .expect("rendered");
        assert_eq!(&bytes[..], b"%PDF-1.7 <html><body>A</body></html>");

        let document = engine
            .last_document
            .lock()
            .expect("lock")
            .clone()
            .expect("document path recorded");
        assert!(!document.exists(), "temp document should be released");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_submissions_never_exceed_capacity() {
        let engine = Arc::new(InstrumentedEngine::with_hold(Duration::from_millis(30)));
        let pool = Arc::new(pool_of(engine.clone(), 2));

        let submissions = (0..8).map(|i| {
            let pool = Arc::clone(&pool);
            async move {
                pool.submit(format!("<html><body>{i}</body></html>"), PdfOptions::default())
                    .await
            }
        });
        let results = futures::future::join_all(submissions).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(engine.invocations.load(Ordering::SeqCst), 8);
        assert!(
            engine.peak.load(Ordering::SeqCst) <= 2,
            "peak concurrency {} exceeded pool capacity",
            engine.peak.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn engine_failure_propagates_and_releases_the_document() {
        let engine = Arc::new(FailingEngine {
            last_document: Mutex::new(None),
        });
        let pool = pool_of(engine.clone(), 1);

        let err = pool
            .submit("<bad-markup".to_string(), PdfOptions::default())
            .await
            .expect_err("engine failure surfaces");
        assert!(matches!(err, RenderError::Engine { .. }));

        let document = engine
            .last_document
            .lock()
            .expect("lock")
            .clone()
            .expect("document path recorded");
        assert!(!document.exists(), "temp document should be released");
    }

    #[tokio::test]
    async fn failed_submission_frees_its_worker_slot() {
        let engine = Arc::new(FailingEngine {
            last_document: Mutex::new(None),
        });
        let pool = pool_of(engine, 1);

        for _ in 0..3 {
            let err = pool
                .submit("<bad-markup".to_string(), PdfOptions::default())
                .await
                .expect_err("engine failure surfaces");
            assert!(matches!(err, RenderError::Engine { .. }));
        }
    }
}
