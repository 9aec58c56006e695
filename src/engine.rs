// Ingest engine: one configuration, any number of documents
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, info_span, warn};

use crate::aggregate::ResultAggregator;
use crate::batch::{BatchScheduler, PagePool};
use crate::config::EngineConfig;
use crate::pdf_extraction::{DocumentLoader, LoadedDocument, PageExtractor};
use crate::progress::ProgressReporter;
use crate::thumbnail::ThumbnailRenderer;
use crate::types::{IngestError, PageRecord, ParseResult, Result};

/// Cooperative cancellation, checked before every batch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Parses documents with a fixed configuration. Calls share no state
/// besides the configuration and the worker pool, and the engine is cheap
/// to clone.
#[derive(Clone)]
pub struct IngestEngine {
    config: Arc<EngineConfig>,
    loader: DocumentLoader,
    scheduler: BatchScheduler,
    extractor: PageExtractor,
    thumbnails: Option<ThumbnailRenderer>,
    pool: Arc<PagePool>,
}

impl std::fmt::Debug for IngestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestEngine").field("config", &self.config).finish_non_exhaustive()
    }
}

impl IngestEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let pool = PagePool::new(config.workers)?;
        debug!(?config, "ingest engine configured");
        Ok(Self {
            loader: DocumentLoader::new(config.max_file_size),
            scheduler: BatchScheduler::new(config.batch_size),
            extractor: PageExtractor::new(config.extract_annotations),
            thumbnails: config
                .generate_thumbnails
                .then(|| ThumbnailRenderer::new(config.thumbnail_max_edge)),
            pool: Arc::new(pool),
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ingest(&self, path: impl AsRef<Path>) -> Result<ParseResult> {
        self.ingest_with_cancel(path, &CancelToken::new())
    }

    pub fn ingest_with_cancel(&self, path: impl AsRef<Path>, cancel: &CancelToken) -> Result<ParseResult> {
        let path = path.as_ref();
        let started = Instant::now();
        let loaded = self.loader.load(path)?;

        let span = info_span!("ingest", file = %loaded.file_name);
        let _guard = span.enter();

        let total_pages = loaded.page_count();
        let mut reporter = ProgressReporter::new(
            self.config.progress_sink.as_deref(),
            total_pages,
            self.thumbnails.is_some(),
        );
        let mut aggregator = ResultAggregator::new(&loaded, started, self.thumbnails.is_some());

        for (index, pages) in self.scheduler.batches(total_pages).enumerate() {
            if cancel.is_cancelled() {
                let pages_completed = aggregator.pages_completed();
                info!(pages_completed, "ingest cancelled");
                return Err(IngestError::Cancelled { pages_completed });
            }
            let records = self.pool.run(pages.clone(), |page| self.process_page(&loaded, page));
            // Records are in page order, so the first error is the lowest page.
            for record in records {
                aggregator.push(record?);
            }
            debug!(batch = index + 1, first = pages.start(), last = pages.end(), "batch complete");
            reporter.batch_completed(&pages);
        }

        let result = aggregator.finish();
        info!(
            pages = result.total_pages,
            elapsed_ms = result.parse_time_ms,
            "ingest complete"
        );
        Ok(result)
    }

    /// Runs `ingest` on the blocking thread pool of the current tokio runtime.
    pub async fn ingest_async(&self, path: impl Into<PathBuf>) -> Result<ParseResult> {
        let engine = self.clone();
        let path = path.into();
        tokio::task::spawn_blocking(move || engine.ingest(&path))
            .await
            .map_err(|e| IngestError::parse(format!("ingest task failed: {e}")))?
    }

    fn process_page(&self, loaded: &LoadedDocument, page_number: u32) -> Result<PageRecord> {
        let extracted = self.extractor.extract(loaded, page_number)?;
        let mut record = extracted.record;
        if let Some(renderer) = &self.thumbnails {
            match renderer.render(loaded.document(), &extracted.content) {
                Ok(thumbnail) => record.thumbnail = Some(Arc::new(thumbnail)),
                Err(e) => warn!(page = page_number, error = %e, "thumbnail rendering failed"),
            }
        }
        Ok(record)
    }
}
