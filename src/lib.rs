//! Streaming ingestion of large construction PDFs.
//!
//! An [`IngestEngine`] is configured once and then parses any number of
//! documents into [`ParseResult`]s: per-page geometry, text, optional
//! annotations and thumbnails, plus document metadata. Pages are processed
//! in fixed-size batches with a progress event after each one.
//!
//! ```no_run
//! use blueprint_ingest::{EngineConfig, IngestEngine, ProgressEvent};
//!
//! let config = EngineConfig::builder()
//!     .batch_size(25)
//!     .extract_annotations(true)
//!     .progress_sink(|event: &ProgressEvent| println!("{}% {}", event.percent, event.message))
//!     .build();
//! let engine = IngestEngine::new(config)?;
//! let result = engine.ingest("project-manual.pdf")?;
//! println!("{} pages", result.total_pages);
//! # Ok::<(), blueprint_ingest::IngestError>(())
//! ```

mod aggregate;
pub mod batch;
pub mod config;
pub mod engine;
pub mod pdf_extraction;
pub mod progress;
pub mod thumbnail;
pub mod types;

pub use batch::BatchScheduler;
pub use config::{EngineConfig, EngineConfigBuilder, CONFIG_ENV_VAR};
pub use engine::{CancelToken, IngestEngine};
pub use pdf_extraction::{DocumentLoader, PageExtractor};
pub use progress::{percent_complete, ChannelSink, ProgressEvent, ProgressSink, ProgressStage};
pub use thumbnail::{ThumbnailError, ThumbnailRenderer};
pub use types::{DocumentMetadata, IngestError, PageRecord, ParseResult, Result, Rotation, Thumbnail};
