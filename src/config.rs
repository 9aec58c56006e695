// Engine configuration
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::progress::ProgressSink;
use crate::types::{IngestError, Result};

pub const DEFAULT_BATCH_SIZE: usize = 25;
pub const DEFAULT_WORKERS: usize = 1;
pub const DEFAULT_THUMBNAIL_MAX_EDGE: u32 = 256;
pub const THUMBNAIL_EDGE_RANGE: std::ops::RangeInclusive<u32> = 16..=4096;

/// Environment variable naming the config file picked up by the binary.
pub const CONFIG_ENV_VAR: &str = "BLUEPRINT_INGEST_CONFIG";

/// Immutable engine settings, fixed at construction.
#[derive(Clone)]
pub struct EngineConfig {
    pub batch_size: usize,
    pub generate_thumbnails: bool,
    pub extract_annotations: bool,
    pub workers: usize,
    pub thumbnail_max_edge: u32,
    pub max_file_size: Option<u64>,
    pub progress_sink: Option<Arc<dyn ProgressSink>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            generate_thumbnails: false,
            extract_annotations: false,
            workers: DEFAULT_WORKERS,
            thumbnail_max_edge: DEFAULT_THUMBNAIL_MAX_EDGE,
            max_file_size: None,
            progress_sink: None,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("batch_size", &self.batch_size)
            .field("generate_thumbnails", &self.generate_thumbnails)
            .field("extract_annotations", &self.extract_annotations)
            .field("workers", &self.workers)
            .field("thumbnail_max_edge", &self.thumbnail_max_edge)
            .field("max_file_size", &self.max_file_size)
            .field("progress_sink", &self.progress_sink.is_some())
            .finish()
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Parse a TOML config. The progress sink is never part of a file.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(source).map_err(|e| IngestError::InvalidConfig(e.to_string()))?;
        let config = file.into_config();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path).map_err(|e| {
            IngestError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(IngestError::InvalidConfig("batch_size must be positive".into()));
        }
        if self.workers == 0 {
            return Err(IngestError::InvalidConfig("workers must be positive".into()));
        }
        if !THUMBNAIL_EDGE_RANGE.contains(&self.thumbnail_max_edge) {
            return Err(IngestError::InvalidConfig(format!(
                "thumbnail_max_edge must be within {}..={}",
                THUMBNAIL_EDGE_RANGE.start(),
                THUMBNAIL_EDGE_RANGE.end()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default = "default_batch_size")]
    batch_size: usize,
    #[serde(default)]
    generate_thumbnails: bool,
    #[serde(default)]
    extract_annotations: bool,
    #[serde(default = "default_workers")]
    workers: usize,
    #[serde(default = "default_thumbnail_max_edge")]
    thumbnail_max_edge: u32,
    #[serde(default)]
    max_file_size: Option<u64>,
}

fn default_batch_size() -> usize { DEFAULT_BATCH_SIZE }
fn default_workers() -> usize { DEFAULT_WORKERS }
fn default_thumbnail_max_edge() -> u32 { DEFAULT_THUMBNAIL_MAX_EDGE }

impl ConfigFile {
    fn into_config(self) -> EngineConfig {
        EngineConfig {
            batch_size: self.batch_size,
            generate_thumbnails: self.generate_thumbnails,
            extract_annotations: self.extract_annotations,
            workers: self.workers,
            thumbnail_max_edge: self.thumbnail_max_edge,
            max_file_size: self.max_file_size,
            progress_sink: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn generate_thumbnails(mut self, enabled: bool) -> Self {
        self.config.generate_thumbnails = enabled;
        self
    }

    pub fn extract_annotations(mut self, enabled: bool) -> Self {
        self.config.extract_annotations = enabled;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn thumbnail_max_edge(mut self, pixels: u32) -> Self {
        self.config.thumbnail_max_edge = pixels;
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.config.max_file_size = Some(bytes);
        self
    }

    pub fn progress_sink(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.config.progress_sink = Some(Arc::new(sink));
        self
    }

    pub fn shared_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.config.progress_sink = Some(sink);
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}
