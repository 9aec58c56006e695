// Core types for blueprint ingestion
use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine as _;
use chrono::{DateTime, FixedOffset};
use serde::{Serialize, Serializer};

/// Page rotation, normalized to a quarter turn.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "u16")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Normalize a raw `/Rotate` value. Negative values wrap; anything
    /// that is not a multiple of 90 is treated as unrotated.
    pub fn from_degrees(raw: i64) -> Option<Self> {
        if raw % 90 != 0 {
            return None;
        }
        match raw.rem_euclid(360) {
            0 => Some(Rotation::Deg0),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    pub const fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

impl From<Rotation> for u16 {
    fn from(rotation: Rotation) -> u16 {
        rotation.degrees()
    }
}

/// A rendered page preview, PNG encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Thumbnail {
    pub page_number: u32,
    pub width: u32,
    pub height: u32,
    #[serde(serialize_with = "serialize_base64")]
    pub png: Vec<u8>,
}

fn serialize_base64<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Everything extracted from one page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRecord {
    pub page_number: u32,
    pub width: f64,
    pub height: f64,
    pub rotation: Rotation,
    pub has_images: bool,
    pub text: String,
    /// `None` unless annotation extraction is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Vec<String>>,
    /// `None` unless thumbnails are enabled, or when rendering this page failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<Arc<Thumbnail>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub keywords: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub creation_date: Option<DateTime<FixedOffset>>,
    pub modification_date: Option<DateTime<FixedOffset>>,
}

/// The complete output of one ingest call.
///
/// `text` is the plain concatenation of every page's `text` in page order,
/// with no separator inserted. Page texts already end in a newline when
/// they carry any content, so words never run together across pages.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseResult {
    pub file_name: String,
    pub file_size: u64,
    pub total_pages: u32,
    pub parse_time_ms: u64,
    pub text: String,
    pub pages: Vec<PageRecord>,
    pub metadata: DocumentMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnails: Option<Vec<Arc<Thumbnail>>>,
}

impl ParseResult {
    pub fn pages_with_images(&self) -> usize {
        self.pages.iter().filter(|p| p.has_images).count()
    }

    pub fn pages_with_annotations(&self) -> usize {
        self.pages
            .iter()
            .filter(|p| p.annotations.as_ref().is_some_and(|a| !a.is_empty()))
            .count()
    }
}

// Error types
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("file not found or unreadable: {}", path.display())]
    FileNotFound {
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("{}", describe_parse_error(*page, cause))]
    Parse { page: Option<u32>, cause: String },

    #[error("file too large: {size} bytes (limit {limit})")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("ingest cancelled after {pages_completed} pages")]
    Cancelled { pages_completed: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_parse_error(page: Option<u32>, cause: &str) -> String {
    match page {
        Some(page) => format!("PDF parse error on page {page}: {cause}"),
        None => format!("PDF parse error: {cause}"),
    }
}

impl IngestError {
    pub(crate) fn parse(cause: impl Into<String>) -> Self {
        IngestError::Parse {
            page: None,
            cause: cause.into(),
        }
    }

    pub(crate) fn page(page: u32, cause: impl Into<String>) -> Self {
        IngestError::Parse {
            page: Some(page),
            cause: cause.into(),
        }
    }

    /// Page number the failure is attributed to, when known.
    pub fn page_number(&self) -> Option<u32> {
        match self {
            IngestError::Parse { page, .. } => *page,
            _ => None,
        }
    }
}

impl From<lopdf::Error> for IngestError {
    fn from(e: lopdf::Error) -> Self {
        IngestError::parse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
