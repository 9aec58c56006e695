// Document loading and validation
use std::path::Path;

use lopdf::{Document, Object, ObjectId};
use tracing::{debug, info};

use super::metadata::read_metadata;
use crate::types::{DocumentMetadata, IngestError, Result};

/// Stream types extraction never reads. They are dropped while parsing.
const SKIPPED_STREAM_TYPES: &[&str] = &["EmbeddedFile", "Metadata"];

/// Validates a path and opens the document's object graph.
///
/// Memory: the file is read whole and its cross-reference table walked once,
/// so opening costs roughly twice the file size until the raw buffer is
/// released. After that the loaded document holds every object except
/// attachments and XMP packets, with content streams still compressed. A
/// page's streams are decoded only while its batch is being extracted, so
/// decoded content scales with batch size, not page count.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentLoader {
    max_file_size: Option<u64>,
}

/// An opened document. The file handle is already closed.
#[derive(Debug)]
pub struct LoadedDocument {
    document: Document,
    pages: Vec<ObjectId>,
    pub file_name: String,
    pub file_size: u64,
    pub metadata: DocumentMetadata,
}

impl LoadedDocument {
    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    /// Object id of page `page_number` (1-based).
    pub fn page_id(&self, page_number: u32) -> Option<ObjectId> {
        let index = page_number.checked_sub(1)?;
        self.pages.get(index as usize).copied()
    }
}

impl DocumentLoader {
    pub fn new(max_file_size: Option<u64>) -> Self {
        Self { max_file_size }
    }

    pub fn load(&self, path: &Path) -> Result<LoadedDocument> {
        let not_found = |source: Option<std::io::Error>| IngestError::FileNotFound {
            path: path.to_path_buf(),
            source,
        };

        let stat = std::fs::metadata(path).map_err(|e| not_found(Some(e)))?;
        if !stat.is_file() {
            return Err(not_found(None));
        }
        let file_size = stat.len();
        if let Some(limit) = self.max_file_size {
            if file_size > limit {
                return Err(IngestError::FileTooLarge { size: file_size, limit });
            }
        }

        let document = Document::load_filtered(path, skip_unused_streams).map_err(|e| match e {
            lopdf::Error::IO(e) if e.kind() == std::io::ErrorKind::NotFound => not_found(Some(e)),
            e => IngestError::parse(format!("unreadable document structure: {e}")),
        })?;

        if document.trailer.has(b"Encrypt") {
            return Err(IngestError::parse("document is encrypted"));
        }
        let pages: Vec<ObjectId> = document.get_pages().into_values().collect();
        if pages.is_empty() {
            return Err(IngestError::parse("document has no pages"));
        }

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let metadata = read_metadata(&document);
        debug!(file = %file_name, version = %document.version, objects = document.objects.len(), "document structure loaded");
        info!(file = %file_name, pages = pages.len(), bytes = file_size, "document opened");

        Ok(LoadedDocument { document, pages, file_name, file_size, metadata })
    }
}

fn skip_unused_streams(id: ObjectId, object: &mut Object) -> Option<(ObjectId, Object)> {
    let Object::Stream(stream) = object else {
        return Some((id, object.clone()));
    };
    if stream.dict.type_name().is_ok_and(|t| SKIPPED_STREAM_TYPES.contains(&t)) {
        return None;
    }
    // Streams never live inside object streams, so the reader keeps the
    // original and ignores what is returned here.
    Some((id, Object::Null))
}
