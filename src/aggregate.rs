// Result aggregation for one ingest call
use std::sync::Arc;
use std::time::Instant;

use crate::pdf_extraction::LoadedDocument;
use crate::types::{DocumentMetadata, PageRecord, ParseResult, Thumbnail};

/// Collects page records in page order. Created fresh for every call, so
/// nothing carries over between documents.
#[derive(Debug)]
pub(crate) struct ResultAggregator {
    started: Instant,
    file_name: String,
    file_size: u64,
    total_pages: u32,
    metadata: DocumentMetadata,
    pages: Vec<PageRecord>,
    text: String,
    thumbnails: Option<Vec<Arc<Thumbnail>>>,
}

impl ResultAggregator {
    pub(crate) fn new(loaded: &LoadedDocument, started: Instant, collect_thumbnails: bool) -> Self {
        let total_pages = loaded.page_count();
        Self {
            started,
            file_name: loaded.file_name.clone(),
            file_size: loaded.file_size,
            total_pages,
            metadata: loaded.metadata.clone(),
            pages: Vec::with_capacity(total_pages as usize),
            text: String::new(),
            thumbnails: collect_thumbnails.then(Vec::new),
        }
    }

    pub(crate) fn pages_completed(&self) -> u32 {
        self.pages.len() as u32
    }

    pub(crate) fn push(&mut self, record: PageRecord) {
        debug_assert_eq!(record.page_number, self.pages_completed() + 1, "pages must arrive in order");
        self.text.push_str(&record.text);
        if let (Some(thumbnails), Some(thumbnail)) = (self.thumbnails.as_mut(), record.thumbnail.as_ref()) {
            thumbnails.push(Arc::clone(thumbnail));
        }
        self.pages.push(record);
    }

    pub(crate) fn finish(self) -> ParseResult {
        debug_assert_eq!(self.pages_completed(), self.total_pages);
        ParseResult {
            file_name: self.file_name,
            file_size: self.file_size,
            total_pages: self.total_pages,
            parse_time_ms: self.started.elapsed().as_millis() as u64,
            text: self.text,
            pages: self.pages,
            metadata: self.metadata,
            thumbnails: self.thumbnails,
        }
    }
}
