// Per-page extraction: geometry, rotation, image presence, text
use lopdf::content::Operation;
use lopdf::{Dictionary, Object};
use tracing::{debug, warn};

use super::annotations::annotation_texts;
use super::interpreter::{ContentSink, Interpreter, Matrix, TextRun};
use super::lexer::parse_content;
use super::loader::LoadedDocument;
use super::lopdf_helper::{inherited, integer, page_dictionary, rectangle, resolve, resolve_dict, DEFAULT_PAGE_BOX};
use super::streams::{decode_stream, StreamError};
use crate::types::{IngestError, PageRecord, Result, Rotation};

/// Gap between runs, in fractions of the font size, that reads as a space.
const WORD_GAP: f32 = 0.2;
/// Baseline shift, in fractions of the font size, that starts a new line.
const LINE_SHIFT: f32 = 0.5;
/// Downward jumps larger than this many font sizes start a new paragraph.
const PARAGRAPH_JUMP: f32 = 2.0;

/// A decoded page, kept alive for thumbnail rendering.
#[derive(Debug)]
pub struct PageContent<'d> {
    pub page_number: u32,
    pub operations: Vec<Operation>,
    pub resources: Option<&'d Dictionary>,
    /// Visible box `[x0, y0, x1, y1]` in default user space.
    pub page_box: [f32; 4],
    pub rotation: Rotation,
}

#[derive(Debug)]
pub struct ExtractedPage<'d> {
    pub record: PageRecord,
    pub content: PageContent<'d>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PageExtractor {
    extract_annotations: bool,
}

impl PageExtractor {
    pub fn new(extract_annotations: bool) -> Self {
        Self { extract_annotations }
    }

    /// Extract page `page_number` (1-based). Errors are fatal for the
    /// document; field-level trouble is logged and leaves the field empty.
    pub fn extract<'d>(&self, loaded: &'d LoadedDocument, page_number: u32) -> Result<ExtractedPage<'d>> {
        let document = loaded.document();
        let id = loaded
            .page_id(page_number)
            .ok_or_else(|| IngestError::page(page_number, "page is not in the page tree"))?;
        let page = page_dictionary(document, id)
            .ok_or_else(|| IngestError::page(page_number, "page object is not a dictionary"))?;

        let page_box = inherited(document, page, b"CropBox")
            .and_then(|b| rectangle(document, b))
            .or_else(|| inherited(document, page, b"MediaBox").and_then(|b| rectangle(document, b)))
            .unwrap_or(DEFAULT_PAGE_BOX);
        let rotation = inherited(document, page, b"Rotate")
            .and_then(integer)
            .map(|raw| {
                Rotation::from_degrees(raw).unwrap_or_else(|| {
                    debug!(page = page_number, raw, "ignoring rotation that is not a quarter turn");
                    Rotation::Deg0
                })
            })
            .unwrap_or_default();
        let resources = inherited(document, page, b"Resources").and_then(|r| resolve_dict(document, r));

        let operations = page_operations(loaded, page, page_number)?;

        let mut collector = TextCollector::default();
        let mut interpreter = Interpreter::new(document);
        interpreter.run(&operations, resources, Matrix::IDENTITY, &mut collector);
        let diagnostics = interpreter.into_diagnostics();
        if !diagnostics.is_clean() {
            warn!(
                page = page_number,
                missing_fonts = ?diagnostics.missing_fonts,
                unmapped_glyphs = diagnostics.unmapped_glyphs,
                broken_xobjects = diagnostics.broken_xobjects,
                "page text partially decoded"
            );
        }

        let annotations = self
            .extract_annotations
            .then(|| annotation_texts(document, page, page_number));

        let record = PageRecord {
            page_number,
            width: f64::from(page_box[2] - page_box[0]),
            height: f64::from(page_box[3] - page_box[1]),
            rotation,
            has_images: collector.has_images,
            text: collector.finish(),
            annotations,
            thumbnail: None,
        };
        Ok(ExtractedPage {
            record,
            content: PageContent { page_number, operations, resources, page_box, rotation },
        })
    }
}

/// Decode and tokenize the page's own content streams. Damage here is
/// fatal; an encoding we cannot read only empties the page.
fn page_operations(loaded: &LoadedDocument, page: &Dictionary, page_number: u32) -> Result<Vec<Operation>> {
    let document = loaded.document();
    let Ok(contents) = page.get(b"Contents") else {
        return Ok(Vec::new());
    };
    let parts: Vec<&Object> = match resolve(document, contents) {
        Some(Object::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
        None => return Err(IngestError::page(page_number, "content stream is missing")),
    };

    let mut data = Vec::new();
    for part in parts {
        let stream = match resolve(document, part) {
            Some(Object::Stream(stream)) => stream,
            Some(Object::Null) => continue,
            _ => return Err(IngestError::page(page_number, "content stream is missing")),
        };
        match decode_stream(document, stream) {
            Ok(bytes) => {
                data.extend_from_slice(&bytes);
                data.push(b'\n');
            }
            Err(e @ StreamError::Corrupt { .. }) => return Err(IngestError::page(page_number, e.to_string())),
            Err(e @ StreamError::Unsupported(_)) => {
                warn!(page = page_number, error = %e, "skipping page content");
                return Ok(Vec::new());
            }
        }
    }
    parse_content(&data).map_err(|e| IngestError::page(page_number, e.to_string()))
}

#[derive(Debug, Clone, Copy)]
struct Pen {
    x: f32,
    y: f32,
    /// Unit baseline direction.
    dir: (f32, f32),
    size: f32,
}

/// Lays text runs out in reading order as they were painted.
#[derive(Debug, Default)]
struct TextCollector {
    text: String,
    pen: Option<Pen>,
    has_images: bool,
}

impl TextCollector {
    fn finish(mut self) -> String {
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
        self.text
    }

    fn break_line(&mut self, paragraph: bool) {
        if self.text.is_empty() {
            return;
        }
        if !self.text.ends_with('\n') {
            self.text.push('\n');
        }
        if paragraph && !self.text.ends_with("\n\n") {
            self.text.push('\n');
        }
    }
}

impl ContentSink for TextCollector {
    fn show_text(&mut self, run: &TextRun<'_>) {
        let (x0, y0) = run.start();
        let (x1, y1) = run.end();
        let size = run.user_size();
        let dir = {
            let (dx, dy) = (run.matrix.a, run.matrix.b);
            let len = (dx * dx + dy * dy).sqrt();
            if len > f32::EPSILON { (dx / len, dy / len) } else { (1.0, 0.0) }
        };

        if let Some(pen) = self.pen {
            let same_direction = pen.dir.0 * dir.0 + pen.dir.1 * dir.1 > 0.99;
            let (vx, vy) = (x0 - pen.x, y0 - pen.y);
            let along = vx * pen.dir.0 + vy * pen.dir.1;
            let across = vy * pen.dir.0 - vx * pen.dir.1;
            let scale = pen.size.max(size);
            if !same_direction || across.abs() > LINE_SHIFT * scale {
                self.break_line(across < -PARAGRAPH_JUMP * scale);
            } else if along > WORD_GAP * scale
                && !run.text.is_empty()
                && !self.text.ends_with(char::is_whitespace)
                && !run.text.starts_with(char::is_whitespace)
            {
                self.text.push(' ');
            }
        }

        self.text.push_str(run.text);
        self.pen = Some(Pen { x: x1, y: y1, dir, size });
    }

    fn image(&mut self, _ctm: &Matrix) {
        self.has_images = true;
    }
}
