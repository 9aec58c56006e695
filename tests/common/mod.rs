// Shared fixtures: small PDFs built in memory with lopdf
#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use blueprint_ingest::ProgressEvent;
use flate2::{write::ZlibEncoder, Compression};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};

/// Page-level damage the extractor tolerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Content encoded with a filter the extractor does not decode.
    UnsupportedFilter,
    /// Flate content with `DecodeParms`, decoded through lopdf.
    DecodeParms,
    /// Text set in a font missing from the resources.
    MissingFont,
    /// Paints an XObject missing from the resources.
    MissingXObject,
    /// `/Annots` lists an object that does not exist.
    DanglingAnnotation,
}

#[derive(Debug, Clone, Default)]
pub struct PageSpec {
    pub lines: Vec<String>,
    pub image: bool,
    pub inline_image: bool,
    pub annotations: Vec<String>,
    pub rotate: Option<i64>,
    pub media_box: Option<[i64; 4]>,
    pub crop_box: Option<[i64; 4]>,
    /// Content stream claims FlateDecode but holds garbage.
    pub corrupt: bool,
    pub fault: Option<Fault>,
}

impl PageSpec {
    pub fn text(lines: &[&str]) -> Self {
        Self { lines: lines.iter().map(|l| l.to_string()).collect(), ..Self::default() }
    }

    pub fn with_image(mut self) -> Self {
        self.image = true;
        self
    }

    pub fn with_inline_image(mut self) -> Self {
        self.inline_image = true;
        self
    }

    pub fn with_annotations(mut self, notes: &[&str]) -> Self {
        self.annotations = notes.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn rotated(mut self, degrees: i64) -> Self {
        self.rotate = Some(degrees);
        self
    }

    pub fn media_box(mut self, rect: [i64; 4]) -> Self {
        self.media_box = Some(rect);
        self
    }

    pub fn crop_box(mut self, rect: [i64; 4]) -> Self {
        self.crop_box = Some(rect);
        self
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn corrupt() -> Self {
        Self { corrupt: true, ..Self::default() }
    }

    /// What the extractor should produce for this page.
    pub fn expected_text(&self) -> String {
        if self.lines.is_empty() {
            String::new()
        } else {
            format!("{}\n", self.lines.join("\n"))
        }
    }
}

/// The `n`th page of a generated manual.
pub fn manual_page(n: u32) -> PageSpec {
    let mut spec = PageSpec::text(&[&format!("Page {n}"), &format!("SECTION {:02} 00 00", n % 50)]);
    if n % 4 == 0 {
        spec = spec.with_image();
    }
    if n % 10 == 0 {
        spec = spec.with_annotations(&[&format!("Check detail {n}")]);
    }
    spec
}

#[derive(Debug, Clone, Default)]
pub struct PdfBuilder {
    pages: Vec<PageSpec>,
    title: Option<String>,
    creation_date: Option<String>,
}

impl PdfBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, spec: PageSpec) -> Self {
        self.pages.push(spec);
        self
    }

    pub fn pages(mut self, count: u32, spec: impl Fn(u32) -> PageSpec) -> Self {
        self.pages.extend((1..=count).map(spec));
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn creation_date(mut self, date: &str) -> Self {
        self.creation_date = Some(date.to_string());
        self
    }

    pub fn specs(&self) -> &[PageSpec] {
        &self.pages
    }

    pub fn expected_text(&self) -> String {
        self.pages.iter().map(PageSpec::expected_text).collect()
    }

    pub fn build(&self) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 1,
                "Height" => 1,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            vec![0x80],
        ));
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
            "XObject" => dictionary! { "Im1" => image_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for spec in &self.pages {
            let page_id = add_page(&mut doc, pages_id, spec);
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "Resources" => resources_id,
                "MediaBox" => vec![Object::from(0), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        if self.title.is_some() || self.creation_date.is_some() {
            let mut info = lopdf::Dictionary::new();
            if let Some(title) = &self.title {
                info.set("Title", Object::string_literal(title.as_str()));
            }
            if let Some(date) = &self.creation_date {
                info.set("CreationDate", Object::string_literal(date.as_str()));
            }
            let info_id = doc.add_object(info);
            doc.trailer.set("Info", info_id);
        }

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    pub fn write(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.build()).unwrap();
        path
    }
}

fn add_page(doc: &mut Document, pages_id: ObjectId, spec: &PageSpec) -> ObjectId {
    let contents = if spec.corrupt {
        Stream::new(dictionary! { "Filter" => "FlateDecode" }, b"this is not deflate data".to_vec())
    } else {
        let data = Content { operations: page_operations(spec) }.encode().unwrap();
        match spec.fault {
            Some(Fault::UnsupportedFilter) => Stream::new(dictionary! { "Filter" => "JBIG2Decode" }, data),
            Some(Fault::DecodeParms) => Stream::new(
                dictionary! {
                    "Filter" => "FlateDecode",
                    "DecodeParms" => dictionary! { "Predictor" => 1 },
                },
                deflate(&data),
            ),
            _ => Stream::new(dictionary! { "Filter" => "FlateDecode" }, deflate(&data)),
        }
    };
    let contents_id = doc.add_object(contents);

    let mut page = dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => contents_id,
    };
    if let Some(rect) = spec.media_box {
        page.set("MediaBox", rect.iter().map(|&v| Object::Integer(v)).collect::<Vec<_>>());
    }
    if let Some(rect) = spec.crop_box {
        page.set("CropBox", rect.iter().map(|&v| Object::Integer(v)).collect::<Vec<_>>());
    }
    if let Some(rotate) = spec.rotate {
        page.set("Rotate", rotate);
    }
    if !spec.annotations.is_empty() {
        let mut annots: Vec<Object> = spec
            .annotations
            .iter()
            .map(|note| {
                doc.add_object(dictionary! {
                    "Type" => "Annot",
                    "Subtype" => "Text",
                    "Rect" => vec![Object::from(0), 0.into(), 20.into(), 20.into()],
                    "Contents" => Object::string_literal(note.as_str()),
                })
                .into()
            })
            .collect();
        if spec.fault == Some(Fault::DanglingAnnotation) {
            annots.insert(0, Object::Reference((9999, 0)));
        }
        page.set("Annots", annots);
    }
    doc.add_object(page)
}

fn page_operations(spec: &PageSpec) -> Vec<Operation> {
    let mut ops = Vec::new();
    if !spec.lines.is_empty() {
        ops.push(Operation::new("BT", vec![]));
        let font = if spec.fault == Some(Fault::MissingFont) { "F9" } else { "F1" };
        ops.push(Operation::new("Tf", vec![font.into(), 12.into()]));
        ops.push(Operation::new("Td", vec![72.into(), 720.into()]));
        for (i, line) in spec.lines.iter().enumerate() {
            if i > 0 {
                ops.push(Operation::new("Td", vec![0.into(), (-14).into()]));
            }
            ops.push(Operation::new("Tj", vec![Object::string_literal(line.as_str())]));
        }
        ops.push(Operation::new("ET", vec![]));
    }
    if spec.fault == Some(Fault::MissingXObject) {
        ops.push(Operation::new("Do", vec!["Missing".into()]));
    }
    if spec.image {
        ops.push(Operation::new("q", vec![]));
        ops.push(Operation::new(
            "cm",
            vec![200.into(), 0.into(), 0.into(), 150.into(), 72.into(), 300.into()],
        ));
        ops.push(Operation::new("Do", vec!["Im1".into()]));
        ops.push(Operation::new("Q", vec![]));
    }
    ops
}

fn deflate(content: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content).unwrap();
    encoder.finish().unwrap()
}

/// Like `PdfBuilder::write`, but appends a raw inline-image content stream
/// to flagged pages; `Content::encode` can't express `BI ... EI`.
pub fn write_with_inline_images(builder: &PdfBuilder, dir: &Path, name: &str) -> PathBuf {
    let mut doc = Document::load_mem(&builder.build()).unwrap();
    let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
    for (spec, page_id) in builder.specs().iter().zip(pages) {
        if !spec.inline_image {
            continue;
        }
        let raw = b"q 50 0 0 50 100 100 cm BI /W 1 /H 1 /BPC 8 /CS /G ID \x80 EI Q".to_vec();
        let stream_id = doc.add_object(Stream::new(dictionary! {}, raw));
        let page = doc.get_object_mut(page_id).unwrap().as_dict_mut().unwrap();
        let existing = page.get(b"Contents").unwrap().clone();
        page.set("Contents", vec![existing, stream_id.into()]);
    }
    let path = dir.join(name);
    doc.save(&path).unwrap();
    path
}

/// Collects every progress event in order.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<ProgressEvent>>>);

impl EventLog {
    pub fn sink(&self) -> impl Fn(&ProgressEvent) + Send + Sync + 'static {
        let events = Arc::clone(&self.0);
        move |event: &ProgressEvent| events.lock().unwrap().push(event.clone())
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.0.lock().unwrap().clone()
    }

    pub fn percents(&self) -> Vec<u8> {
        self.events().iter().map(|e| e.percent).collect()
    }
}
