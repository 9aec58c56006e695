// Content stream interpreter
//
// Walks page operations with a graphics/text state and reports what the
// page would paint to a `ContentSink`. Text extraction, image detection
// and thumbnail rendering are all sinks over the same walk.
use std::collections::HashMap;
use std::sync::Arc;

use lopdf::content::Operation;
use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::debug;

use super::fonts::FontDecoder;
use super::lexer::parse_content;
use super::lopdf_helper::{get, integer, name, number, resolve, resolve_dict};
use super::streams::decode_stream;

/// Form XObjects may nest; deeper chains are ignored.
const MAX_FORM_DEPTH: usize = 8;

/// Affine transform in PDF row-vector convention: `p' = p × M`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix { a: 1.0, b: 0.0, c: 0.0, d: 1.0, e: 0.0, f: 0.0 };

    pub fn new(a: f32, b: f32, c: f32, d: f32, e: f32, f: f32) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn translate(tx: f32, ty: f32) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    fn from_operands(operands: &[Object]) -> Option<Self> {
        if operands.len() < 6 {
            return None;
        }
        let v: Vec<f32> = operands[..6].iter().map(number).collect::<Option<_>>()?;
        Some(Self::new(v[0], v[1], v[2], v[3], v[4], v[5]))
    }

    /// `self` applied first, then `other`.
    pub fn then(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (self.a * x + self.c * y + self.e, self.b * x + self.d * y + self.f)
    }

    /// Length of the transformed unit y vector: how tall one text unit is.
    pub fn vertical_scale(&self) -> f32 {
        (self.c * self.c + self.d * self.d).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaintOp {
    Fill { even_odd: bool },
    Stroke,
    FillStroke { even_odd: bool },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathSegment {
    MoveTo(f32, f32),
    LineTo(f32, f32),
    CurveTo(f32, f32, f32, f32, f32, f32),
    Rect(f32, f32, f32, f32),
    Close,
}

/// One string operand as placed on the page.
#[derive(Debug)]
pub struct TextRun<'a> {
    pub text: &'a str,
    /// Text space to user space at the start of the run (`Tm × CTM`).
    pub matrix: Matrix,
    pub font_size: f32,
    /// Horizontal displacement in text space.
    pub advance: f32,
    pub render_mode: i64,
    pub fill: [u8; 3],
}

impl TextRun<'_> {
    pub fn start(&self) -> (f32, f32) {
        self.matrix.apply(0.0, 0.0)
    }

    pub fn end(&self) -> (f32, f32) {
        self.matrix.apply(self.advance, 0.0)
    }

    /// Font size as it appears in user space.
    pub fn user_size(&self) -> f32 {
        (self.font_size.abs() * self.matrix.vertical_scale()).max(1.0)
    }
}

pub trait ContentSink {
    /// Path construction is skipped entirely unless a sink asks for it.
    fn wants_paths(&self) -> bool {
        false
    }

    fn show_text(&mut self, run: &TextRun<'_>);

    /// An image placed in the unit square under `ctm`.
    fn image(&mut self, ctm: &Matrix);

    fn paint_path(&mut self, _path: &[PathSegment], _op: PaintOp, _state: &GraphicsState) {}
}

#[derive(Debug, Clone)]
pub struct GraphicsState {
    pub ctm: Matrix,
    pub fill: [u8; 3],
    pub stroke: [u8; 3],
    pub line_width: f32,
    font: Option<Arc<FontDecoder>>,
    font_size: f32,
    char_spacing: f32,
    word_spacing: f32,
    horizontal_scale: f32,
    leading: f32,
    rise: f32,
    render_mode: i64,
}

impl GraphicsState {
    fn new(ctm: Matrix) -> Self {
        Self {
            ctm,
            fill: [0, 0, 0],
            stroke: [0, 0, 0],
            line_width: 1.0,
            font: None,
            font_size: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scale: 1.0,
            leading: 0.0,
            rise: 0.0,
            render_mode: 0,
        }
    }
}

/// Problems absorbed during a walk; the page still completes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub missing_fonts: Vec<String>,
    pub unmapped_glyphs: usize,
    pub broken_xobjects: usize,
}

impl Diagnostics {
    pub fn is_clean(&self) -> bool {
        self.missing_fonts.is_empty() && self.unmapped_glyphs == 0 && self.broken_xobjects == 0
    }
}

pub struct Interpreter<'d> {
    document: &'d Document,
    fonts: HashMap<ObjectId, Arc<FontDecoder>>,
    fallback_font: Arc<FontDecoder>,
    forms_in_progress: Vec<ObjectId>,
    diagnostics: Diagnostics,
}

impl<'d> Interpreter<'d> {
    pub fn new(document: &'d Document) -> Self {
        Self {
            document,
            fonts: HashMap::new(),
            fallback_font: Arc::new(FontDecoder::fallback()),
            forms_in_progress: Vec::new(),
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn into_diagnostics(self) -> Diagnostics {
        self.diagnostics
    }

    pub fn run(
        &mut self,
        operations: &[Operation],
        resources: Option<&'d Dictionary>,
        ctm: Matrix,
        sink: &mut dyn ContentSink,
    ) {
        let mut state = GraphicsState::new(ctm);
        self.walk(operations, resources, &mut state, sink);
    }

    fn walk(
        &mut self,
        operations: &[Operation],
        resources: Option<&'d Dictionary>,
        state: &mut GraphicsState,
        sink: &mut dyn ContentSink,
    ) {
        let mut stack: Vec<GraphicsState> = Vec::new();
        let mut text_matrix = Matrix::IDENTITY;
        let mut line_matrix = Matrix::IDENTITY;
        let mut path: Vec<PathSegment> = Vec::new();
        let wants_paths = sink.wants_paths();

        for op in operations {
            let args = op.operands.as_slice();
            let num = |i: usize| args.get(i).and_then(number);
            match op.operator.as_str() {
                "q" => stack.push(state.clone()),
                "Q" => {
                    if let Some(saved) = stack.pop() {
                        *state = saved;
                    }
                }
                "cm" => {
                    if let Some(m) = Matrix::from_operands(args) {
                        state.ctm = m.then(&state.ctm);
                    }
                }
                "w" => state.line_width = num(0).unwrap_or(state.line_width),
                "g" | "rg" | "k" | "sc" | "scn" => {
                    if let Some(color) = color_from(args) {
                        state.fill = color;
                    }
                }
                "G" | "RG" | "K" | "SC" | "SCN" => {
                    if let Some(color) = color_from(args) {
                        state.stroke = color;
                    }
                }

                // Path construction
                "m" | "l" | "c" | "v" | "y" | "re" | "h" if wants_paths => {
                    if let Some(segment) = path_segment(op.operator.as_str(), args, &path) {
                        path.push(segment);
                    }
                }
                "S" | "s" | "f" | "F" | "f*" | "B" | "B*" | "b" | "b*" | "n" => {
                    if wants_paths && !path.is_empty() {
                        let operator = op.operator.as_str();
                        if matches!(operator, "s" | "b" | "b*") {
                            path.push(PathSegment::Close);
                        }
                        let paint = match operator {
                            "S" | "s" => Some(PaintOp::Stroke),
                            "f" | "F" => Some(PaintOp::Fill { even_odd: false }),
                            "f*" => Some(PaintOp::Fill { even_odd: true }),
                            "B" | "b" => Some(PaintOp::FillStroke { even_odd: false }),
                            "B*" | "b*" => Some(PaintOp::FillStroke { even_odd: true }),
                            _ => None,
                        };
                        if let Some(paint) = paint {
                            sink.paint_path(&path, paint, state);
                        }
                    }
                    path.clear();
                }

                // Text objects and state
                "BT" => {
                    text_matrix = Matrix::IDENTITY;
                    line_matrix = Matrix::IDENTITY;
                }
                "Tf" => {
                    if let Some(font_name) = args.first().and_then(name) {
                        state.font = Some(self.font(resources, font_name));
                    }
                    state.font_size = num(1).unwrap_or(state.font_size);
                }
                "Tc" => state.char_spacing = num(0).unwrap_or(0.0),
                "Tw" => state.word_spacing = num(0).unwrap_or(0.0),
                "Tz" => state.horizontal_scale = num(0).unwrap_or(100.0) / 100.0,
                "TL" => state.leading = num(0).unwrap_or(0.0),
                "Ts" => state.rise = num(0).unwrap_or(0.0),
                "Tr" => state.render_mode = args.first().and_then(integer).unwrap_or(0),
                "Td" | "TD" => {
                    let (tx, ty) = (num(0).unwrap_or(0.0), num(1).unwrap_or(0.0));
                    if op.operator == "TD" {
                        state.leading = -ty;
                    }
                    line_matrix = Matrix::translate(tx, ty).then(&line_matrix);
                    text_matrix = line_matrix;
                }
                "Tm" => {
                    if let Some(m) = Matrix::from_operands(args) {
                        line_matrix = m;
                        text_matrix = m;
                    }
                }
                "T*" => {
                    line_matrix = Matrix::translate(0.0, -state.leading).then(&line_matrix);
                    text_matrix = line_matrix;
                }
                "Tj" => {
                    if let Some(Object::String(bytes, _)) = args.first() {
                        self.show(bytes, state, &mut text_matrix, sink);
                    }
                }
                "'" | "\"" => {
                    if op.operator == "\"" {
                        state.word_spacing = num(0).unwrap_or(state.word_spacing);
                        state.char_spacing = num(1).unwrap_or(state.char_spacing);
                    }
                    line_matrix = Matrix::translate(0.0, -state.leading).then(&line_matrix);
                    text_matrix = line_matrix;
                    if let Some(Object::String(bytes, _)) = args.last() {
                        self.show(bytes, state, &mut text_matrix, sink);
                    }
                }
                "TJ" => {
                    if let Some(Object::Array(items)) = args.first() {
                        for item in items {
                            match item {
                                Object::String(bytes, _) => self.show(bytes, state, &mut text_matrix, sink),
                                other => {
                                    if let Some(adjust) = number(other) {
                                        let tx = -adjust / 1000.0 * state.font_size * state.horizontal_scale;
                                        text_matrix = Matrix::translate(tx, 0.0).then(&text_matrix);
                                    }
                                }
                            }
                        }
                    }
                }

                // Images and forms
                "BI" => sink.image(&state.ctm),
                "Do" => {
                    if let Some(xobject_name) = args.first().and_then(name) {
                        self.do_xobject(resources, xobject_name, state, sink);
                    }
                }
                _ => {}
            }
        }
    }

    fn show(
        &mut self,
        bytes: &[u8],
        state: &GraphicsState,
        text_matrix: &mut Matrix,
        sink: &mut dyn ContentSink,
    ) {
        let font = state.font.clone().unwrap_or_else(|| self.fallback_font.clone());
        let mut text = String::with_capacity(bytes.len());
        let decoded = font.decode_into(bytes, &mut text);
        self.diagnostics.unmapped_glyphs += decoded.unmapped;

        let advance = (decoded.advance * state.font_size
            + decoded.glyphs as f32 * state.char_spacing
            + decoded.word_spaces as f32 * state.word_spacing)
            * state.horizontal_scale;
        let rise = Matrix::translate(0.0, state.rise);
        let run = TextRun {
            text: &text,
            matrix: rise.then(text_matrix).then(&state.ctm),
            font_size: state.font_size,
            advance,
            render_mode: state.render_mode,
            fill: state.fill,
        };
        sink.show_text(&run);
        *text_matrix = Matrix::translate(advance, 0.0).then(text_matrix);
    }

    fn font(&mut self, resources: Option<&'d Dictionary>, font_name: &[u8]) -> Arc<FontDecoder> {
        let document = self.document;
        let entry = resources
            .and_then(|r| get(document, r, b"Font"))
            .and_then(|fonts| resolve_dict(document, fonts))
            .and_then(|fonts| fonts.get(font_name).ok());
        let Some(entry) = entry else {
            let label = String::from_utf8_lossy(font_name).into_owned();
            if !self.diagnostics.missing_fonts.contains(&label) {
                self.diagnostics.missing_fonts.push(label);
            }
            return self.fallback_font.clone();
        };
        if let Object::Reference(id) = entry {
            if let Some(cached) = self.fonts.get(id) {
                return cached.clone();
            }
        }
        let decoder = match resolve_dict(document, entry) {
            Some(dict) => Arc::new(FontDecoder::from_dict(document, dict)),
            None => self.fallback_font.clone(),
        };
        if let Object::Reference(id) = entry {
            self.fonts.insert(*id, decoder.clone());
        }
        decoder
    }

    fn do_xobject(
        &mut self,
        resources: Option<&'d Dictionary>,
        xobject_name: &[u8],
        state: &GraphicsState,
        sink: &mut dyn ContentSink,
    ) {
        let document = self.document;
        let entry = resources
            .and_then(|r| get(document, r, b"XObject"))
            .and_then(|x| resolve_dict(document, x))
            .and_then(|x| x.get(xobject_name).ok());
        let Some(entry) = entry else {
            self.diagnostics.broken_xobjects += 1;
            return;
        };
        let Some(Object::Stream(stream)) = resolve(document, entry) else {
            self.diagnostics.broken_xobjects += 1;
            return;
        };
        match get(document, &stream.dict, b"Subtype").and_then(name) {
            Some(b"Image") => sink.image(&state.ctm),
            Some(b"Form") => {
                let id = match entry {
                    Object::Reference(id) => Some(*id),
                    _ => None,
                };
                if self.forms_in_progress.len() >= MAX_FORM_DEPTH
                    || id.is_some_and(|id| self.forms_in_progress.contains(&id))
                {
                    debug!("skipping recursive or too deeply nested form");
                    return;
                }
                let operations = match decode_stream(document, stream)
                    .map_err(|e| e.to_string())
                    .and_then(|data| parse_content(&data).map_err(|e| e.to_string()))
                {
                    Ok(operations) => operations,
                    Err(reason) => {
                        debug!(%reason, "unreadable form xobject");
                        self.diagnostics.broken_xobjects += 1;
                        return;
                    }
                };
                let form_matrix = get(document, &stream.dict, b"Matrix")
                    .and_then(|m| match m {
                        Object::Array(items) => Matrix::from_operands(items),
                        _ => None,
                    })
                    .unwrap_or(Matrix::IDENTITY);
                let form_resources = get(document, &stream.dict, b"Resources")
                    .and_then(|r| resolve_dict(document, r))
                    .or(resources);

                let mut form_state = state.clone();
                form_state.ctm = form_matrix.then(&state.ctm);
                self.forms_in_progress.push(id.unwrap_or((0, 0)));
                self.walk(&operations, form_resources, &mut form_state, sink);
                self.forms_in_progress.pop();
            }
            _ => {}
        }
    }
}

fn color_from(args: &[Object]) -> Option<[u8; 3]> {
    let values: Vec<f32> = args.iter().filter_map(number).collect();
    let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    match values.as_slice() {
        [gray] => Some([channel(*gray); 3]),
        [r, g, b] => Some([channel(*r), channel(*g), channel(*b)]),
        [c, m, y, k] => Some([
            channel((1.0 - c) * (1.0 - k)),
            channel((1.0 - m) * (1.0 - k)),
            channel((1.0 - y) * (1.0 - k)),
        ]),
        _ => None,
    }
}

fn path_segment(operator: &str, args: &[Object], path: &[PathSegment]) -> Option<PathSegment> {
    let v: Vec<f32> = args.iter().filter_map(number).collect();
    let current = path.iter().rev().find_map(|s| match *s {
        PathSegment::MoveTo(x, y) | PathSegment::LineTo(x, y) | PathSegment::CurveTo(_, _, _, _, x, y) => Some((x, y)),
        PathSegment::Rect(x, y, _, _) => Some((x, y)),
        PathSegment::Close => None,
    });
    match (operator, v.as_slice()) {
        ("m", [x, y]) => Some(PathSegment::MoveTo(*x, *y)),
        ("l", [x, y]) => Some(PathSegment::LineTo(*x, *y)),
        ("c", [x1, y1, x2, y2, x3, y3]) => Some(PathSegment::CurveTo(*x1, *y1, *x2, *y2, *x3, *y3)),
        ("v", [x2, y2, x3, y3]) => {
            let (x1, y1) = current?;
            Some(PathSegment::CurveTo(x1, y1, *x2, *y2, *x3, *y3))
        }
        ("y", [x1, y1, x3, y3]) => Some(PathSegment::CurveTo(*x1, *y1, *x3, *y3, *x3, *y3)),
        ("re", [x, y, w, h]) => Some(PathSegment::Rect(*x, *y, *w, *h)),
        ("h", []) => Some(PathSegment::Close),
        _ => None,
    }
}
