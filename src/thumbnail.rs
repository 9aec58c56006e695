// Thumbnail rendering on a CPU canvas
//
// Pages are drawn at preview quality: vector paths as painted, images as
// placeholder boxes and text as bars where the glyphs would sit.
use std::io::Cursor;

use image::{imageops, DynamicImage, ImageFormat, RgbaImage};
use lopdf::Document;
use tiny_skia::{Color, FillRule, Paint, PathBuilder, Pixmap, Stroke, Transform};
use tracing::trace;

use crate::pdf_extraction::{ContentSink, GraphicsState, Matrix, PageContent, PaintOp, PathSegment, TextRun};
use crate::pdf_extraction::interpreter::Interpreter;
use crate::types::{Rotation, Thumbnail};

const IMAGE_PLACEHOLDER: [u8; 3] = [200, 200, 200];
/// Share of the font size covered by a text bar.
const TEXT_BAR_HEIGHT: f32 = 0.7;

#[derive(Debug, thiserror::Error)]
pub enum ThumbnailError {
    #[error("cannot allocate a {width}x{height} canvas")]
    Canvas { width: u32, height: u32 },
    #[error("PNG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

#[derive(Debug, Clone, Copy)]
pub struct ThumbnailRenderer {
    max_edge: u32,
}

impl ThumbnailRenderer {
    pub fn new(max_edge: u32) -> Self {
        Self { max_edge }
    }

    pub fn render(&self, document: &Document, content: &PageContent<'_>) -> Result<Thumbnail, ThumbnailError> {
        let [x0, y0, x1, y1] = content.page_box;
        let (page_width, page_height) = (x1 - x0, y1 - y0);
        let scale = self.max_edge as f32 / page_width.max(page_height);
        let width = ((page_width * scale).round() as u32).clamp(1, self.max_edge);
        let height = ((page_height * scale).round() as u32).clamp(1, self.max_edge);

        let mut pixmap = Pixmap::new(width, height).ok_or(ThumbnailError::Canvas { width, height })?;
        pixmap.fill(Color::WHITE);

        // User space has y up; the canvas has y down.
        let base = Matrix::new(scale, 0.0, 0.0, -scale, -x0 * scale, y1 * scale);
        let mut painter = Painter { pixmap, base };
        Interpreter::new(document).run(&content.operations, content.resources, Matrix::IDENTITY, &mut painter);

        let raw = RgbaImage::from_raw(width, height, painter.pixmap.take())
            .ok_or(ThumbnailError::Canvas { width, height })?;
        let rotated = match content.rotation {
            Rotation::Deg0 => raw,
            Rotation::Deg90 => imageops::rotate90(&raw),
            Rotation::Deg180 => imageops::rotate180(&raw),
            Rotation::Deg270 => imageops::rotate270(&raw),
        };
        let (width, height) = rotated.dimensions();

        let mut png = Vec::new();
        DynamicImage::ImageRgba8(rotated)
            .to_rgb8()
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        trace!(page = content.page_number, width, height, bytes = png.len(), "thumbnail encoded");

        Ok(Thumbnail { page_number: content.page_number, width, height, png })
    }
}

struct Painter {
    pixmap: Pixmap,
    base: Matrix,
}

impl Painter {
    fn transform(&self, m: &Matrix) -> Transform {
        let t = m.then(&self.base);
        Transform::from_row(t.a, t.b, t.c, t.d, t.e, t.f)
    }

    fn fill_box(&mut self, m: &Matrix, (w, h): (f32, f32), color: [u8; 3], alpha: u8) {
        let mut builder = PathBuilder::new();
        push_rect(&mut builder, 0.0, 0.0, w, h);
        if let Some(path) = builder.finish() {
            let transform = self.transform(m);
            self.pixmap.fill_path(&path, &paint(color, alpha), FillRule::Winding, transform, None);
        }
    }
}

fn paint(color: [u8; 3], alpha: u8) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(color[0], color[1], color[2], alpha);
    paint.anti_alias = true;
    paint
}

fn push_rect(builder: &mut PathBuilder, x: f32, y: f32, w: f32, h: f32) {
    builder.move_to(x, y);
    builder.line_to(x + w, y);
    builder.line_to(x + w, y + h);
    builder.line_to(x, y + h);
    builder.close();
}

impl ContentSink for Painter {
    fn wants_paths(&self) -> bool {
        true
    }

    fn show_text(&mut self, run: &TextRun<'_>) {
        // Modes 3 and 7 are invisible (OCR layers).
        if run.advance == 0.0 || run.text.trim().is_empty() || matches!(run.render_mode, 3 | 7) {
            return;
        }
        self.fill_box(&run.matrix, (run.advance, run.font_size * TEXT_BAR_HEIGHT), run.fill, 160);
    }

    fn image(&mut self, ctm: &Matrix) {
        self.fill_box(ctm, (1.0, 1.0), IMAGE_PLACEHOLDER, 255);
    }

    fn paint_path(&mut self, segments: &[PathSegment], op: PaintOp, state: &GraphicsState) {
        let mut builder = PathBuilder::new();
        for segment in segments {
            match *segment {
                PathSegment::MoveTo(x, y) => builder.move_to(x, y),
                PathSegment::LineTo(x, y) => builder.line_to(x, y),
                PathSegment::CurveTo(x1, y1, x2, y2, x3, y3) => builder.cubic_to(x1, y1, x2, y2, x3, y3),
                PathSegment::Rect(x, y, w, h) => push_rect(&mut builder, x, y, w, h),
                PathSegment::Close => builder.close(),
            }
        }
        let Some(path) = builder.finish() else {
            return;
        };
        let transform = self.transform(&state.ctm);
        let stroke = Stroke { width: state.line_width.max(0.0), ..Stroke::default() };
        match op {
            PaintOp::Fill { even_odd } => {
                self.pixmap.fill_path(&path, &paint(state.fill, 255), fill_rule(even_odd), transform, None);
            }
            PaintOp::Stroke => {
                self.pixmap.stroke_path(&path, &paint(state.stroke, 255), &stroke, transform, None);
            }
            PaintOp::FillStroke { even_odd } => {
                self.pixmap.fill_path(&path, &paint(state.fill, 255), fill_rule(even_odd), transform, None);
                self.pixmap.stroke_path(&path, &paint(state.stroke, 255), &stroke, transform, None);
            }
        }
    }
}

fn fill_rule(even_odd: bool) -> FillRule {
    if even_odd {
        FillRule::EvenOdd
    } else {
        FillRule::Winding
    }
}
