// PDF extraction module
pub mod annotations;
pub mod cmap;
pub mod fonts;
pub mod interpreter;
pub mod lexer;
pub mod loader;
pub mod lopdf_helper;
pub mod metadata;
pub mod page;
pub mod streams;

pub use interpreter::{ContentSink, GraphicsState, Matrix, PaintOp, PathSegment, TextRun};
pub use loader::{DocumentLoader, LoadedDocument};
pub use page::{ExtractedPage, PageContent, PageExtractor};
