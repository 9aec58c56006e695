// Markup annotation text
use lopdf::{Dictionary, Document, Object};
use tracing::warn;

use super::lopdf_helper::{decode_text_string, get, name, resolve_array, resolve_dict};

/// `Contents` of each annotation on the page, in `/Annots` order. Popups
/// only mirror their parent and are skipped.
pub fn annotation_texts(document: &Document, page: &Dictionary, page_number: u32) -> Vec<String> {
    let Ok(annots) = page.get(b"Annots") else {
        return Vec::new();
    };
    let Some(annots) = resolve_array(document, annots) else {
        warn!(page = page_number, "annotation list is not an array");
        return Vec::new();
    };

    let mut texts = Vec::new();
    let mut unreadable = 0usize;
    for entry in annots {
        let Some(annot) = resolve_dict(document, entry) else {
            unreadable += 1;
            continue;
        };
        if get(document, annot, b"Subtype").and_then(name) == Some(b"Popup") {
            continue;
        }
        if let Some(Object::String(bytes, _)) = get(document, annot, b"Contents") {
            let text = decode_text_string(bytes);
            if !text.is_empty() {
                texts.push(text);
            }
        }
    }
    if unreadable > 0 {
        warn!(page = page_number, unreadable, "skipped unreadable annotations");
    }
    texts
}
