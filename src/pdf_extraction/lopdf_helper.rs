// lopdf helpers - object graph navigation shared by the extractors
use lopdf::{Dictionary, Document, Object, ObjectId};

/// Page-tree attributes may be inherited from `/Parent` nodes; bound the
/// walk so a malformed cyclic tree cannot spin forever.
const MAX_INHERITANCE_DEPTH: usize = 32;

/// US Letter, used when a page carries no usable box.
pub const DEFAULT_PAGE_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// Follow a reference chain to the object it names.
pub fn resolve<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Object> {
    let mut current = object;
    for _ in 0..MAX_INHERITANCE_DEPTH {
        match current {
            Object::Reference(id) => current = document.get_object(*id).ok()?,
            other => return Some(other),
        }
    }
    None
}

pub fn resolve_dict<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    match resolve(document, object)? {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

pub fn resolve_array<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Vec<Object>> {
    match resolve(document, object)? {
        Object::Array(items) => Some(items),
        _ => None,
    }
}

/// Look a key up in a dictionary and resolve the value.
pub fn get<'a>(document: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    dict.get(key).ok().and_then(|value| resolve(document, value))
}

pub fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(f) => Some(*f),
        _ => None,
    }
}

pub fn integer(object: &Object) -> Option<i64> {
    match object {
        Object::Integer(i) => Some(*i),
        Object::Real(f) if f.fract() == 0.0 => Some(*f as i64),
        _ => None,
    }
}

pub fn name(object: &Object) -> Option<&[u8]> {
    match object {
        Object::Name(name) => Some(name.as_slice()),
        _ => None,
    }
}

/// Find an attribute on a page dictionary or its nearest ancestor.
pub fn inherited<'a>(
    document: &'a Document,
    page: &'a Dictionary,
    key: &[u8],
) -> Option<&'a Object> {
    let mut node = page;
    for _ in 0..MAX_INHERITANCE_DEPTH {
        if let Some(value) = get(document, node, key) {
            return Some(value);
        }
        node = get(document, node, b"Parent").and_then(|parent| match parent {
            Object::Dictionary(dict) => Some(dict),
            _ => None,
        })?;
    }
    None
}

/// Parse a rectangle array into normalized `[x0, y0, x1, y1]`.
pub fn rectangle(document: &Document, object: &Object) -> Option<[f32; 4]> {
    let items = resolve_array(document, object)?;
    if items.len() != 4 {
        return None;
    }
    let mut values = [0.0f32; 4];
    for (slot, item) in values.iter_mut().zip(items) {
        *slot = number(resolve(document, item)?)?;
    }
    let [ax, ay, bx, by] = values;
    let rect = [ax.min(bx), ay.min(by), ax.max(bx), ay.max(by)];
    if rect[2] - rect[0] <= 0.0 || rect[3] - rect[1] <= 0.0 {
        return None;
    }
    Some(rect)
}

pub fn page_dictionary(document: &Document, id: ObjectId) -> Option<&Dictionary> {
    match document.get_object(id).ok()? {
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

/// Decode a PDF text string: UTF-16BE with BOM, UTF-8 with BOM, or
/// PDFDocEncoding.
pub fn decode_text_string(bytes: &[u8]) -> String {
    if let Some(body) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = body
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    if let Some(body) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8_lossy(body).into_owned();
    }
    bytes.iter().map(|&b| pdf_doc_char(b)).collect()
}

/// PDFDocEncoding differs from Latin-1 only in a few ranges.
fn pdf_doc_char(byte: u8) -> char {
    const HIGH: [char; 32] = [
        '\u{2022}', '\u{2020}', '\u{2021}', '\u{2026}', '\u{2014}', '\u{2013}', '\u{0192}',
        '\u{2044}', '\u{2039}', '\u{203A}', '\u{2212}', '\u{2030}', '\u{201E}', '\u{201C}',
        '\u{201D}', '\u{2018}', '\u{2019}', '\u{201A}', '\u{2122}', '\u{FB01}', '\u{FB02}',
        '\u{0141}', '\u{0152}', '\u{0160}', '\u{0178}', '\u{017D}', '\u{0131}', '\u{0142}',
        '\u{0153}', '\u{0161}', '\u{017E}', '\u{FFFD}',
    ];
    const LOW: [char; 8] = [
        '\u{02D8}', '\u{02C7}', '\u{02C6}', '\u{02D9}', '\u{02DD}', '\u{02DB}', '\u{02DA}',
        '\u{02DC}',
    ];
    match byte {
        0x18..=0x1F => LOW[(byte - 0x18) as usize],
        0x80..=0x9F => HIGH[(byte - 0x80) as usize],
        0xA0 => '\u{20AC}',
        _ => byte as char,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    #[test]
    fn decodes_utf16_and_doc_encoding() {
        assert_eq!(decode_text_string(&[0xFE, 0xFF, 0x00, 0x41, 0x00, 0xE9]), "Aé");
        assert_eq!(decode_text_string(b"Spec \x84 Div"), "Spec \u{2014} Div");
        assert_eq!(decode_text_string(b"plain"), "plain");
    }

    #[test]
    fn rectangle_normalizes_corners() {
        let document = Document::with_version("1.5");
        let rect = Object::Array(vec![612.into(), 792.into(), 0.into(), 0.into()]);
        assert_eq!(rectangle(&document, &rect), Some([0.0, 0.0, 612.0, 792.0]));
        let empty = Object::Array(vec![0.into(), 0.into(), 0.into(), 10.into()]);
        assert_eq!(rectangle(&document, &empty), None);
    }

    #[test]
    fn inherited_attribute_comes_from_parent() {
        let mut document = Document::with_version("1.5");
        let parent_id = document.add_object(dictionary! {
            "Type" => "Pages",
            "Rotate" => 90,
        });
        let page = dictionary! {
            "Type" => "Page",
            "Parent" => parent_id,
        };
        let rotate = inherited(&document, &page, b"Rotate").and_then(integer);
        assert_eq!(rotate, Some(90));
        assert!(inherited(&document, &page, b"CropBox").is_none());
    }
}
