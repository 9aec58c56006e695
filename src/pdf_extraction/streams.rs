// Stream filter decoding
//
// Filters that can hide corruption (Flate, ASCIIHex, ASCII85) are decoded
// here so that damaged data is reported instead of silently truncated.
// Anything else is handed to lopdf.
use flate2::{Decompress, FlushDecompress, Status};
use lopdf::{Document, Object, Stream};
use tracing::warn;

use super::lopdf_helper::{get, name};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("corrupt {filter} data: {reason}")]
    Corrupt { filter: &'static str, reason: String },
    #[error("unsupported stream encoding: {0}")]
    Unsupported(String),
}

pub fn decode_stream(document: &Document, stream: &Stream) -> Result<Vec<u8>, StreamError> {
    let filters = filter_names(document, stream);
    if filters.is_empty() {
        return Ok(stream.content.clone());
    }
    let has_params = stream.dict.has(b"DecodeParms") || stream.dict.has(b"DP");
    if has_params || !filters.iter().all(|f| is_native(f)) {
        return stream
            .decompressed_content()
            .map_err(|e| StreamError::Unsupported(format!("{} ({e})", describe(&filters))));
    }

    let mut data = stream.content.clone();
    for filter in &filters {
        data = match filter.as_slice() {
            b"FlateDecode" | b"Fl" => inflate(&data)?,
            b"ASCIIHexDecode" | b"AHx" => ascii_hex(&data)?,
            b"ASCII85Decode" | b"A85" => ascii85(&data)?,
            other => return Err(StreamError::Unsupported(String::from_utf8_lossy(other).into_owned())),
        };
    }
    Ok(data)
}

fn filter_names(document: &Document, stream: &Stream) -> Vec<Vec<u8>> {
    let Some(filter) = get(document, &stream.dict, b"Filter") else {
        return Vec::new();
    };
    match filter {
        Object::Name(n) => vec![n.clone()],
        Object::Array(items) => items
            .iter()
            .filter_map(|item| name(item).map(<[u8]>::to_vec))
            .collect(),
        _ => Vec::new(),
    }
}

fn is_native(filter: &[u8]) -> bool {
    matches!(
        filter,
        b"FlateDecode" | b"Fl" | b"ASCIIHexDecode" | b"AHx" | b"ASCII85Decode" | b"A85"
    )
}

fn describe(filters: &[Vec<u8>]) -> String {
    filters
        .iter()
        .map(|f| String::from_utf8_lossy(f).into_owned())
        .collect::<Vec<_>>()
        .join(",")
}

fn inflate(input: &[u8]) -> Result<Vec<u8>, StreamError> {
    let corrupt = |reason: String| StreamError::Corrupt { filter: "FlateDecode", reason };
    let mut decoder = Decompress::new(true);
    let mut output = Vec::with_capacity(input.len().saturating_mul(4).max(1024));
    loop {
        if output.len() == output.capacity() {
            output.reserve(output.capacity().max(4096));
        }
        let consumed = decoder.total_in() as usize;
        let produced = output.len();
        let status = decoder
            .decompress_vec(&input[consumed..], &mut output, FlushDecompress::Finish)
            .map_err(|e| corrupt(e.to_string()))?;
        match status {
            Status::StreamEnd => return Ok(output),
            Status::Ok | Status::BufError => {
                let input_done = decoder.total_in() as usize >= input.len();
                let stalled = decoder.total_in() as usize == consumed && output.len() == produced;
                let room_left = output.len() < output.capacity();
                if (input_done || stalled) && room_left {
                    if output.is_empty() {
                        return Err(corrupt("stream ends before any data".into()));
                    }
                    // Missing trailer checksums are common in the wild.
                    warn!(bytes = output.len(), "flate stream ended without end marker");
                    return Ok(output);
                }
            }
        }
    }
}

fn ascii_hex(input: &[u8]) -> Result<Vec<u8>, StreamError> {
    let mut output = Vec::with_capacity(input.len() / 2);
    let mut pending: Option<u8> = None;
    for &byte in input {
        if byte == b'>' {
            break;
        }
        if byte.is_ascii_whitespace() {
            continue;
        }
        let nibble = (byte as char).to_digit(16).ok_or_else(|| StreamError::Corrupt {
            filter: "ASCIIHexDecode",
            reason: format!("invalid byte 0x{byte:02x}"),
        })? as u8;
        match pending.take() {
            Some(high) => output.push(high << 4 | nibble),
            None => pending = Some(nibble),
        }
    }
    if let Some(high) = pending {
        output.push(high << 4);
    }
    Ok(output)
}

fn ascii85(input: &[u8]) -> Result<Vec<u8>, StreamError> {
    let corrupt = |reason: String| StreamError::Corrupt { filter: "ASCII85Decode", reason };
    let body = input.strip_prefix(b"<~").unwrap_or(input);
    let mut output = Vec::with_capacity(body.len() * 4 / 5);
    let mut group = [0u8; 5];
    let mut filled = 0;
    for &byte in body {
        match byte {
            b'~' => break,
            b'z' if filled == 0 => output.extend_from_slice(&[0; 4]),
            b'!'..=b'u' => {
                group[filled] = byte - b'!';
                filled += 1;
                if filled == 5 {
                    output.extend_from_slice(&base85_word(&group).ok_or_else(|| corrupt("group overflow".into()))?);
                    filled = 0;
                }
            }
            b if b.is_ascii_whitespace() => {}
            other => return Err(corrupt(format!("invalid byte 0x{other:02x}"))),
        }
    }
    if filled == 1 {
        return Err(corrupt("dangling final character".into()));
    }
    if filled > 1 {
        for slot in group.iter_mut().skip(filled) {
            *slot = b'u' - b'!';
        }
        let word = base85_word(&group).ok_or_else(|| corrupt("group overflow".into()))?;
        output.extend_from_slice(&word[..filled - 1]);
    }
    Ok(output)
}

fn base85_word(group: &[u8; 5]) -> Option<[u8; 4]> {
    let value = group
        .iter()
        .try_fold(0u32, |acc, &digit| acc.checked_mul(85)?.checked_add(u32::from(digit)))?;
    Some(value.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::ZlibEncoder, Compression};
    use lopdf::dictionary;
    use std::io::Write;

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn inflates_flate_streams() {
        let document = Document::with_version("1.5");
        let stream = Stream::new(dictionary! { "Filter" => "FlateDecode" }, deflate(b"BT (A) Tj ET"));
        assert_eq!(decode_stream(&document, &stream).unwrap(), b"BT (A) Tj ET");
    }

    #[test]
    fn garbage_flate_data_is_corrupt() {
        let document = Document::with_version("1.5");
        let stream = Stream::new(dictionary! { "Filter" => "FlateDecode" }, b"not zlib at all".to_vec());
        assert!(matches!(
            decode_stream(&document, &stream),
            Err(StreamError::Corrupt { filter: "FlateDecode", .. })
        ));
    }

    #[test]
    fn decodes_ascii_filters() {
        assert_eq!(ascii_hex(b"48 65 6C6C6F>").unwrap(), b"Hello");
        assert_eq!(ascii_hex(b"7>").unwrap(), vec![0x70]);
        assert!(ascii_hex(b"4G").is_err());
        assert_eq!(ascii85(b"<~87cURD]i,\"Ebo80~>").unwrap(), b"Hello World!");
        assert_eq!(ascii85(b"z~>").unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn chained_filters_apply_in_order() {
        let document = Document::with_version("1.5");
        let hex: String = deflate(b"q Q").iter().map(|b| format!("{b:02X}")).collect();
        let stream = Stream::new(
            dictionary! {
                "Filter" => vec![Object::from("ASCIIHexDecode"), Object::from("FlateDecode")],
            },
            format!("{hex}>").into_bytes(),
        );
        assert_eq!(decode_stream(&document, &stream).unwrap(), b"q Q");
    }
}
