// Document information dictionary
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use lopdf::{Dictionary, Document, Object};
use tracing::{debug, warn};

use super::lopdf_helper::{decode_text_string, get, resolve_dict};
use crate::types::DocumentMetadata;

pub fn read_metadata(document: &Document) -> DocumentMetadata {
    let Some(info) = document
        .trailer
        .get(b"Info")
        .ok()
        .and_then(|info| resolve_dict(document, info))
    else {
        debug!("document has no info dictionary");
        return DocumentMetadata::default();
    };

    let text = |key: &[u8]| text_entry(document, info, key);
    DocumentMetadata {
        title: text(b"Title"),
        author: text(b"Author"),
        subject: text(b"Subject"),
        keywords: text(b"Keywords"),
        creator: text(b"Creator"),
        producer: text(b"Producer"),
        creation_date: date_entry(document, info, b"CreationDate"),
        modification_date: date_entry(document, info, b"ModDate"),
    }
}

fn text_entry(document: &Document, info: &Dictionary, key: &[u8]) -> Option<String> {
    match get(document, info, key)? {
        Object::String(bytes, _) => {
            let text = decode_text_string(bytes);
            let trimmed = text.trim_end_matches('\0');
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        _ => None,
    }
}

fn date_entry(document: &Document, info: &Dictionary, key: &[u8]) -> Option<DateTime<FixedOffset>> {
    let Object::String(bytes, _) = get(document, info, key)? else {
        return None;
    };
    let raw = decode_text_string(bytes);
    let parsed = parse_pdf_date(&raw);
    if parsed.is_none() {
        warn!(key = %String::from_utf8_lossy(key), value = %raw, "ignoring malformed date");
    }
    parsed
}

/// Parse `D:YYYYMMDDHHmmSSOHH'mm'`. Everything after the year is
/// optional; a missing offset means UTC.
pub fn parse_pdf_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let s = raw.trim();
    let s = s.strip_prefix("D:").unwrap_or(s);
    let digits = s.bytes().take_while(u8::is_ascii_digit).count();
    if digits < 4 || digits % 2 != 0 || digits > 14 {
        return None;
    }
    let field = |start: usize, default: u32| -> Option<u32> {
        if start + 2 <= digits {
            s[start..start + 2].parse().ok()
        } else {
            Some(default)
        }
    };
    let year: i32 = s[..4].parse().ok()?;
    let (month, day) = (field(4, 1)?, field(6, 1)?);
    let (hour, minute, second) = (field(8, 0)?, field(10, 0)?, field(12, 0)?);
    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;

    let offset = parse_offset(&s[digits..])?;
    offset.from_local_datetime(&naive).single()
}

fn parse_offset(rest: &str) -> Option<FixedOffset> {
    let mut chars = rest.chars();
    let sign = match chars.next() {
        None | Some('Z') => return FixedOffset::east_opt(0),
        Some('+') => 1,
        Some('-') => -1,
        Some(_) => return None,
    };
    let numbers: Vec<i32> = chars
        .as_str()
        .split('\'')
        .filter(|part| !part.is_empty())
        .map(|part| part.parse().ok())
        .collect::<Option<_>>()?;
    let (hours, minutes) = match numbers.as_slice() {
        [h] => (*h, 0),
        [h, m] => (*h, *m),
        _ => return None,
    };
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use lopdf::dictionary;
    use rstest::rstest;

    #[rstest]
    #[case("D:20230415093000-05'00'", "2023-04-15T09:30:00-05:00")]
    #[case("D:20230415093000+05'30", "2023-04-15T09:30:00+05:30")]
    #[case("D:20230415093000Z", "2023-04-15T09:30:00+00:00")]
    #[case("D:202304", "2023-04-01T00:00:00+00:00")]
    #[case("20191231235959", "2019-12-31T23:59:59+00:00")]
    fn parses_pdf_dates(#[case] raw: &str, #[case] expected: &str) {
        let parsed = parse_pdf_date(raw).unwrap();
        assert_eq!(parsed, DateTime::parse_from_rfc3339(expected).unwrap());
    }

    #[rstest]
    #[case("")]
    #[case("D:")]
    #[case("D:20231345")]
    #[case("D:2023041509300")]
    #[case("yesterday")]
    #[case("D:20230415093000X")]
    fn rejects_malformed_dates(#[case] raw: &str) {
        assert_eq!(parse_pdf_date(raw), None);
    }

    #[test]
    fn reads_info_dictionary() {
        let mut document = Document::with_version("1.5");
        let info = document.add_object(dictionary! {
            "Title" => Object::string_literal("Project Manual"),
            "Author" => Object::string_literal(""),
            "Producer" => Object::string_literal("Plotter 9"),
            "CreationDate" => Object::string_literal("D:20220101120000Z"),
            "ModDate" => Object::string_literal("garbage"),
        });
        document.trailer.set("Info", info);

        let metadata = read_metadata(&document);
        assert_eq!(metadata.title.as_deref(), Some("Project Manual"));
        assert_eq!(metadata.author, None);
        assert_eq!(metadata.producer.as_deref(), Some("Plotter 9"));
        assert_eq!(metadata.creation_date.map(|d| d.year()), Some(2022));
        assert_eq!(metadata.modification_date, None);
    }
}
