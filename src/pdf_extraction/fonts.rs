// Font decoding: byte codes to Unicode text plus glyph advances
use std::collections::HashMap;

use lopdf::{Dictionary, Document, Object};
use tracing::debug;

use super::cmap::{be_value, ToUnicodeMap};
use super::lopdf_helper::{get, integer, name, number, resolve, resolve_array, resolve_dict};
use super::streams::decode_stream;

/// Advance used when a font gives no width for a glyph, in 1/1000 em.
const FALLBACK_WIDTH: f32 = 500.0;

const WIN_ANSI_HIGH: &str = "€\0‚ƒ„…†‡ˆ‰Š‹Œ\0Ž\0\0‘’“”•–—˜™š›œ\0žŸ";

const MAC_ROMAN_HIGH: &str = "ÄÅÇÉÑÖÜáàâäãåçéèêëíìîïñóòôöõúùûü†°¢£§•¶ß®©™´¨≠ÆØ∞±≤≥¥µ∂∑∏π∫ªºΩæø¿¡¬√ƒ≈∆«»…\u{A0}ÀÃÕŒœ–—“”‘’÷◊ÿŸ⁄€‹›ﬁﬂ‡·‚„‰ÂÊÁËÈÍÎÏÌÓÔ\u{F8FF}ÒÚÛÙıˆ˜¯˘˙˚¸˝˛ˇ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BaseEncoding {
    Standard,
    WinAnsi,
    MacRoman,
}

#[derive(Debug, Clone)]
enum Widths {
    Simple { first_char: u32, widths: Vec<f32>, missing: f32 },
    Cid { default: f32, widths: HashMap<u32, f32> },
}

/// What one string operand produced.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DecodedRun {
    /// Sum of glyph advances in text space units (already divided by 1000).
    pub advance: f32,
    pub glyphs: usize,
    /// Single-byte code 32 occurrences; word spacing applies to these.
    pub word_spaces: usize,
    /// Codes with no Unicode mapping.
    pub unmapped: usize,
}

#[derive(Debug, Clone)]
pub struct FontDecoder {
    to_unicode: Option<ToUnicodeMap>,
    table: Option<Vec<char>>,
    default_code_len: usize,
    widths: Widths,
    width_scale: f32,
}

impl FontDecoder {
    /// Decoder for text shown without a resolvable font: Latin-1 bytes.
    pub fn fallback() -> Self {
        Self {
            to_unicode: None,
            table: Some(base_table(BaseEncoding::WinAnsi)),
            default_code_len: 1,
            widths: Widths::Simple { first_char: 0, widths: Vec::new(), missing: FALLBACK_WIDTH },
            width_scale: 1.0,
        }
    }

    pub fn from_dict(document: &Document, font: &Dictionary) -> Self {
        let subtype = get(document, font, b"Subtype").and_then(name).unwrap_or_default();
        let is_composite = subtype == b"Type0";

        let to_unicode = get(document, font, b"ToUnicode").and_then(|object| match object {
            Object::Stream(stream) => {
                let data = decode_stream(document, stream)
                    .map_err(|e| debug!(error = %e, "unreadable ToUnicode stream"))
                    .ok()?;
                ToUnicodeMap::parse(&data)
                    .map_err(|e| debug!(error = %e, "malformed ToUnicode CMap"))
                    .ok()
            }
            _ => None,
        });

        let table = (!is_composite).then(|| simple_table(document, font));
        let widths = if is_composite {
            cid_widths(document, font)
        } else {
            simple_widths(document, font)
        };
        // Type3 glyph space is mapped by FontMatrix rather than 1/1000.
        let width_scale = if subtype == b"Type3" {
            get(document, font, b"FontMatrix")
                .and_then(|m| resolve_array(document, m))
                .and_then(|m| m.first().and_then(number))
                .map_or(1.0, |sx| sx * 1000.0)
        } else {
            1.0
        };

        Self {
            to_unicode,
            table,
            default_code_len: if is_composite { 2 } else { 1 },
            widths,
            width_scale,
        }
    }

    /// Decode `bytes`, appending text to `out`.
    pub fn decode_into(&self, bytes: &[u8], out: &mut String) -> DecodedRun {
        let mut run = DecodedRun::default();
        let mut pos = 0;
        while pos < bytes.len() {
            let rest = &bytes[pos..];
            let len = match &self.to_unicode {
                Some(map) if map.has_codespaces() => map.code_length(rest, self.default_code_len),
                _ => self.default_code_len.min(rest.len()),
            };
            let code = be_value(&rest[..len]);
            pos += len;

            run.glyphs += 1;
            if len == 1 && code == 32 {
                run.word_spaces += 1;
            }
            run.advance += self.width(code) * self.width_scale / 1000.0;

            let mapped = self.to_unicode.as_ref().and_then(|map| map.lookup(len as u8, code));
            match mapped {
                Some(text) => out.push_str(&text),
                None => match self.table.as_ref().and_then(|t| t.get(code as usize)) {
                    Some(&ch) if ch != '\0' => out.push(ch),
                    _ => run.unmapped += 1,
                },
            }
        }
        run
    }

    fn width(&self, code: u32) -> f32 {
        match &self.widths {
            Widths::Simple { first_char, widths, missing } => code
                .checked_sub(*first_char)
                .and_then(|i| widths.get(i as usize))
                .copied()
                .unwrap_or(*missing),
            Widths::Cid { default, widths } => widths.get(&code).copied().unwrap_or(*default),
        }
    }
}

fn base_table(encoding: BaseEncoding) -> Vec<char> {
    let mut table: Vec<char> = (0u8..=255).map(char::from).collect();
    for control in table.iter_mut().take(32) {
        if !matches!(*control, '\t' | '\n' | '\r') {
            *control = '\0';
        }
    }
    match encoding {
        BaseEncoding::WinAnsi => {
            for (slot, ch) in table[0x80..0xA0].iter_mut().zip(WIN_ANSI_HIGH.chars()) {
                *slot = ch;
            }
        }
        BaseEncoding::MacRoman => {
            for (slot, ch) in table[0x80..].iter_mut().zip(MAC_ROMAN_HIGH.chars()) {
                *slot = ch;
            }
        }
        BaseEncoding::Standard => {
            table[0x27] = '\u{2019}';
            table[0x60] = '\u{2018}';
        }
    }
    table
}

fn simple_table(document: &Document, font: &Dictionary) -> Vec<char> {
    let encoding = get(document, font, b"Encoding");
    let base = |n: &[u8]| match n {
        b"MacRomanEncoding" => BaseEncoding::MacRoman,
        b"StandardEncoding" => BaseEncoding::Standard,
        _ => BaseEncoding::WinAnsi,
    };
    match encoding {
        Some(Object::Name(n)) => base_table(base(n.as_slice())),
        Some(Object::Dictionary(dict)) => {
            let base_name = get(document, dict, b"BaseEncoding").and_then(name).unwrap_or(b"WinAnsiEncoding".as_slice());
            let mut table = base_table(base(base_name));
            if let Some(differences) = get(document, dict, b"Differences").and_then(|d| resolve_array(document, d)) {
                apply_differences(&mut table, differences);
            }
            table
        }
        _ => base_table(BaseEncoding::WinAnsi),
    }
}

fn apply_differences(table: &mut [char], differences: &[Object]) {
    let mut code: Option<usize> = None;
    for item in differences {
        match item {
            Object::Integer(start) => code = usize::try_from(*start).ok(),
            Object::Name(glyph) => {
                if let Some(slot) = code.and_then(|c| table.get_mut(c)) {
                    if let Some(ch) = glyph_to_char(glyph) {
                        *slot = ch;
                    }
                }
                code = code.map(|c| c + 1);
            }
            _ => {}
        }
    }
}

/// Map a glyph name to Unicode for the names producers commonly emit.
fn glyph_to_char(glyph: &[u8]) -> Option<char> {
    let name = std::str::from_utf8(glyph).ok()?;
    // Suffixes like "a.sc" or "f_i" variants keep their base meaning.
    let name = name.split('.').next().unwrap_or(name);
    if name.len() == 1 {
        return name.chars().next();
    }
    if let Some(hex) = name.strip_prefix("uni").filter(|h| h.len() == 4) {
        return u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
    }
    if let Some(hex) = name.strip_prefix('u').filter(|h| (4..=6).contains(&h.len())) {
        if let Ok(value) = u32::from_str_radix(hex, 16) {
            return char::from_u32(value);
        }
    }
    let ch = match name {
        "space" | "nbspace" => ' ',
        "zero" => '0',
        "one" => '1',
        "two" => '2',
        "three" => '3',
        "four" => '4',
        "five" => '5',
        "six" => '6',
        "seven" => '7',
        "eight" => '8',
        "nine" => '9',
        "period" => '.',
        "comma" => ',',
        "colon" => ':',
        "semicolon" => ';',
        "hyphen" | "minus" => '-',
        "quotesingle" => '\'',
        "quotedbl" => '"',
        "parenleft" => '(',
        "parenright" => ')',
        "bracketleft" => '[',
        "bracketright" => ']',
        "braceleft" => '{',
        "braceright" => '}',
        "slash" => '/',
        "backslash" => '\\',
        "ampersand" => '&',
        "at" => '@',
        "numbersign" => '#',
        "dollar" => '$',
        "percent" => '%',
        "asterisk" => '*',
        "plus" => '+',
        "equal" => '=',
        "less" => '<',
        "greater" => '>',
        "question" => '?',
        "exclam" => '!',
        "underscore" => '_',
        "bar" => '|',
        "asciitilde" => '~',
        "asciicircum" => '^',
        "grave" => '`',
        "quoteleft" => '\u{2018}',
        "quoteright" => '\u{2019}',
        "quotedblleft" => '\u{201C}',
        "quotedblright" => '\u{201D}',
        "endash" => '\u{2013}',
        "emdash" => '\u{2014}',
        "bullet" => '\u{2022}',
        "degree" => '\u{00B0}',
        "plusminus" => '\u{00B1}',
        "section" => '\u{00A7}',
        "paragraph" => '\u{00B6}',
        "copyright" => '\u{00A9}',
        "registered" => '\u{00AE}',
        "trademark" => '\u{2122}',
        "fi" => '\u{FB01}',
        "fl" => '\u{FB02}',
        "ellipsis" => '\u{2026}',
        "multiply" => '\u{00D7}',
        "divide" => '\u{00F7}',
        "periodcentered" => '\u{00B7}',
        "onehalf" => '\u{00BD}',
        "onequarter" => '\u{00BC}',
        "threequarters" => '\u{00BE}',
        "mu" => '\u{00B5}',
        "dagger" => '\u{2020}',
        "daggerdbl" => '\u{2021}',
        _ => return None,
    };
    Some(ch)
}

fn simple_widths(document: &Document, font: &Dictionary) -> Widths {
    let first_char = get(document, font, b"FirstChar")
        .and_then(integer)
        .and_then(|c| u32::try_from(c).ok())
        .unwrap_or(0);
    let widths = get(document, font, b"Widths")
        .and_then(|w| resolve_array(document, w))
        .map(|items| {
            items
                .iter()
                .map(|w| resolve(document, w).and_then(number).unwrap_or(FALLBACK_WIDTH))
                .collect()
        })
        .unwrap_or_default();
    let missing = get(document, font, b"FontDescriptor")
        .and_then(|d| resolve_dict(document, d))
        .and_then(|d| get(document, d, b"MissingWidth"))
        .and_then(number)
        .filter(|w| *w > 0.0)
        .unwrap_or(FALLBACK_WIDTH);
    Widths::Simple { first_char, widths, missing }
}

fn cid_widths(document: &Document, font: &Dictionary) -> Widths {
    let descendant = get(document, font, b"DescendantFonts")
        .and_then(|d| resolve_array(document, d))
        .and_then(|d| d.first())
        .and_then(|d| resolve_dict(document, d));
    let Some(descendant) = descendant else {
        return Widths::Cid { default: 1000.0, widths: HashMap::new() };
    };
    let default = get(document, descendant, b"DW").and_then(number).unwrap_or(1000.0);
    let mut widths = HashMap::new();
    if let Some(items) = get(document, descendant, b"W").and_then(|w| resolve_array(document, w)) {
        let mut i = 0;
        while i < items.len() {
            let Some(first) = resolve(document, &items[i]).and_then(integer) else {
                break;
            };
            // CIDs outside u32 are skipped along with their widths.
            let first = u32::try_from(first).ok();
            match items.get(i + 1).and_then(|next| resolve(document, next)) {
                // c [w1 w2 ...]
                Some(Object::Array(run)) => {
                    if let Some(first) = first {
                        for (offset, w) in run.iter().enumerate() {
                            let cid = u32::try_from(offset).ok().and_then(|o| first.checked_add(o));
                            let (Some(cid), Some(w)) = (cid, resolve(document, w).and_then(number)) else {
                                continue;
                            };
                            widths.insert(cid, w);
                        }
                    }
                    i += 2;
                }
                // c_first c_last w
                Some(last) => {
                    let last = integer(last).and_then(|l| u32::try_from(l).ok());
                    let w = items.get(i + 2).and_then(|w| resolve(document, w)).and_then(number);
                    if let (Some(first), Some(last), Some(w)) = (first, last, w) {
                        // Cap absurd spans from broken producers.
                        for cid in first..=last.min(first.saturating_add(0xFFFF)) {
                            widths.insert(cid, w);
                        }
                    }
                    i += 3;
                }
                None => break,
            }
        }
    }
    Widths::Cid { default, widths }
}
