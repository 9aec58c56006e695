// ToUnicode CMap parsing
//
// CMaps are PostScript-flavoured but tokenize like content streams: the
// entries between `beginbfchar` and `endbfchar` arrive as the operands of
// the closing keyword.
use lopdf::Object;

use super::lexer::{parse_content, ContentError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Codespace {
    len: u8,
    low: u32,
    high: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RangeTarget {
    /// Destination of `low`; later codes increment the last UTF-16 unit.
    Offset(Vec<u16>),
    /// One destination per code.
    Explicit(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BfRange {
    len: u8,
    low: u32,
    high: u32,
    target: RangeTarget,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToUnicodeMap {
    codespaces: Vec<Codespace>,
    chars: std::collections::HashMap<(u8, u32), String>,
    ranges: Vec<BfRange>,
}

impl ToUnicodeMap {
    pub fn parse(data: &[u8]) -> Result<Self, ContentError> {
        let mut map = ToUnicodeMap::default();
        for op in parse_content(data)? {
            match op.operator.as_str() {
                "endcodespacerange" => {
                    for pair in op.operands.chunks_exact(2) {
                        if let (Some((len, low)), Some((_, high))) = (code(&pair[0]), code(&pair[1])) {
                            map.codespaces.push(Codespace { len, low, high });
                        }
                    }
                }
                "endbfchar" => {
                    for pair in op.operands.chunks_exact(2) {
                        if let (Some(key), Some(units)) = (code(&pair[0]), utf16_units(&pair[1])) {
                            map.chars.insert(key, String::from_utf16_lossy(&units));
                        }
                    }
                }
                "endbfrange" => {
                    for triple in op.operands.chunks_exact(3) {
                        let (Some((len, low)), Some((_, high))) = (code(&triple[0]), code(&triple[1])) else {
                            continue;
                        };
                        if high < low {
                            continue;
                        }
                        let target = match &triple[2] {
                            Object::Array(items) => RangeTarget::Explicit(
                                items
                                    .iter()
                                    .map(|item| utf16_units(item).map(|u| String::from_utf16_lossy(&u)).unwrap_or_default())
                                    .collect(),
                            ),
                            other => match utf16_units(other) {
                                Some(units) if !units.is_empty() => RangeTarget::Offset(units),
                                _ => continue,
                            },
                        };
                        map.ranges.push(BfRange { len, low, high, target });
                    }
                }
                _ => {}
            }
        }
        Ok(map)
    }

    pub fn has_codespaces(&self) -> bool {
        !self.codespaces.is_empty()
    }

    /// Length in bytes of the code starting at `bytes[0]`, per the codespace
    /// ranges. Falls back to `default_len` when nothing matches.
    pub fn code_length(&self, bytes: &[u8], default_len: usize) -> usize {
        for len in 1..=4usize.min(bytes.len()) {
            let value = be_value(&bytes[..len]);
            let matches = self
                .codespaces
                .iter()
                .any(|cs| cs.len as usize == len && value >= cs.low && value <= cs.high);
            if matches {
                return len;
            }
        }
        default_len.min(bytes.len()).max(1)
    }

    pub fn lookup(&self, len: u8, value: u32) -> Option<String> {
        if let Some(text) = self.chars.get(&(len, value)) {
            return Some(text.clone());
        }
        let range = self
            .ranges
            .iter()
            .find(|r| r.len == len && value >= r.low && value <= r.high)?;
        let offset = value - range.low;
        match &range.target {
            RangeTarget::Offset(units) => {
                let mut units = units.clone();
                if let Some(last) = units.last_mut() {
                    *last = last.wrapping_add(offset as u16);
                }
                Some(String::from_utf16_lossy(&units))
            }
            RangeTarget::Explicit(targets) => targets.get(offset as usize).cloned(),
        }
    }
}

pub fn be_value(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| acc << 8 | u32::from(b))
}

fn code(object: &Object) -> Option<(u8, u32)> {
    match object {
        Object::String(bytes, _) if !bytes.is_empty() && bytes.len() <= 4 => {
            Some((bytes.len() as u8, be_value(bytes)))
        }
        _ => None,
    }
}

fn utf16_units(object: &Object) -> Option<Vec<u16>> {
    match object {
        Object::String(bytes, _) => {
            let mut units: Vec<u16> = bytes
                .chunks(2)
                .map(|pair| match pair {
                    [hi, lo] => u16::from_be_bytes([*hi, *lo]),
                    [single] => u16::from(*single),
                    _ => 0,
                })
                .collect();
            units.retain(|&u| u != 0);
            Some(units)
        }
        Object::Name(name) => Some(String::from_utf8_lossy(name).encode_utf16().collect()),
        _ => None,
    }
}
