// Content stream tokenizer
//
// Produces lopdf operations from raw page content. Syntax that cannot be
// closed (strings, arrays, dictionaries, inline images running off the end
// of the data) is an error: it means the stream was cut short.
use lopdf::content::Operation;
use lopdf::{Dictionary, Object, StringFormat};

const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("content syntax error at byte {offset}: {reason}")]
pub struct ContentError {
    pub offset: usize,
    pub reason: &'static str,
}

enum Token {
    Object(Object),
    ArrayStart,
    ArrayEnd,
    DictStart,
    DictEnd,
    Keyword(Vec<u8>),
}

pub fn parse_content(data: &[u8]) -> Result<Vec<Operation>, ContentError> {
    let mut lexer = Lexer { data, pos: 0 };
    let mut operations = Vec::new();
    let mut operands = Vec::new();
    while let Some(token) = lexer.next_token()? {
        match token {
            Token::Object(object) => operands.push(object),
            Token::ArrayStart => operands.push(lexer.array(0)?),
            Token::DictStart => operands.push(Object::Dictionary(lexer.dictionary(0)?)),
            Token::ArrayEnd | Token::DictEnd => {}
            Token::Keyword(word) if word == b"BI" => {
                let dict = lexer.inline_image()?;
                operands.clear();
                operations.push(Operation::new("BI", vec![Object::Dictionary(dict)]));
            }
            Token::Keyword(word) => {
                let operator = String::from_utf8_lossy(&word).into_owned();
                operations.push(Operation::new(&operator, std::mem::take(&mut operands)));
            }
        }
    }
    Ok(operations)
}

fn is_whitespace(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | b'\r' | b'\x0C' | b'\0')
}

fn is_delimiter(byte: u8) -> bool {
    matches!(byte, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

fn is_regular(byte: u8) -> bool {
    !is_whitespace(byte) && !is_delimiter(byte)
}

struct Lexer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn error(&self, reason: &'static str) -> ContentError {
        ContentError { offset: self.pos, reason }
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(byte) = self.peek() {
            if is_whitespace(byte) {
                self.pos += 1;
            } else if byte == b'%' {
                while let Some(b) = self.peek() {
                    if b == b'\n' || b == b'\r' {
                        break;
                    }
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, ContentError> {
        loop {
            self.skip_whitespace_and_comments();
            let Some(byte) = self.peek() else {
                return Ok(None);
            };
            let token = match byte {
                b'(' => {
                    self.pos += 1;
                    Token::Object(Object::String(self.literal_string()?, StringFormat::Literal))
                }
                b'<' if self.data.get(self.pos + 1) == Some(&b'<') => {
                    self.pos += 2;
                    Token::DictStart
                }
                b'<' => {
                    self.pos += 1;
                    Token::Object(Object::String(self.hex_string()?, StringFormat::Hexadecimal))
                }
                b'>' if self.data.get(self.pos + 1) == Some(&b'>') => {
                    self.pos += 2;
                    Token::DictEnd
                }
                b'[' => {
                    self.pos += 1;
                    Token::ArrayStart
                }
                b']' => {
                    self.pos += 1;
                    Token::ArrayEnd
                }
                b'/' => {
                    self.pos += 1;
                    Token::Object(Object::Name(self.name()))
                }
                b')' | b'>' | b'{' | b'}' => {
                    // Stray delimiter
                    self.pos += 1;
                    continue;
                }
                _ => {
                    let word = self.regular_run();
                    match word.as_slice() {
                        b"true" => Token::Object(Object::Boolean(true)),
                        b"false" => Token::Object(Object::Boolean(false)),
                        b"null" => Token::Object(Object::Null),
                        _ => match parse_number(&word) {
                            Some(number) => Token::Object(number),
                            None => Token::Keyword(word),
                        },
                    }
                }
            };
            return Ok(Some(token));
        }
    }

    fn regular_run(&mut self) -> Vec<u8> {
        let start = self.pos;
        while self.peek().is_some_and(is_regular) {
            self.pos += 1;
        }
        self.data[start..self.pos].to_vec()
    }

    fn name(&mut self) -> Vec<u8> {
        let raw = self.regular_run();
        let mut name = Vec::with_capacity(raw.len());
        let mut i = 0;
        while i < raw.len() {
            if raw[i] == b'#' && i + 2 < raw.len() {
                let hex = std::str::from_utf8(&raw[i + 1..i + 3]).ok();
                if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    name.push(value);
                    i += 3;
                    continue;
                }
            }
            name.push(raw[i]);
            i += 1;
        }
        name
    }

    fn literal_string(&mut self) -> Result<Vec<u8>, ContentError> {
        let mut out = Vec::new();
        let mut depth = 1usize;
        loop {
            let Some(byte) = self.peek() else {
                return Err(self.error("unterminated string"));
            };
            self.pos += 1;
            match byte {
                b'(' => {
                    depth += 1;
                    out.push(byte);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(out);
                    }
                    out.push(byte);
                }
                b'\\' => {
                    let Some(escaped) = self.peek() else {
                        return Err(self.error("unterminated string"));
                    };
                    self.pos += 1;
                    match escaped {
                        b'n' => out.push(b'\n'),
                        b'r' => out.push(b'\r'),
                        b't' => out.push(b'\t'),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0C),
                        b'0'..=b'7' => {
                            let mut value = u32::from(escaped - b'0');
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(d @ b'0'..=b'7') => {
                                        value = value * 8 + u32::from(d - b'0');
                                        self.pos += 1;
                                    }
                                    _ => break,
                                }
                            }
                            out.push((value & 0xFF) as u8);
                        }
                        b'\r' => {
                            if self.peek() == Some(b'\n') {
                                self.pos += 1;
                            }
                        }
                        b'\n' => {}
                        other => out.push(other),
                    }
                }
                other => out.push(other),
            }
        }
    }

    fn hex_string(&mut self) -> Result<Vec<u8>, ContentError> {
        let mut out = Vec::new();
        let mut pending: Option<u8> = None;
        loop {
            let Some(byte) = self.peek() else {
                return Err(self.error("unterminated hex string"));
            };
            self.pos += 1;
            if byte == b'>' {
                break;
            }
            let Some(nibble) = (byte as char).to_digit(16) else {
                continue;
            };
            let nibble = nibble as u8;
            match pending.take() {
                Some(high) => out.push(high << 4 | nibble),
                None => pending = Some(nibble),
            }
        }
        if let Some(high) = pending {
            out.push(high << 4);
        }
        Ok(out)
    }

    fn array(&mut self, depth: usize) -> Result<Object, ContentError> {
        if depth > MAX_NESTING {
            return Err(self.error("nesting too deep"));
        }
        let mut items = Vec::new();
        loop {
            match self.next_token()? {
                None => return Err(self.error("unterminated array")),
                Some(Token::ArrayEnd) => return Ok(Object::Array(items)),
                Some(Token::Object(object)) => items.push(object),
                Some(Token::ArrayStart) => items.push(self.array(depth + 1)?),
                Some(Token::DictStart) => items.push(Object::Dictionary(self.dictionary(depth + 1)?)),
                Some(Token::DictEnd) | Some(Token::Keyword(_)) => {}
            }
        }
    }

    fn dictionary(&mut self, depth: usize) -> Result<Dictionary, ContentError> {
        if depth > MAX_NESTING {
            return Err(self.error("nesting too deep"));
        }
        let mut dict = Dictionary::new();
        let mut key: Option<Vec<u8>> = None;
        loop {
            let value = match self.next_token()? {
                None => return Err(self.error("unterminated dictionary")),
                Some(Token::DictEnd) => return Ok(dict),
                Some(Token::Object(Object::Name(name))) if key.is_none() => {
                    key = Some(name);
                    continue;
                }
                Some(Token::Object(object)) => object,
                Some(Token::ArrayStart) => self.array(depth + 1)?,
                Some(Token::DictStart) => Object::Dictionary(self.dictionary(depth + 1)?),
                Some(Token::ArrayEnd) | Some(Token::Keyword(_)) => continue,
            };
            if let Some(key) = key.take() {
                dict.set(key, value);
            }
        }
    }

    /// Reads `BI <dict> ID <data> EI`, returning the image dictionary.
    fn inline_image(&mut self) -> Result<Dictionary, ContentError> {
        let mut dict = Dictionary::new();
        let mut key: Option<Vec<u8>> = None;
        loop {
            let value = match self.next_token()? {
                None => return Err(self.error("inline image without ID")),
                Some(Token::Keyword(word)) if word == b"ID" => break,
                Some(Token::Object(Object::Name(name))) if key.is_none() => {
                    key = Some(name);
                    continue;
                }
                Some(Token::Object(object)) => object,
                Some(Token::ArrayStart) => self.array(1)?,
                Some(Token::DictStart) => Object::Dictionary(self.dictionary(1)?),
                Some(_) => continue,
            };
            if let Some(key) = key.take() {
                dict.set(key, value);
            }
        }
        // Exactly one whitespace byte separates ID from the sample data.
        if self.peek().is_some_and(is_whitespace) {
            self.pos += 1;
        }
        let start = self.pos;
        let data = self.data;
        let mut i = start;
        while i + 1 < data.len() {
            let preceded = i == start || is_whitespace(data[i - 1]);
            let followed = data.get(i + 2).map_or(true, |&b| is_whitespace(b) || is_delimiter(b));
            if preceded && followed && &data[i..i + 2] == b"EI" {
                self.pos = i + 2;
                return Ok(dict);
            }
            i += 1;
        }
        self.pos = data.len();
        Err(self.error("inline image without EI"))
    }
}

fn parse_number(word: &[u8]) -> Option<Object> {
    let first = *word.first()?;
    if !(first.is_ascii_digit() || matches!(first, b'+' | b'-' | b'.')) {
        return None;
    }
    let text = std::str::from_utf8(word).ok()?;
    if text.contains('.') {
        // Tolerate producers that write "--1.5" or "1.5.2".
        let cleaned: String = text.trim_start_matches(['+', '-']).to_string();
        let value: f32 = cleaned.split('.').take(2).collect::<Vec<_>>().join(".").parse().ok()?;
        let negative = text.starts_with('-');
        Some(Object::Real(if negative { -value } else { value }))
    } else {
        text.parse::<i64>().ok().map(Object::Integer)
    }
}
