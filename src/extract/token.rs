//! Pull tokenizer over one line of JSON.
//!
//! Emits [`TokenEvent`]s in document order without building a tree. On
//! malformed or truncated input it yields a single [`TokenizeError`] and then
//! stops, so callers keep whatever they built from the tokens before it.

use serde_json::{Number, Value};

use crate::error::TokenizeError;

/// One structural or scalar token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenEvent {
    StartObject,
    EndObject,
    StartArray,
    EndArray,
    Key(String),
    Scalar(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Expecting the root value.
    Root,
    /// Just after `{`: a key or `}`.
    ObjectFirst,
    /// After `,` in an object: a key.
    ObjectKey,
    /// After a key: `:`.
    ObjectColon,
    /// After `:`: a value.
    ObjectValue,
    /// Just after `[`: a value or `]`.
    ArrayFirst,
    /// After `,` in an array: a value.
    ArrayValue,
    /// After a complete value inside a container: `,` or the closer.
    AfterValue,
    /// Root value complete: only whitespace may follow.
    End,
}

/// Streaming tokenizer over a byte slice.
pub struct Tokenizer<'a> {
    input: &'a [u8],
    pos: usize,
    containers: Vec<Container>,
    state: State,
    finished: bool,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            containers: Vec::new(),
            state: State::Root,
            finished: false,
        }
    }

    /// Byte offset of the next unread character.
    pub fn offset(&self) -> usize {
        self.pos
    }

    fn skip_whitespace(&mut self) {
        while let Some(b' ' | b'\t' | b'\n' | b'\r') = self.input.get(self.pos) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn unexpected(&self) -> TokenizeError {
        match self.peek() {
            None => TokenizeError::UnexpectedEof { offset: self.pos },
            Some(byte) => TokenizeError::UnexpectedCharacter {
                found: char::from(byte),
                offset: self.pos,
            },
        }
    }

    fn value_done(&mut self) {
        self.state = if self.containers.is_empty() {
            State::End
        } else {
            State::AfterValue
        };
    }

    fn step(&mut self) -> Result<Option<TokenEvent>, TokenizeError> {
        loop {
            self.skip_whitespace();
            match self.state {
                State::Root if self.peek().is_none() => return Ok(None),
                State::Root | State::ObjectValue | State::ArrayValue => {
                    return self.value().map(Some);
                }
                State::ArrayFirst => {
                    if self.peek() == Some(b']') {
                        return Ok(Some(self.close(Container::Array)?));
                    }
                    return self.value().map(Some);
                }
                State::ObjectFirst => {
                    if self.peek() == Some(b'}') {
                        return Ok(Some(self.close(Container::Object)?));
                    }
                    return self.key().map(Some);
                }
                State::ObjectKey => return self.key().map(Some),
                State::ObjectColon => {
                    if self.peek() != Some(b':') {
                        return Err(self.unexpected());
                    }
                    self.pos += 1;
                    self.state = State::ObjectValue;
                }
                State::AfterValue => {
                    let top = self.containers.last().copied();
                    match (self.peek(), top) {
                        (Some(b','), Some(Container::Object)) => {
                            self.pos += 1;
                            self.state = State::ObjectKey;
                        }
                        (Some(b','), Some(Container::Array)) => {
                            self.pos += 1;
                            self.state = State::ArrayValue;
                        }
                        (Some(b'}'), Some(Container::Object)) => {
                            return Ok(Some(self.close(Container::Object)?));
                        }
                        (Some(b']'), Some(Container::Array)) => {
                            return Ok(Some(self.close(Container::Array)?));
                        }
                        _ => return Err(self.unexpected()),
                    }
                }
                State::End => {
                    return match self.peek() {
                        None => Ok(None),
                        Some(_) => Err(TokenizeError::TrailingCharacters { offset: self.pos }),
                    };
                }
            }
        }
    }

    fn close(&mut self, expected: Container) -> Result<TokenEvent, TokenizeError> {
        match self.containers.pop() {
            Some(container) if container == expected => {
                self.pos += 1;
                self.value_done();
                Ok(match expected {
                    Container::Object => TokenEvent::EndObject,
                    Container::Array => TokenEvent::EndArray,
                })
            }
            _ => Err(self.unexpected()),
        }
    }

    fn key(&mut self) -> Result<TokenEvent, TokenizeError> {
        if self.peek() != Some(b'"') {
            return Err(self.unexpected());
        }
        let key = self.string()?;
        self.state = State::ObjectColon;
        Ok(TokenEvent::Key(key))
    }

    fn value(&mut self) -> Result<TokenEvent, TokenizeError> {
        let event = match self.peek() {
            Some(b'{') => {
                self.pos += 1;
                self.containers.push(Container::Object);
                self.state = State::ObjectFirst;
                return Ok(TokenEvent::StartObject);
            }
            Some(b'[') => {
                self.pos += 1;
                self.containers.push(Container::Array);
                self.state = State::ArrayFirst;
                return Ok(TokenEvent::StartArray);
            }
            Some(b'"') => TokenEvent::Scalar(Value::String(self.string()?)),
            Some(b't') => TokenEvent::Scalar(self.literal(b"true", Value::Bool(true))?),
            Some(b'f') => TokenEvent::Scalar(self.literal(b"false", Value::Bool(false))?),
            Some(b'n') => TokenEvent::Scalar(self.literal(b"null", Value::Null)?),
            Some(b'-' | b'0'..=b'9') => TokenEvent::Scalar(self.number()?),
            _ => return Err(self.unexpected()),
        };
        self.value_done();
        Ok(event)
    }

    fn literal(&mut self, word: &[u8], value: Value) -> Result<Value, TokenizeError> {
        let rest = &self.input[self.pos..];
        if rest.starts_with(word) {
            self.pos += word.len();
            return Ok(value);
        }
        // A prefix of the word at end of input is a truncation, not garbage.
        if word.starts_with(rest) {
            return Err(TokenizeError::UnexpectedEof {
                offset: self.input.len(),
            });
        }
        let mismatch = rest
            .iter()
            .zip(word)
            .position(|(a, b)| a != b)
            .unwrap_or(0);
        self.pos += mismatch;
        Err(self.unexpected())
    }

    fn number(&mut self) -> Result<Value, TokenizeError> {
        let start = self.pos;
        let digits = |this: &mut Self| -> usize {
            let from = this.pos;
            while let Some(b'0'..=b'9') = this.peek() {
                this.pos += 1;
            }
            this.pos - from
        };

        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        match self.peek() {
            Some(b'0') => self.pos += 1,
            Some(b'1'..=b'9') => {
                digits(self);
            }
            None => return Err(TokenizeError::UnexpectedEof { offset: self.pos }),
            Some(_) => return Err(TokenizeError::InvalidNumber { offset: start }),
        }

        let mut integral = true;
        if self.peek() == Some(b'.') {
            integral = false;
            self.pos += 1;
            if digits(self) == 0 {
                return Err(self.number_error(start));
            }
        }
        if let Some(b'e' | b'E') = self.peek() {
            integral = false;
            self.pos += 1;
            if let Some(b'+' | b'-') = self.peek() {
                self.pos += 1;
            }
            if digits(self) == 0 {
                return Err(self.number_error(start));
            }
        }

        // The slice only holds ASCII digits, sign, dot, and exponent markers.
        let text = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| TokenizeError::InvalidNumber { offset: start })?;

        if integral {
            if let Ok(i) = text.parse::<i64>() {
                return Ok(Value::Number(Number::from(i)));
            }
            if let Ok(u) = text.parse::<u64>() {
                return Ok(Value::Number(Number::from(u)));
            }
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or(TokenizeError::InvalidNumber { offset: start })
    }

    fn number_error(&self, start: usize) -> TokenizeError {
        if self.peek().is_none() {
            TokenizeError::UnexpectedEof { offset: self.pos }
        } else {
            TokenizeError::InvalidNumber { offset: start }
        }
    }

    /// Parse a string starting at the opening quote.
    fn string(&mut self) -> Result<String, TokenizeError> {
        let open = self.pos;
        self.pos += 1;
        let mut out = String::new();
        let mut run_start = self.pos;

        loop {
            match self.peek() {
                None => return Err(TokenizeError::UnexpectedEof { offset: self.pos }),
                Some(b'"') => {
                    self.push_run(&mut out, run_start, open)?;
                    self.pos += 1;
                    return Ok(out);
                }
                Some(b'\\') => {
                    self.push_run(&mut out, run_start, open)?;
                    self.pos += 1;
                    self.escape(&mut out)?;
                    run_start = self.pos;
                }
                Some(byte) if byte < 0x20 => return Err(self.unexpected()),
                Some(_) => self.pos += 1,
            }
        }
    }

    fn push_run(&self, out: &mut String, from: usize, open: usize) -> Result<(), TokenizeError> {
        let run = std::str::from_utf8(&self.input[from..self.pos])
            .map_err(|_| TokenizeError::InvalidUtf8 { offset: open })?;
        out.push_str(run);
        Ok(())
    }

    fn escape(&mut self, out: &mut String) -> Result<(), TokenizeError> {
        let at = self.pos - 1;
        let Some(byte) = self.peek() else {
            return Err(TokenizeError::UnexpectedEof { offset: self.pos });
        };
        self.pos += 1;
        let c = match byte {
            b'"' => '"',
            b'\\' => '\\',
            b'/' => '/',
            b'b' => '\u{8}',
            b'f' => '\u{c}',
            b'n' => '\n',
            b'r' => '\r',
            b't' => '\t',
            b'u' => {
                let high = self.hex4()?;
                match high {
                    0xD800..=0xDBFF => {
                        if self.input.get(self.pos..self.pos + 2) != Some(b"\\u") {
                            return Err(self.escape_error(at));
                        }
                        self.pos += 2;
                        let low = self.hex4()?;
                        if !(0xDC00..=0xDFFF).contains(&low) {
                            return Err(TokenizeError::InvalidEscape { offset: at });
                        }
                        let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                        char::from_u32(code).ok_or(TokenizeError::InvalidEscape { offset: at })?
                    }
                    0xDC00..=0xDFFF => return Err(TokenizeError::InvalidEscape { offset: at }),
                    code => {
                        char::from_u32(code).ok_or(TokenizeError::InvalidEscape { offset: at })?
                    }
                }
            }
            _ => return Err(TokenizeError::InvalidEscape { offset: at }),
        };
        out.push(c);
        Ok(())
    }

    fn escape_error(&self, at: usize) -> TokenizeError {
        if self.pos + 2 > self.input.len() {
            TokenizeError::UnexpectedEof {
                offset: self.input.len(),
            }
        } else {
            TokenizeError::InvalidEscape { offset: at }
        }
    }

    fn hex4(&mut self) -> Result<u32, TokenizeError> {
        let at = self.pos;
        let Some(digits) = self.input.get(at..at + 4) else {
            return Err(TokenizeError::UnexpectedEof {
                offset: self.input.len(),
            });
        };
        let mut code = 0;
        for &d in digits {
            let nibble = char::from(d)
                .to_digit(16)
                .ok_or(TokenizeError::InvalidEscape { offset: at })?;
            code = code * 16 + nibble;
        }
        self.pos += 4;
        Ok(code)
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = Result<TokenEvent, TokenizeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.step() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
