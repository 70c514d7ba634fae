use crate::{FieldConformance, MailHeaderError, Result};
use bstr::ByteSlice;
use std::io::BufRead;

/// Physical lines longer than this (excluding the line ending) are flagged
const HARD_LINE_LIMIT: usize = 998;

/// A header field as it appeared on the wire, with its value unfolded
/// but otherwise undecoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawField {
    pub name: String,
    pub value: String,
    pub conformance: FieldConformance,
}

impl RawField {
    /// Parse a single field from the start of `block`, returning it
    /// together with the number of bytes that it occupied, including
    /// its continuation lines and final line ending.
    pub fn parse(block: &[u8]) -> Result<(Self, usize)> {
        enum State {
            Initial,
            Name,
            Separator,
            Value,
            NewLine,
        }

        let mut state = State::Initial;

        let mut iter = block.iter();
        let mut c = *iter
            .next()
            .ok_or_else(|| MailHeaderError::format("empty header field"))?;

        let mut name_end = None;
        let mut value = vec![];

        let mut idx = 0usize;
        let mut conformance = FieldConformance::default();
        let mut saw_cr = false;
        let mut line_start = 0;
        let mut max_line_len = 0;

        loop {
            match state {
                State::Initial => {
                    if c == b' ' || c == b'\t' {
                        return Err(MailHeaderError::format(
                            "continuation line without a preceding field",
                        ));
                    }
                    if c == b'\r' || c == b'\n' {
                        return Err(MailHeaderError::format("empty header field"));
                    }
                    state = State::Name;
                    continue;
                }
                State::Name => {
                    if c == b':' {
                        if name_end.is_none() {
                            name_end.replace(idx);
                        }
                        state = State::Separator;
                    } else if c == b' ' || c == b'\t' {
                        if name_end.is_none() {
                            name_end.replace(idx);
                        }
                        conformance.set(FieldConformance::NAME_ENDS_WITH_SPACE, true);
                    } else if c == b'\r' || c == b'\n' {
                        return Err(MailHeaderError::format(format!(
                            "header field {:?} has no colon",
                            block[..idx].to_str_lossy()
                        )));
                    } else if !(33..=126).contains(&c) || name_end.is_some() {
                        return Err(MailHeaderError::format(format!(
                            "header name must be comprised of printable US-ASCII characters. Found {c:?}"
                        )));
                    }
                }
                State::Separator => {
                    if c != b' ' && c != b'\t' {
                        state = State::Value;
                        continue;
                    }
                }
                State::Value => {
                    if c == b'\n' {
                        if !saw_cr {
                            conformance.set(FieldConformance::NON_CANONICAL_LINE_ENDINGS, true);
                        }
                        let line_len = idx - line_start - usize::from(saw_cr);
                        max_line_len = max_line_len.max(line_len);
                        state = State::NewLine;
                        saw_cr = false;
                        line_start = idx + 1;
                    } else if c == b'\r' {
                        if saw_cr {
                            value.push(b'\r');
                        }
                        saw_cr = true;
                    } else {
                        if saw_cr {
                            // A lone CR is kept as part of the value
                            value.push(b'\r');
                            saw_cr = false;
                        }
                        value.push(c);
                    }
                }
                State::NewLine => {
                    if c == b' ' || c == b'\t' {
                        state = State::Value;
                        continue;
                    }
                    break;
                }
            }
            idx += 1;
            c = match iter.next() {
                None => break,
                Some(v) => *v,
            };
        }

        let name_end = name_end.ok_or_else(|| {
            MailHeaderError::format(format!(
                "header field {:?} has no colon",
                block[..idx].to_str_lossy()
            ))
        })?;

        if !matches!(state, State::NewLine) {
            max_line_len = max_line_len.max(idx - line_start - usize::from(saw_cr));
        }
        if max_line_len > HARD_LINE_LIMIT {
            conformance.set(FieldConformance::LINE_TOO_LONG, true);
        }

        let leading = value
            .iter()
            .take_while(|&&b| b == b' ' || b == b'\t')
            .count();
        value.drain(..leading);

        let name = String::from_utf8_lossy(&block[..name_end]).into_owned();
        let value = match String::from_utf8(value) {
            Ok(value) => value,
            Err(err) => {
                conformance.set(FieldConformance::NON_UTF8, true);
                err.into_bytes().to_str_lossy().into_owned()
            }
        };

        Ok((
            Self {
                name,
                value,
                conformance,
            },
            idx,
        ))
    }

    /// Parse every field in a header block. Parsing stops at the first
    /// empty line, so a complete message may be passed in.
    pub fn parse_block(block: &[u8]) -> Result<Vec<Self>> {
        HeaderLoader::new(block).collect()
    }
}

fn is_blank_line(line: &[u8]) -> bool {
    line == b"\n" || line == b"\r\n"
}

/// Reads header fields one at a time from a buffered reader,
/// joining continuation lines before each field is parsed.
pub struct HeaderLoader<R> {
    reader: R,
    lookahead: Vec<u8>,
    done: bool,
}

impl<R: BufRead> HeaderLoader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            lookahead: vec![],
            done: false,
        }
    }

    pub fn next_field(&mut self) -> Result<Option<RawField>> {
        if self.done {
            return Ok(None);
        }

        let mut field = std::mem::take(&mut self.lookahead);
        if field.is_empty() && self.fill(&mut field)? == 0 {
            self.done = true;
            return Ok(None);
        }
        if is_blank_line(&field) {
            self.done = true;
            return Ok(None);
        }

        loop {
            let mut line = vec![];
            if self.fill(&mut line)? == 0 {
                break;
            }
            if matches!(line.first(), Some(b' ' | b'\t')) {
                field.extend_from_slice(&line);
            } else {
                self.lookahead = line;
                break;
            }
        }

        let (parsed, _) = RawField::parse(&field)?;
        if !parsed.conformance.is_empty() {
            tracing::debug!(
                field = %parsed.name,
                conformance = %parsed.conformance,
                "loaded non-conforming header field"
            );
        }
        Ok(Some(parsed))
    }

    fn fill(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        match self.reader.read_until(b'\n', buf) {
            Ok(n) => Ok(n),
            Err(err) => {
                self.done = true;
                Err(err.into())
            }
        }
    }
}

impl<R: BufRead> Iterator for HeaderLoader<R> {
    type Item = Result<RawField>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_field().transpose()
    }
}
