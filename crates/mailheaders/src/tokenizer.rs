//! A restartable tokenizer for structured header values.
//!
//! The tokenizer keeps a single byte position into the source and walks
//! forwards, producing one [Token] per call. Tokens refer back into the
//! source by position and length; nothing is copied.
use crate::charclass::{is_class, is_whitespace, CharClass};
use crate::{MailHeaderError, Result};
use std::borrow::Cow;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    /// A run of characters from the grammar's value class
    Value,
    /// Any single character that is not part of another token
    Separator,
    QuotedValue,
    RoundBracketed,
    AngleBracketed,
    SquareBracketed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: usize,
    pub length: usize,
}

impl Token {
    pub fn end(&self) -> usize {
        self.position + self.length
    }

    /// The token text as it appears in the source, delimiters included
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.position..self.end()]
    }

    pub fn is_separator(&self, source: &str, c: char) -> bool {
        self.kind == TokenKind::Separator && source[self.position..].starts_with(c)
    }

    /// The token text with its delimiters removed and any quoted-pairs
    /// resolved. Angle bracketed content is returned as-is.
    pub fn content<'a>(&self, source: &'a str) -> Cow<'a, str> {
        let text = self.text(source);
        match self.kind {
            TokenKind::Value | TokenKind::Separator => Cow::Borrowed(text),
            TokenKind::AngleBracketed => Cow::Borrowed(&text[1..text.len() - 1]),
            TokenKind::QuotedValue | TokenKind::RoundBracketed | TokenKind::SquareBracketed => {
                unescape(&text[1..text.len() - 1])
            }
        }
    }
}

/// Resolve RFC 5322 quoted-pairs
pub fn unescape(text: &str) -> Cow<'_, str> {
    if !text.contains('\\') {
        return Cow::Borrowed(text);
    }
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                result.push(next);
            }
        } else {
            result.push(c);
        }
    }
    Cow::Owned(result)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EscapeMode {
    None,
    /// `\x` stands for `x`
    EscapedChar,
    /// Quoted-strings are skipped over whole, so that a closing
    /// delimiter inside of one does not end the token
    NestedQuotedValue,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenFormat {
    pub open: u8,
    pub close: u8,
    pub kind: TokenKind,
    pub escape: EscapeMode,
    pub nested: bool,
    /// Skipped by [Tokenizer::next_semantic_token]
    pub discardable: bool,
}

pub const QUOTED_STRING: TokenFormat = TokenFormat {
    open: b'"',
    close: b'"',
    kind: TokenKind::QuotedValue,
    escape: EscapeMode::EscapedChar,
    nested: false,
    discardable: false,
};

pub const COMMENT: TokenFormat = TokenFormat {
    open: b'(',
    close: b')',
    kind: TokenKind::RoundBracketed,
    escape: EscapeMode::EscapedChar,
    nested: true,
    discardable: true,
};

pub const ANGLE_ADDRESS: TokenFormat = TokenFormat {
    open: b'<',
    close: b'>',
    kind: TokenKind::AngleBracketed,
    escape: EscapeMode::NestedQuotedValue,
    nested: false,
    discardable: false,
};

pub const DOMAIN_LITERAL: TokenFormat = TokenFormat {
    open: b'[',
    close: b']',
    kind: TokenKind::SquareBracketed,
    escape: EscapeMode::EscapedChar,
    nested: false,
    discardable: false,
};

const STRUCTURED_FORMATS: &[TokenFormat] = &[QUOTED_STRING, COMMENT, ANGLE_ADDRESS, DOMAIN_LITERAL];

#[derive(Clone, Copy, Debug)]
pub struct Grammar {
    pub formats: &'static [TokenFormat],
    pub value_class: CharClass,
    /// Absorb complete `=?...?=` runs into values
    pub encoded_words: bool,
}

/// RFC 5322 structured fields
pub const ATOM: Grammar = Grammar {
    formats: STRUCTURED_FORMATS,
    value_class: CharClass::ATOM,
    encoded_words: true,
};

/// RFC 2045 style fields such as Content-Type
pub const TOKEN: Grammar = Grammar {
    formats: STRUCTURED_FORMATS,
    value_class: CharClass::TOKEN,
    encoded_words: true,
};

pub const UNSTRUCTURED: Grammar = Grammar {
    formats: &[],
    value_class: CharClass::VISIBLE,
    encoded_words: false,
};

/// Length of the encoded-word that starts `bytes`, if there is one.
/// Only the outline is checked here; the decoder validates the rest.
pub(crate) fn encoded_word_len(bytes: &[u8]) -> Option<usize> {
    if !bytes.starts_with(b"=?") {
        return None;
    }
    let mut questions = 0;
    for (i, &b) in bytes.iter().enumerate().skip(2) {
        if is_whitespace(b) {
            return None;
        }
        if b == b'?' {
            questions += 1;
            if questions == 3 {
                return (bytes.get(i + 1) == Some(&b'=')).then_some(i + 2);
            }
        }
    }
    None
}

pub struct Tokenizer<'a> {
    source: &'a str,
    grammar: &'a Grammar,
    position: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: &'a str, grammar: &'a Grammar) -> Self {
        Self {
            source,
            grammar,
            position: 0,
        }
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Rewind or skip ahead. `position` must lie on a character boundary.
    pub fn set_position(&mut self, position: usize) {
        self.position = position.min(self.source.len());
    }

    pub fn next_token(&mut self) -> Result<Option<Token>> {
        let bytes = self.source.as_bytes();
        while self.position < bytes.len() && is_whitespace(bytes[self.position]) {
            self.position += 1;
        }
        if self.position >= bytes.len() {
            return Ok(None);
        }

        let start = self.position;
        let b = bytes[start];

        let (kind, end) = if let Some(format) = self.grammar.formats.iter().find(|f| f.open == b)
        {
            (format.kind, self.scan_delimited(start, format)?)
        } else {
            let end = self.scan_value(start);
            if end > start {
                (TokenKind::Value, end)
            } else {
                if b == b'\\' && start + 1 == bytes.len() {
                    return Err(MailHeaderError::format(format!(
                        "trailing backslash in {:?}",
                        self.source
                    )));
                }
                // Separators are always ASCII; anything else is a value
                (TokenKind::Separator, start + 1)
            }
        };

        self.position = end;
        Ok(Some(Token {
            kind,
            position: start,
            length: end - start,
        }))
    }

    /// Like [Self::next_token], but skips comments
    pub fn next_semantic_token(&mut self) -> Result<Option<Token>> {
        loop {
            match self.next_token()? {
                Some(token) if self.is_discardable(&token) => continue,
                other => return Ok(other),
            }
        }
    }

    fn is_discardable(&self, token: &Token) -> bool {
        self.grammar
            .formats
            .iter()
            .any(|f| f.kind == token.kind && f.discardable)
    }

    fn scan_value(&self, start: usize) -> usize {
        let bytes = self.source.as_bytes();
        let mut i = start;
        while i < bytes.len() {
            if self.grammar.encoded_words {
                if let Some(len) = encoded_word_len(&bytes[i..]) {
                    i += len;
                    continue;
                }
            }
            let b = bytes[i];
            if b >= 0x80 || is_class(b, self.grammar.value_class) {
                i += 1;
            } else {
                break;
            }
        }
        i
    }

    fn scan_delimited(&self, start: usize, format: &TokenFormat) -> Result<usize> {
        let bytes = self.source.as_bytes();
        let mut depth = 1;
        let mut i = start + 1;
        while i < bytes.len() {
            let b = bytes[i];
            match format.escape {
                EscapeMode::EscapedChar if b == b'\\' => {
                    if i + 1 >= bytes.len() {
                        return Err(MailHeaderError::format(format!(
                            "trailing backslash in {:?}",
                            self.source
                        )));
                    }
                    i += 2;
                    continue;
                }
                EscapeMode::NestedQuotedValue if b == b'"' => {
                    i = self.skip_quoted(i)?;
                    continue;
                }
                _ => {}
            }

            if b == format.close {
                depth -= 1;
                if depth == 0 {
                    return Ok(i + 1);
                }
            } else if b == format.open && format.nested {
                depth += 1;
            }
            i += 1;
        }

        Err(MailHeaderError::format(format!(
            "unterminated {:?} token starting at offset {start} in {:?}",
            format.kind, self.source
        )))
    }

    /// Returns the position just after the quoted-string at `start`
    fn skip_quoted(&self, start: usize) -> Result<usize> {
        let bytes = self.source.as_bytes();
        let mut i = start + 1;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => i += 2,
                b'"' => return Ok(i + 1),
                _ => i += 1,
            }
        }
        Err(MailHeaderError::format(format!(
            "unterminated quoted string starting at offset {start} in {:?}",
            self.source
        )))
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = Result<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token().transpose()
    }
}
