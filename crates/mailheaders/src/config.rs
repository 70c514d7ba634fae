use crate::{MailHeaderError, Result};
use charset::Charset;
use serde::{Deserialize, Serialize};

/// Longest encoded-word permitted by RFC 2047
pub const MAX_ENCODED_WORD_LEN: usize = 75;

/// Which transfer encoding to use for encoded-words
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WordEncoding {
    /// Use B when it is strictly shorter than Q
    #[default]
    Auto,
    Q,
    B,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EncoderOptions {
    /// Label written into encoded-words and extended parameters.
    /// The payload is always UTF-8, so this must name UTF-8.
    pub charset: String,
    /// Soft line length that folding aims for
    pub line_length: usize,
    /// No line produced by the encoder may be longer than this
    pub hard_line_length: usize,
    pub word_encoding: WordEncoding,
    /// Longest bare word that may be absorbed between two encoded runs
    pub merge_bare_limit: usize,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            charset: "utf-8".to_string(),
            line_length: 78,
            hard_line_length: 998,
            word_encoding: WordEncoding::Auto,
            merge_bare_limit: 12,
        }
    }
}

impl EncoderOptions {
    pub fn validate(&self) -> Result<()> {
        match Charset::for_label_no_replacement(self.charset.as_bytes()) {
            Some(charset) if charset.name().eq_ignore_ascii_case("utf-8") => {}
            Some(charset) => {
                return Err(MailHeaderError::Config(format!(
                    "charset {} resolves to {}, only UTF-8 can be encoded",
                    self.charset,
                    charset.name()
                )));
            }
            None => {
                return Err(MailHeaderError::Config(format!(
                    "unknown charset {}",
                    self.charset
                )));
            }
        }

        // The label lands verbatim in encoded-words and parameters
        if !crate::charclass::is_token(&self.charset) || self.charset.contains('\'') {
            return Err(MailHeaderError::Config(format!(
                "charset label {:?} is not a valid token",
                self.charset
            )));
        }

        // An encoded-word must fit at least one Q encoded 4 byte character
        if self.charset.len() + 7 + 12 > MAX_ENCODED_WORD_LEN {
            return Err(MailHeaderError::Config(format!(
                "charset label {:?} is too long",
                self.charset
            )));
        }

        // Room for a folding space plus the smallest possible encoded-word
        let min_line = 1 + self.charset.len() + 7 + 4;
        if self.line_length < min_line {
            return Err(MailHeaderError::Config(format!(
                "line_length {} is too small, must be at least {min_line}",
                self.line_length
            )));
        }
        if self.hard_line_length < self.line_length {
            return Err(MailHeaderError::Config(format!(
                "hard_line_length {} is less than line_length {}",
                self.hard_line_length, self.line_length
            )));
        }
        Ok(())
    }
}
