use crate::charclass::is_whitespace;
use crate::decode::encoded_word::{decode_encoded_word, looks_like_encoded_word};
use crate::Result;

/// Accumulates decoded text from a sequence of words and whitespace
/// runs, dropping the whitespace that separates two encoded-words.
#[derive(Default, Debug)]
pub(crate) struct TextAssembler {
    out: String,
    pending_space: String,
    last_encoded: bool,
}

impl TextAssembler {
    pub fn push_space(&mut self, space: &str) {
        self.pending_space.push_str(space);
    }

    /// Push a word, decoding it if it looks like an encoded-word
    pub fn push_word(&mut self, word: &str) -> Result<()> {
        if looks_like_encoded_word(word) {
            let decoded = decode_encoded_word(word)?;
            if !self.last_encoded {
                self.out.push_str(&self.pending_space);
            }
            self.pending_space.clear();
            self.out.push_str(&decoded);
            self.last_encoded = true;
        } else {
            self.push_literal(word);
        }
        Ok(())
    }

    pub fn push_literal(&mut self, text: &str) {
        self.out.push_str(&self.pending_space);
        self.pending_space.clear();
        self.out.push_str(text);
        self.last_encoded = false;
    }

    /// Split `text` at whitespace and push the pieces
    pub fn push_unstructured(&mut self, text: &str) -> Result<()> {
        let bytes = text.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let start = i;
            if is_whitespace(bytes[i]) {
                while i < bytes.len() && is_whitespace(bytes[i]) {
                    i += 1;
                }
                self.push_space(&text[start..i]);
            } else {
                while i < bytes.len() && !is_whitespace(bytes[i]) {
                    i += 1;
                }
                self.push_word(&text[start..i])?;
            }
        }
        Ok(())
    }

    pub fn finish(mut self) -> String {
        self.out.push_str(&self.pending_space);
        self.out
    }
}

/// The whitespace between two tokens of a structured value, with any
/// comments removed. A comment with no whitespace around it still
/// separates the tokens, so it becomes a single space.
pub(crate) fn inter_token_space(between: &str) -> String {
    let mut space = String::new();
    let mut depth = 0usize;
    let mut saw_comment = false;
    let mut chars = between.chars();
    while let Some(c) = chars.next() {
        match c {
            '(' => {
                depth += 1;
                saw_comment = true;
            }
            ')' => depth = depth.saturating_sub(1),
            '\\' if depth > 0 => {
                chars.next();
            }
            ' ' | '\t' if depth == 0 => space.push(c),
            _ => {}
        }
    }
    if space.is_empty() && saw_comment {
        space.push(' ');
    }
    space
}
