//! Character classification for header syntax.
//!
//! Every ASCII byte maps to a set of [CharClass] flags via a table that
//! is computed at compile time. Bytes at or above 0x80 belong to no class;
//! callers that accept UTF-8 text check for those separately.

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CharClass: u16 {
        /// SP and HTAB
        const WHITESPACE = 1 << 0;
        /// 0x21 through 0x7e
        const VISIBLE = 1 << 1;
        /// RFC 5322 atext
        const ATOM = 1 << 2;
        /// RFC 2045 token characters
        const TOKEN = 1 << 3;
        /// Anything that may appear in a quoted-string, escaped or not
        const QUOTABLE = 1 << 4;
        /// The base64 alphabet including padding
        const BASE64 = 1 << 5;
        /// Characters left as-is in a Q encoded word within a phrase
        const Q_PHRASE = 1 << 6;
        /// Characters left as-is in a Q encoded word within unstructured text
        const Q_TEXT = 1 << 7;
        /// RFC 2231 attribute-char
        const ATTRIBUTE = 1 << 8;
        const CONTROL = 1 << 9;
    }
}

const fn classify(b: u8) -> u16 {
    let mut bits = 0;
    if b == b' ' || b == b'\t' {
        bits |= CharClass::WHITESPACE.bits();
    }
    if b < 0x20 || b == 0x7f {
        bits |= CharClass::CONTROL.bits();
    }
    if (b >= 0x20 && b <= 0x7e) || b == b'\t' {
        bits |= CharClass::QUOTABLE.bits();
    }
    if b >= 0x21 && b <= 0x7e {
        bits |= CharClass::VISIBLE.bits();
        let alnum = b.is_ascii_alphanumeric();

        if alnum
            || matches!(
                b,
                b'!' | b'#'
                    | b'$'
                    | b'%'
                    | b'&'
                    | b'\''
                    | b'*'
                    | b'+'
                    | b'-'
                    | b'/'
                    | b'='
                    | b'?'
                    | b'^'
                    | b'_'
                    | b'`'
                    | b'{'
                    | b'|'
                    | b'}'
                    | b'~'
            )
        {
            bits |= CharClass::ATOM.bits();
        }

        let tspecial = matches!(
            b,
            b'(' | b')'
                | b'<'
                | b'>'
                | b'@'
                | b','
                | b';'
                | b':'
                | b'\\'
                | b'"'
                | b'/'
                | b'['
                | b']'
                | b'?'
                | b'='
        );
        if !tspecial {
            bits |= CharClass::TOKEN.bits();
            if !matches!(b, b'*' | b'\'' | b'%') {
                bits |= CharClass::ATTRIBUTE.bits();
            }
        }

        if alnum || matches!(b, b'+' | b'/' | b'=') {
            bits |= CharClass::BASE64.bits();
        }
        if alnum || matches!(b, b'!' | b'*' | b'+' | b'-' | b'/') {
            bits |= CharClass::Q_PHRASE.bits();
        }
        if !matches!(b, b'=' | b'?' | b'_') {
            bits |= CharClass::Q_TEXT.bits();
        }
    }
    bits
}

const fn build_table() -> [u16; 128] {
    let mut table = [0u16; 128];
    let mut i = 0;
    while i < 128 {
        table[i] = classify(i as u8);
        i += 1;
    }
    table
}

static CLASSES: [u16; 128] = build_table();

pub fn class_of(b: u8) -> CharClass {
    match CLASSES.get(b as usize) {
        Some(bits) => CharClass::from_bits_retain(*bits),
        None => CharClass::empty(),
    }
}

pub fn is_class(b: u8, class: CharClass) -> bool {
    class_of(b).contains(class)
}

pub fn is_char_class(c: char, class: CharClass) -> bool {
    c.is_ascii() && is_class(c as u8, class)
}

pub(crate) fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

/// True when `s` is non-empty and made only of `class` bytes
pub fn all_of_class(s: &str, class: CharClass) -> bool {
    !s.is_empty() && s.bytes().all(|b| is_class(b, class))
}

pub fn is_atom(s: &str) -> bool {
    all_of_class(s, CharClass::ATOM)
}

pub fn is_token(s: &str) -> bool {
    all_of_class(s, CharClass::TOKEN)
}

/// RFC 5322 dot-atom-text
pub fn is_dot_atom(s: &str) -> bool {
    !s.is_empty() && s.split('.').all(is_atom)
}

/// An RFC 5322 domain-literal such as `[127.0.0.1]`
pub fn is_domain_literal(s: &str) -> bool {
    match s.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        Some(inner) => inner
            .bytes()
            .all(|b| is_class(b, CharClass::VISIBLE) && !matches!(b, b'[' | b']' | b'\\')),
        None => false,
    }
}

/// A message identifier such as the content of a Message-ID or
/// List-Id field: a dot-atom, optionally followed by `@` and a
/// dot-atom or domain literal.
pub fn is_message_id(s: &str) -> bool {
    match s.split_once('@') {
        Some((left, right)) => {
            is_dot_atom(left) && (is_dot_atom(right) || is_domain_literal(right))
        }
        None => is_dot_atom(s),
    }
}
