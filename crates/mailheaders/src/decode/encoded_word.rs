use crate::charclass::{is_char_class, CharClass};
use crate::nom_utils::{make_context_error, parse_with, IResult, Span};
use crate::{MailHeaderError, Result};
use charset::Charset;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::char;
use nom::combinator::opt;
use nom::error::context;
use nom::sequence::preceded;
use nom::Parser;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    Q,
    B,
}

/// The pieces of an RFC 2047 encoded-word
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedWord<'a> {
    pub charset: &'a str,
    /// RFC 2231 language suffix; accepted and otherwise ignored
    pub language: Option<&'a str>,
    pub encoding: Encoding,
    pub text: &'a str,
}

/// Whether `word` has the outline of an encoded-word: it starts with
/// `=?`, ends with `?=` and has exactly two `?` in between.
/// A word with that outline is decoded strictly.
pub fn looks_like_encoded_word(word: &str) -> bool {
    word.len() >= 4
        && word.starts_with("=?")
        && word.ends_with("?=")
        && memchr::memchr_iter(b'?', word.as_bytes()).count() == 4
}

fn is_charset_char(c: char) -> bool {
    c != '*' && is_char_class(c, CharClass::TOKEN)
}

fn is_encoded_text_char(c: char) -> bool {
    c != '?' && is_char_class(c, CharClass::VISIBLE)
}

fn encoded_word(input: Span) -> IResult<Span, EncodedWord> {
    let (loc, (_, charset, language, _, marker, _, text, _)) = context(
        "encoded word",
        (
            tag("=?"),
            take_while1(is_charset_char),
            opt(preceded(char('*'), take_while1(is_charset_char))),
            char('?'),
            take_while1(is_charset_char),
            char('?'),
            take_while1(is_encoded_text_char),
            tag("?="),
        ),
    )
    .parse(input)?;

    let encoding = match *marker.fragment() {
        "Q" | "q" => Encoding::Q,
        "B" | "b" => Encoding::B,
        _ => {
            return Err(make_context_error(
                marker,
                format!("invalid encoding marker {:?}", marker.fragment()),
            ))
        }
    };

    Ok((
        loc,
        EncodedWord {
            charset: *charset.fragment(),
            language: language.map(|l| *l.fragment()),
            encoding,
            text: *text.fragment(),
        },
    ))
}

pub fn parse_encoded_word(word: &str) -> Result<EncodedWord<'_>> {
    parse_with(word, encoded_word)
}

impl EncodedWord<'_> {
    pub fn decode(&self) -> Result<String> {
        let charset =
            Charset::for_label_no_replacement(self.charset.as_bytes()).ok_or_else(|| {
                MailHeaderError::format(format!("unsupported charset {}", self.charset))
            })?;

        let bytes = match self.encoding {
            Encoding::B => data_encoding::BASE64
                .decode(self.text.as_bytes())
                .map_err(|err| {
                    MailHeaderError::format(format!("invalid base64 in encoded word: {err:#}"))
                })?,
            Encoding::Q => decode_q(self.text)?,
        };

        let (decoded, _malformed) = charset.decode_without_bom_handling(&bytes);
        Ok(decoded.into_owned())
    }
}

fn decode_q(text: &str) -> Result<Vec<u8>> {
    let bytes = text.as_bytes();
    let mut start = 0;
    while let Some(offset) = memchr::memchr(b'=', &bytes[start..]) {
        let escape = start + offset;
        let valid = bytes
            .get(escape + 1..escape + 3)
            .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit));
        if !valid {
            return Err(MailHeaderError::format(format!(
                "invalid escape at offset {escape} in Q encoded text {text:?}"
            )));
        }
        start = escape + 3;
    }

    quoted_printable::decode(text.replace('_', "=20"), quoted_printable::ParseMode::Robust)
        .map_err(|err| MailHeaderError::format(format!("invalid Q encoded text: {err:#}")))
}

pub fn decode_encoded_word(word: &str) -> Result<String> {
    parse_encoded_word(word)?.decode()
}

#[cfg(test)]
mod test {
    use super::*;
    use k9::assert_equal;

    #[test]
    fn lookalikes() {
        assert!(looks_like_encoded_word("=?utf-8?Q?a?="));
        assert!(looks_like_encoded_word("=?utf-8?Q??="));
        assert!(!looks_like_encoded_word("=?utf-8?Q?a?b?="));
        assert!(!looks_like_encoded_word("aa=?utf-8?Q?a?="));
        assert!(!looks_like_encoded_word("=?="));
    }

    #[test]
    fn decode_q_and_b() {
        assert_equal!(
            decode_encoded_word("=?ISO-8859-1?Q?Andr=E9_Pirard?=").unwrap(),
            "André Pirard"
        );
        assert_equal!(
            decode_encoded_word("=?utf-8?q?caf=c3=a9?=").unwrap(),
            "café"
        );
        assert_equal!(
            decode_encoded_word("=?UTF-8?B?wqcyMDAw?=").unwrap(),
            "§2000"
        );
        assert_equal!(
            decode_encoded_word("=?utf-8*en?Q?hello?=").unwrap(),
            "hello"
        );
    }

    #[test]
    fn parts() {
        assert_equal!(
            parse_encoded_word("=?us-ascii*en-US?b?SGk=?=").unwrap(),
            EncodedWord {
                charset: "us-ascii",
                language: Some("en-US"),
                encoding: Encoding::B,
                text: "SGk=",
            }
        );
    }

    #[test]
    fn strict_failures() {
        // Unknown marker
        assert!(decode_encoded_word("=?utf-8?X?abc?=").is_err());
        // Empty text
        assert!(decode_encoded_word("=?utf-8?Q??=").is_err());
        // Bad escape
        assert!(decode_encoded_word("=?utf-8?Q?a=Zb?=").is_err());
        assert!(decode_encoded_word("=?utf-8?Q?a=?=").is_err());
        // Bad base64
        assert!(decode_encoded_word("=?utf-8?B?a?=").is_err());
        // Unknown charset
        assert!(decode_encoded_word("=?x-no-such?Q?a?=").is_err());
    }
}
