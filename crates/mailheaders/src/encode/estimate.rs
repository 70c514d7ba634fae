//! Encoders that can report, without writing anything, how much of an
//! input they would consume within a given output budget.
//!
//! Each encoder performs a single walk over its input that is shared by
//! [EstimatingEncoder::estimate] and [EstimatingEncoder::encode]; the
//! only difference between the two is where the output bytes go, so the
//! numbers they return always agree.
use crate::charclass::{is_class, CharClass};
use crate::config::MAX_ENCODED_WORD_LEN;

static HEX_CHARS: &[u8] = b"0123456789ABCDEF";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Estimate {
    /// Output bytes
    pub produced: usize,
    /// Input bytes
    pub consumed: usize,
}

pub trait EstimatingEncoder {
    /// How much of `input` would fit within `budget` output bytes.
    /// `part_index` is the position of this chunk within the value,
    /// and `is_last_part` says whether the value ends with `input`.
    fn estimate(
        &self,
        input: &[u8],
        budget: usize,
        part_index: usize,
        is_last_part: bool,
    ) -> Estimate;

    /// Append the encoding of as much of `input` as fits to `out`
    fn encode(
        &self,
        input: &[u8],
        out: &mut Vec<u8>,
        budget: usize,
        part_index: usize,
        is_last_part: bool,
    ) -> Estimate;
}

trait Sink {
    fn put(&mut self, bytes: &[u8]);
}

struct Discard;

impl Sink for Discard {
    fn put(&mut self, _bytes: &[u8]) {}
}

impl Sink for Vec<u8> {
    fn put(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

macro_rules! estimating_encoder {
    ($name:ty) => {
        impl EstimatingEncoder for $name {
            fn estimate(
                &self,
                input: &[u8],
                budget: usize,
                part_index: usize,
                is_last_part: bool,
            ) -> Estimate {
                self.walk(input, &mut Discard, budget, part_index, is_last_part)
            }

            fn encode(
                &self,
                input: &[u8],
                out: &mut Vec<u8>,
                budget: usize,
                part_index: usize,
                is_last_part: bool,
            ) -> Estimate {
                self.walk(input, out, budget, part_index, is_last_part)
            }
        }
    };
}

/// Length of the UTF-8 sequence starting at `input[0]`,
/// clamped to the length of `input`
fn char_len(input: &[u8]) -> usize {
    let len = match input.first() {
        Some(0xc0..=0xdf) => 2,
        Some(0xe0..=0xef) => 3,
        Some(0xf0..=0xf7) => 4,
        _ => 1,
    };
    len.min(input.len())
}

fn push_hex(sink: &mut impl Sink, prefix: u8, b: u8) {
    sink.put(&[
        prefix,
        HEX_CHARS[(b >> 4) as usize],
        HEX_CHARS[(b & 0x0f) as usize],
    ]);
}

/// The body of an RFC 5322 quoted-string
#[derive(Clone, Copy, Debug, Default)]
pub struct QuotedStringEncoder;

impl QuotedStringEncoder {
    pub fn new() -> Self {
        Self
    }

    fn walk(
        &self,
        input: &[u8],
        sink: &mut impl Sink,
        budget: usize,
        part_index: usize,
        is_last_part: bool,
    ) -> Estimate {
        let open = part_index == 0;
        if usize::from(open) > budget {
            return Estimate::default();
        }
        let mut produced = usize::from(open);
        let mut consumed = 0;

        while consumed < input.len() {
            let b = input[consumed];
            if !is_class(b, CharClass::QUOTABLE) {
                break;
            }
            let cost = if b == b'"' || b == b'\\' { 2 } else { 1 };
            let closing = usize::from(is_last_part && consumed + 1 == input.len());
            if produced + cost + closing > budget {
                break;
            }
            produced += cost;
            consumed += 1;
        }

        if consumed == 0 && !input.is_empty() {
            return Estimate::default();
        }
        let close = is_last_part && consumed == input.len();
        if close && input.is_empty() && produced + 1 > budget {
            return Estimate::default();
        }
        produced += usize::from(close);

        if open {
            sink.put(b"\"");
        }
        for &b in &input[..consumed] {
            if b == b'"' || b == b'\\' {
                sink.put(&[b'\\', b]);
            } else {
                sink.put(&[b]);
            }
        }
        if close {
            sink.put(b"\"");
        }

        Estimate { produced, consumed }
    }
}

estimating_encoder!(QuotedStringEncoder);

/// RFC 2047 Q encoding. Bytes in `allowed` are written as-is; the
/// class must not include `=`, `?` or `_`.
#[derive(Clone, Copy, Debug)]
pub struct EncodedWordQEncoder<'a> {
    charset: &'a str,
    allowed: CharClass,
}

impl<'a> EncodedWordQEncoder<'a> {
    pub fn new(charset: &'a str, allowed: CharClass) -> Self {
        Self { charset, allowed }
    }

    fn byte_cost(&self, b: u8) -> usize {
        if b == b' ' || is_class(b, self.allowed) {
            1
        } else {
            3
        }
    }

    fn walk(
        &self,
        input: &[u8],
        sink: &mut impl Sink,
        budget: usize,
        _part_index: usize,
        _is_last_part: bool,
    ) -> Estimate {
        // =? charset ?Q? ... ?=
        let overhead = self.charset.len() + 7;
        let limit = budget.min(MAX_ENCODED_WORD_LEN);

        let mut text_len = 0;
        let mut consumed = 0;
        while consumed < input.len() {
            let n = char_len(&input[consumed..]);
            let cost: usize = input[consumed..consumed + n]
                .iter()
                .map(|&b| self.byte_cost(b))
                .sum();
            if overhead + text_len + cost > limit {
                break;
            }
            text_len += cost;
            consumed += n;
        }

        if consumed == 0 {
            return Estimate::default();
        }

        sink.put(b"=?");
        sink.put(self.charset.as_bytes());
        sink.put(b"?Q?");
        for &b in &input[..consumed] {
            if b == b' ' {
                sink.put(b"_");
            } else if is_class(b, self.allowed) {
                sink.put(&[b]);
            } else {
                push_hex(sink, b'=', b);
            }
        }
        sink.put(b"?=");

        Estimate {
            produced: overhead + text_len,
            consumed,
        }
    }
}

estimating_encoder!(EncodedWordQEncoder<'_>);

/// RFC 2047 B encoding
#[derive(Clone, Copy, Debug)]
pub struct EncodedWordBEncoder<'a> {
    charset: &'a str,
}

impl<'a> EncodedWordBEncoder<'a> {
    pub fn new(charset: &'a str) -> Self {
        Self { charset }
    }

    fn walk(
        &self,
        input: &[u8],
        sink: &mut impl Sink,
        budget: usize,
        _part_index: usize,
        _is_last_part: bool,
    ) -> Estimate {
        let overhead = self.charset.len() + 7;
        let limit = budget.min(MAX_ENCODED_WORD_LEN);
        let capacity = limit.saturating_sub(overhead) / 4 * 3;

        let mut consumed = 0;
        while consumed < input.len() {
            let n = char_len(&input[consumed..]);
            if consumed + n > capacity {
                break;
            }
            consumed += n;
        }

        if consumed == 0 {
            return Estimate::default();
        }

        let engine = &data_encoding::BASE64;
        sink.put(b"=?");
        sink.put(self.charset.as_bytes());
        sink.put(b"?B?");
        sink.put(engine.encode(&input[..consumed]).as_bytes());
        sink.put(b"?=");

        Estimate {
            produced: overhead + engine.encode_len(consumed),
            consumed,
        }
    }
}

estimating_encoder!(EncodedWordBEncoder<'_>);

/// RFC 2231 extended parameter values. The first part carries the
/// `charset''` prolog; attribute-chars are written as-is and everything
/// else is percent encoded one byte at a time.
#[derive(Clone, Copy, Debug)]
pub struct ExtendedParameterEncoder<'a> {
    charset: &'a str,
}

impl<'a> ExtendedParameterEncoder<'a> {
    pub fn new(charset: &'a str) -> Self {
        Self { charset }
    }

    fn walk(
        &self,
        input: &[u8],
        sink: &mut impl Sink,
        budget: usize,
        part_index: usize,
        _is_last_part: bool,
    ) -> Estimate {
        let prolog = if part_index == 0 {
            self.charset.len() + 2
        } else {
            0
        };
        if prolog > budget {
            return Estimate::default();
        }

        let mut produced = prolog;
        let mut consumed = 0;
        while consumed < input.len() {
            let n = char_len(&input[consumed..]);
            let cost = if n == 1 && is_class(input[consumed], CharClass::ATTRIBUTE) {
                1
            } else {
                3 * n
            };
            if produced + cost > budget {
                break;
            }
            produced += cost;
            consumed += n;
        }

        if consumed == 0 && !input.is_empty() {
            return Estimate::default();
        }

        if part_index == 0 {
            sink.put(self.charset.as_bytes());
            sink.put(b"''");
        }
        for &b in &input[..consumed] {
            if is_class(b, CharClass::ATTRIBUTE) {
                sink.put(&[b]);
            } else {
                push_hex(sink, b'%', b);
            }
        }

        Estimate { produced, consumed }
    }
}

estimating_encoder!(ExtendedParameterEncoder<'_>);

#[cfg(test)]
mod test {
    use super::*;
    use k9::assert_equal;

    fn encode_all(
        encoder: &impl EstimatingEncoder,
        input: &str,
        budget: usize,
    ) -> (String, Estimate) {
        let mut out = vec![];
        let estimate = encoder.encode(input.as_bytes(), &mut out, budget, 0, true);
        assert_equal!(
            estimate,
            encoder.estimate(input.as_bytes(), budget, 0, true)
        );
        assert_equal!(estimate.produced, out.len());
        (String::from_utf8(out).unwrap(), estimate)
    }

    #[test]
    fn quoted_string() {
        let encoder = QuotedStringEncoder::new();
        let (out, estimate) = encode_all(&encoder, r#"say "hi" \o/"#, 100);
        assert_equal!(out, r#""say \"hi\" \\o/""#);
        assert_equal!(estimate.consumed, 12);

        // Stops at non-ASCII without closing
        let mut out = vec![];
        let estimate = encoder.encode("ab§".as_bytes(), &mut out, 100, 0, true);
        assert_equal!(out, b"\"ab".to_vec());
        assert_equal!(estimate, Estimate { produced: 3, consumed: 2 });

        // The closing quote is reserved for the final byte
        let estimate = encoder.estimate(b"abcd", 5, 0, true);
        assert_equal!(estimate, Estimate { produced: 4, consumed: 3 });
        let estimate = encoder.estimate(b"abcd", 6, 0, true);
        assert_equal!(estimate, Estimate { produced: 6, consumed: 4 });

        // Continuations have no opening quote
        let mut out = vec![];
        encoder.encode(b" more", &mut out, 100, 1, true);
        assert_equal!(out, b" more\"".to_vec());

        assert_equal!(
            encoder.estimate(b"", 2, 0, true),
            Estimate { produced: 2, consumed: 0 }
        );
        assert_equal!(encoder.estimate(b"abc", 1, 0, true), Estimate::default());

        // No room for the opening quote
        assert_equal!(encoder.estimate(b"", 0, 0, false), Estimate::default());
        assert_equal!(
            encoder.estimate(b"", 1, 0, false),
            Estimate { produced: 1, consumed: 0 }
        );
    }

    #[test]
    fn q_words() {
        let encoder = EncodedWordQEncoder::new("utf-8", CharClass::Q_PHRASE);
        let (out, estimate) = encode_all(&encoder, "a b_c§", 100);
        assert_equal!(out, "=?utf-8?Q?a_b=5Fc=C2=A7?=");
        assert_equal!(estimate.consumed, 7);

        let encoder = EncodedWordQEncoder::new("utf-8", CharClass::Q_TEXT);
        let (out, _) = encode_all(&encoder, "(x)=?", 100);
        assert_equal!(out, "=?utf-8?Q?(x)=3D=3F?=");
    }

    #[test]
    fn q_words_never_split_characters() {
        let encoder = EncodedWordQEncoder::new("utf-8", CharClass::Q_TEXT);
        // 12 bytes of overhead, then 6 encoded bytes per §
        let input = "§§§".as_bytes();
        let estimate = encoder.estimate(input, 12 + 17, 0, true);
        assert_equal!(estimate, Estimate { produced: 24, consumed: 4 });
        assert_equal!(encoder.estimate(input, 12 + 5, 0, true), Estimate::default());
    }

    #[test]
    fn encoded_words_are_capped() {
        let long = "x".repeat(200);
        let encoder = EncodedWordQEncoder::new("utf-8", CharClass::Q_TEXT);
        let estimate = encoder.estimate(long.as_bytes(), 1000, 0, true);
        assert_equal!(estimate, Estimate { produced: 75, consumed: 63 });

        let encoder = EncodedWordBEncoder::new("utf-8");
        let estimate = encoder.estimate(long.as_bytes(), 1000, 0, true);
        assert_equal!(estimate, Estimate { produced: 72, consumed: 45 });
    }

    #[test]
    fn b_words() {
        let encoder = EncodedWordBEncoder::new("utf-8");
        let (out, estimate) = encode_all(&encoder, "§2000", 100);
        assert_equal!(out, "=?utf-8?B?wqcyMDAw?=");
        assert_equal!(estimate, Estimate { produced: 20, consumed: 6 });

        // Room for 3 bytes; the second § would need bytes 3 and 4
        let estimate = encoder.estimate("a§§".as_bytes(), 16, 0, true);
        assert_equal!(estimate, Estimate { produced: 16, consumed: 3 });
    }

    #[test]
    fn extended_parameter() {
        let encoder = ExtendedParameterEncoder::new("utf-8");
        let input = "naïve file*.txt";
        let expected_len: usize = 7 + input
            .chars()
            .map(|c| {
                if c.is_ascii() && is_class(c as u8, CharClass::ATTRIBUTE) {
                    1
                } else {
                    3 * c.len_utf8()
                }
            })
            .sum::<usize>();

        let (out, estimate) = encode_all(&encoder, input, 1000);
        assert_equal!(out, "utf-8''na%C3%AFve%20file%2A.txt");
        assert_equal!(estimate.produced, expected_len);
        assert_equal!(estimate.consumed, input.len());

        let mut out = vec![];
        let estimate = encoder.encode(input.as_bytes(), &mut out, 1000, 1, true);
        assert_equal!(out.len(), expected_len - 7);
        assert_equal!(estimate.produced, expected_len - 7);

        // Never splits a character or a triplet
        let estimate = encoder.estimate("aïb".as_bytes(), 7 + 1 + 5, 0, true);
        assert_equal!(estimate, Estimate { produced: 8, consumed: 1 });
    }

    #[test]
    fn extended_parameter_mixed_text() {
        let encoder = ExtendedParameterEncoder::new("utf-8");
        let input = "token#numer_one2001 two\tthree \\^ between SLASHES ^\\ \"quoted\"кириллица";
        let body = "token#numer_one2001%20two%09three%20%5C^%20between%20SLASHES%20^%5C%20\
                    %22quoted%22%D0%BA%D0%B8%D1%80%D0%B8%D0%BB%D0%BB%D0%B8%D1%86%D0%B0";
        assert_equal!(body.len(), 136);

        let (out, estimate) = encode_all(&encoder, input, 1000);
        assert_equal!(out, format!("utf-8''{body}"));
        assert_equal!(estimate, Estimate { produced: 143, consumed: input.len() });

        let mut out = vec![];
        let estimate = encoder.encode(input.as_bytes(), &mut out, 1000, 1, false);
        assert_equal!(String::from_utf8(out).unwrap(), body);
        assert_equal!(estimate, Estimate { produced: 136, consumed: input.len() });
    }

    #[test]
    fn budget_is_respected() {
        let text = "Ceci est un résumé; très «important» 123".as_bytes();
        let encoders: Vec<Box<dyn EstimatingEncoder>> = vec![
            Box::new(QuotedStringEncoder::new()),
            Box::new(EncodedWordQEncoder::new("utf-8", CharClass::Q_TEXT)),
            Box::new(EncodedWordBEncoder::new("utf-8")),
            Box::new(ExtendedParameterEncoder::new("utf-8")),
        ];
        for encoder in &encoders {
            for input in [text, &b""[..]] {
                for budget in 0..90 {
                    for part_index in 0..2 {
                        for is_last_part in [true, false] {
                            let mut out = vec![];
                            let encoded =
                                encoder.encode(input, &mut out, budget, part_index, is_last_part);
                            let estimated =
                                encoder.estimate(input, budget, part_index, is_last_part);
                            assert_equal!(encoded, estimated);
                            assert!(encoded.produced <= budget);
                            assert!(encoded.consumed <= input.len());
                            assert_equal!(out.len(), encoded.produced);
                            assert!(std::str::from_utf8(&input[..encoded.consumed]).is_ok());
                        }
                    }
                }
            }
        }
    }
}
