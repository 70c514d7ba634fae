//! Classifying the words of a value and merging adjacent words into
//! runs that share a wire representation.
use crate::charclass::{is_class, CharClass};
use crate::config::{EncoderOptions, WordEncoding, MAX_ENCODED_WORD_LEN};
use crate::decode::looks_like_encoded_word;
use crate::encode::estimate::{
    EncodedWordBEncoder, EncodedWordQEncoder, Estimate, EstimatingEncoder, QuotedStringEncoder,
};
use std::ops::Range;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Representation {
    Raw,
    Quoted,
    EncodedWordQ,
    EncodedWordB,
    /// RFC 2231 percent encoding, left to the parameter writer
    Percent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentMode {
    Phrase,
    Unstructured,
    Parameter,
}

impl SegmentMode {
    fn bare_class(self) -> CharClass {
        match self {
            Self::Phrase => CharClass::ATOM,
            Self::Unstructured => CharClass::VISIBLE,
            Self::Parameter => CharClass::TOKEN,
        }
    }

    /// Bytes that a Q encoded word may carry unescaped in this context
    pub fn q_class(self) -> CharClass {
        match self {
            Self::Phrase => CharClass::Q_PHRASE,
            Self::Unstructured | Self::Parameter => CharClass::Q_TEXT,
        }
    }
}

/// A piece of the value that is rendered as a unit. Ranges are byte
/// offsets into the segmented text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element {
    /// Whitespace that precedes the element
    pub lead: Range<usize>,
    pub span: Range<usize>,
    pub representation: Representation,
    /// This element opens its run
    pub word_start: bool,
    /// This element closes its run
    pub word_end: bool,
}

impl Element {
    pub fn lead_text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.lead.clone()]
    }

    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.span.clone()]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WordClass {
    Bare,
    Quotable,
    Encode,
}

#[derive(Debug)]
struct Word {
    range: Range<usize>,
    class: WordClass,
}

fn is_wsp(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

fn split_words(text: &str) -> Vec<Range<usize>> {
    let bytes = text.as_bytes();
    let mut words = vec![];
    let mut i = 0;
    while i < bytes.len() {
        if is_wsp(bytes[i]) {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && !is_wsp(bytes[i]) {
            i += 1;
        }
        words.push(start..i);
    }
    words
}

/// Successive chunks of at most one encoded-word each
fn chunk_encoded(encoder: &dyn EstimatingEncoder, input: &[u8]) -> Vec<Estimate> {
    let mut chunks = vec![];
    let mut pos = 0;
    while pos < input.len() {
        let estimate = encoder.estimate(&input[pos..], MAX_ENCODED_WORD_LEN, chunks.len(), false);
        // Not reachable with validated options
        if estimate.consumed == 0 {
            break;
        }
        pos += estimate.consumed;
        chunks.push(estimate);
    }
    chunks
}

fn total_produced(chunks: &[Estimate]) -> usize {
    chunks.iter().map(|c| c.produced).sum()
}

pub struct Segmenter<'o> {
    options: &'o EncoderOptions,
}

impl<'o> Segmenter<'o> {
    pub fn new(options: &'o EncoderOptions) -> Self {
        Self { options }
    }

    fn classify(&self, word: &str, mode: SegmentMode) -> WordClass {
        let bytes = word.as_bytes();
        // Room for the folding space and a trailing ';'
        let max_width = self.options.hard_line_length.saturating_sub(2);
        if bytes.len() > max_width {
            return WordClass::Encode;
        }
        if mode != SegmentMode::Parameter && looks_like_encoded_word(word) {
            return WordClass::Encode;
        }
        if bytes.iter().all(|&b| is_class(b, mode.bare_class())) {
            WordClass::Bare
        } else if mode != SegmentMode::Unstructured
            && bytes.iter().all(|&b| is_class(b, CharClass::QUOTABLE))
        {
            // Escaping can double the width of a word
            let quoted = QuotedStringEncoder::new().estimate(bytes, usize::MAX, 0, true);
            if quoted.produced > max_width {
                WordClass::Encode
            } else {
                WordClass::Quotable
            }
        } else {
            WordClass::Encode
        }
    }

    /// Can `middle` be absorbed between two runs of `class`
    fn absorbs(&self, class: WordClass, middle: &Word) -> bool {
        match class {
            WordClass::Bare => false,
            WordClass::Quotable => middle.class == WordClass::Bare,
            WordClass::Encode => {
                middle.class == WordClass::Bare
                    && middle.range.len() <= self.options.merge_bare_limit
            }
        }
    }

    /// Split `text` into elements. Leading and trailing whitespace
    /// is not represented.
    pub fn segment(&self, text: &str, mode: SegmentMode) -> Vec<Element> {
        let words: Vec<Word> = split_words(text)
            .into_iter()
            .map(|range| Word {
                class: self.classify(&text[range.clone()], mode),
                range,
            })
            .collect();

        let mut elements = vec![];
        let mut i = 0;
        while i < words.len() {
            let class = words[i].class;
            let mut j = i + 1;
            if class != WordClass::Bare {
                loop {
                    match words.get(j) {
                        Some(next) if next.class == class => j += 1,
                        Some(middle)
                            if self.absorbs(class, middle)
                                && words.get(j + 1).map(|w| w.class) == Some(class) =>
                        {
                            j += 2
                        }
                        _ => break,
                    }
                }
            }

            let start = words[i].range.start;
            let lead = if i == 0 {
                start..start
            } else {
                words[i - 1].range.end..start
            };
            let span = start..words[j - 1].range.end;
            tracing::trace!(?class, words = j - i, ?span, ?mode, "segmented run");

            match (class, mode) {
                (WordClass::Bare, _) => elements.push(Element {
                    lead,
                    span,
                    representation: Representation::Raw,
                    word_start: true,
                    word_end: true,
                }),
                (WordClass::Quotable, SegmentMode::Parameter) => elements.push(Element {
                    lead,
                    span,
                    representation: Representation::Quoted,
                    word_start: true,
                    word_end: true,
                }),
                (WordClass::Encode, SegmentMode::Parameter) => elements.push(Element {
                    lead,
                    span,
                    representation: Representation::Percent,
                    word_start: true,
                    word_end: true,
                }),
                (WordClass::Quotable, _) => self.split_quoted(text, lead, span, &mut elements),
                (WordClass::Encode, _) => self.split_encoded(text, lead, span, mode, &mut elements),
            }
            i = j;
        }

        elements
    }

    fn split_encoded(
        &self,
        text: &str,
        lead: Range<usize>,
        span: Range<usize>,
        mode: SegmentMode,
        elements: &mut Vec<Element>,
    ) {
        let charset = self.options.charset.as_str();
        let q = EncodedWordQEncoder::new(charset, mode.q_class());
        let b = EncodedWordBEncoder::new(charset);
        let input = &text.as_bytes()[span.clone()];

        let (representation, chunks) = match self.options.word_encoding {
            WordEncoding::Q => (Representation::EncodedWordQ, chunk_encoded(&q, input)),
            WordEncoding::B => (Representation::EncodedWordB, chunk_encoded(&b, input)),
            WordEncoding::Auto => {
                let q_chunks = chunk_encoded(&q, input);
                let b_chunks = chunk_encoded(&b, input);
                if total_produced(&b_chunks) < total_produced(&q_chunks) {
                    (Representation::EncodedWordB, b_chunks)
                } else {
                    (Representation::EncodedWordQ, q_chunks)
                }
            }
        };
        tracing::trace!(?representation, chunks = chunks.len(), "encoded run");

        let last = chunks.len().saturating_sub(1);
        let mut pos = span.start;
        for (idx, chunk) in chunks.iter().enumerate() {
            elements.push(Element {
                lead: if idx == 0 { lead.clone() } else { pos..pos },
                span: pos..pos + chunk.consumed,
                representation,
                word_start: idx == 0,
                word_end: idx == last,
            });
            pos += chunk.consumed;
        }
    }

    /// Break a quoted run at the start of interior whitespace so
    /// that each piece fits on a line by itself where possible
    fn split_quoted(
        &self,
        text: &str,
        lead: Range<usize>,
        span: Range<usize>,
        elements: &mut Vec<Element>,
    ) {
        let bytes = text.as_bytes();
        let encoder = QuotedStringEncoder::new();
        let width = |range: Range<usize>, first: bool| {
            let is_last = range.end == span.end;
            encoder
                .estimate(&bytes[range], usize::MAX, usize::from(!first), is_last)
                .produced
        };

        let mut breaks: Vec<usize> = (span.start + 1..span.end)
            .filter(|&p| is_wsp(bytes[p]) && !is_wsp(bytes[p - 1]))
            .collect();
        breaks.push(span.end);

        let limit = self.options.line_length.saturating_sub(1);
        let mut lead = lead;
        let mut start = span.start;
        let mut k = 0;
        while start < span.end {
            let first = start == span.start;
            let budget = limit.saturating_sub(lead.len());

            let mut end = breaks[k];
            k += 1;
            while let Some(&next) = breaks.get(k) {
                if width(start..next, first) > budget {
                    break;
                }
                end = next;
                k += 1;
            }

            if end != span.end {
                tracing::trace!(at = end, "split quoted run");
            }
            elements.push(Element {
                lead,
                span: start..end,
                representation: Representation::Quoted,
                word_start: first,
                word_end: end == span.end,
            });
            lead = end..end;
            start = end;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use k9::assert_equal;

    fn segment<'a>(
        text: &'a str,
        mode: SegmentMode,
        options: &EncoderOptions,
    ) -> Vec<(Representation, &'a str, &'a str)> {
        Segmenter::new(options)
            .segment(text, mode)
            .into_iter()
            .map(|e| (e.representation, e.lead_text(text), e.text(text)))
            .collect()
    }

    #[test]
    fn bare_words_stay_apart() {
        let options = EncoderOptions::default();
        assert_equal!(
            segment("  hello \t world  ", SegmentMode::Phrase, &options),
            vec![
                (Representation::Raw, "", "hello"),
                (Representation::Raw, " \t ", "world"),
            ]
        );
    }

    #[test]
    fn unstructured_non_ascii_run() {
        let options = EncoderOptions::default();
        assert_equal!(
            segment("1:  §2 \t ДВА   ©1999...2001", SegmentMode::Unstructured, &options),
            vec![
                (Representation::Raw, "", "1:"),
                (Representation::EncodedWordB, "  ", "§2 \t ДВА   ©1999...2001"),
            ]
        );
    }

    #[test]
    fn quotable_runs_merge_through_bare() {
        let options = EncoderOptions::default();
        assert_equal!(
            segment("@ABYZ value 0123456789;", SegmentMode::Phrase, &options),
            vec![(Representation::Quoted, "", "@ABYZ value 0123456789;")]
        );
        // Only a single bare word is absorbed
        assert_equal!(
            segment("@A b c @D", SegmentMode::Phrase, &options),
            vec![
                (Representation::Quoted, "", "@A"),
                (Representation::Raw, " ", "b"),
                (Representation::Raw, " ", "c"),
                (Representation::Quoted, " ", "@D"),
            ]
        );
    }

    #[test]
    fn encoded_middle_breaks_quoting() {
        let options = EncoderOptions::default();
        assert_equal!(
            segment("@ABYZ §2000 0123456789;", SegmentMode::Phrase, &options),
            vec![
                (Representation::Quoted, "", "@ABYZ"),
                (Representation::EncodedWordB, " ", "§2000"),
                (Representation::Quoted, " ", "0123456789;"),
            ]
        );
    }

    #[test]
    fn encoded_runs_merge_through_short_bare() {
        let options = EncoderOptions {
            word_encoding: WordEncoding::Q,
            ..Default::default()
        };
        assert_equal!(
            segment("héllo and wörld", SegmentMode::Unstructured, &options),
            vec![(Representation::EncodedWordQ, "", "héllo and wörld")]
        );
        assert_equal!(
            segment("héllo abcdefghijklmnop wörld", SegmentMode::Unstructured, &options),
            vec![
                (Representation::EncodedWordQ, "", "héllo"),
                (Representation::Raw, " ", "abcdefghijklmnop"),
                (Representation::EncodedWordQ, " ", "wörld"),
            ]
        );
    }

    #[test]
    fn quotable_middle_breaks_encoding() {
        let options = EncoderOptions {
            word_encoding: WordEncoding::Q,
            ..Default::default()
        };
        assert_equal!(
            segment("é (x) é", SegmentMode::Phrase, &options),
            vec![
                (Representation::EncodedWordQ, "", "é"),
                (Representation::Quoted, " ", "(x)"),
                (Representation::EncodedWordQ, " ", "é"),
            ]
        );
    }

    #[test]
    fn lookalikes_are_encoded() {
        let options = EncoderOptions::default();
        assert_equal!(
            segment("see =?utf-8?Q?x?= here", SegmentMode::Unstructured, &options),
            vec![
                (Representation::Raw, "", "see"),
                (Representation::EncodedWordB, " ", "=?utf-8?Q?x?="),
                (Representation::Raw, " ", "here"),
            ]
        );
    }

    #[test]
    fn forced_encoding() {
        let options = EncoderOptions {
            word_encoding: WordEncoding::Q,
            ..Default::default()
        };
        assert_equal!(
            segment("§2000", SegmentMode::Phrase, &options),
            vec![(Representation::EncodedWordQ, "", "§2000")]
        );
        let options = EncoderOptions {
            word_encoding: WordEncoding::B,
            ..Default::default()
        };
        assert_equal!(
            segment("é", SegmentMode::Phrase, &options),
            vec![(Representation::EncodedWordB, "", "é")]
        );
    }

    #[test]
    fn long_encoded_runs_split_at_characters() {
        let options = EncoderOptions::default();
        let text = "é".repeat(40);
        let elements = Segmenter::new(&options).segment(&text, SegmentMode::Unstructured);
        assert_equal!(elements.len(), 2);
        assert!(elements[0].word_start && !elements[0].word_end);
        assert!(!elements[1].word_start && elements[1].word_end);
        assert_equal!(elements[0].text(&text).len(), 44);
        assert_equal!(
            format!("{}{}", elements[0].text(&text), elements[1].text(&text)),
            text
        );
        for e in &elements {
            assert_equal!(e.representation, Representation::EncodedWordB);
        }
    }

    #[test]
    fn long_quoted_runs_split_at_whitespace() {
        let options = EncoderOptions::default();
        let text = vec!["a.b"; 30].join(" ");
        let elements = Segmenter::new(&options).segment(&text, SegmentMode::Phrase);
        assert_equal!(elements.len(), 2);
        assert!(elements[0].word_start && !elements[0].word_end);
        assert!(elements[1].text(&text).starts_with(' '));
        assert!(elements[1].word_end);

        let encoder = QuotedStringEncoder::new();
        let first = encoder.estimate(elements[0].text(&text).as_bytes(), usize::MAX, 0, false);
        assert!(first.produced <= 77);
        // One more word would not have fit
        assert!(first.produced + 4 > 77);
    }

    #[test]
    fn escaped_words_past_the_hard_limit_are_encoded() {
        let options = EncoderOptions::default();
        let fits = "\"".repeat(400);
        assert_equal!(
            segment(&fits, SegmentMode::Phrase, &options),
            vec![(Representation::Quoted, "", fits.as_str())]
        );

        for text in ["\"".repeat(600), "\\".repeat(700)] {
            let elements = Segmenter::new(&options).segment(&text, SegmentMode::Phrase);
            assert!(elements.len() > 1);
            for e in &elements {
                assert_equal!(e.representation, Representation::EncodedWordB);
            }
            let elements = Segmenter::new(&options).segment(&text, SegmentMode::Parameter);
            assert_equal!(elements.len(), 1);
            assert_equal!(elements[0].representation, Representation::Percent);
        }
    }

    #[test]
    fn parameter_runs() {
        let options = EncoderOptions::default();
        assert_equal!(
            segment(
                "функции of the module ведомости report.pdf",
                SegmentMode::Parameter,
                &options
            ),
            vec![
                (Representation::Percent, "", "функции"),
                (Representation::Raw, " ", "of"),
                (Representation::Raw, " ", "the"),
                (Representation::Raw, " ", "module"),
                (Representation::Percent, " ", "ведомости"),
                (Representation::Raw, " ", "report.pdf"),
            ]
        );
    }
}
