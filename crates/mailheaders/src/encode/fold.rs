//! Assembling complete header fields: the value parts produced by a
//! [FieldValue] are laid out on lines of at most
//! [EncoderOptions::line_length] columns, followed by any MIME
//! parameters.
use crate::charclass::{is_class, is_token, CharClass};
use crate::config::EncoderOptions;
use crate::decode::looks_like_encoded_word;
use crate::encode::builder::{FieldValue, PartSource};
use crate::encode::estimate::{EstimatingEncoder, ExtendedParameterEncoder, QuotedStringEncoder};
use crate::encode::segment::{Representation, SegmentMode, Segmenter};
use crate::scratch::{Scratch, ScratchPool};
use crate::{MailHeaderError, ParameterList, Result};
use std::io::Write;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};

fn is_wsp(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

/// Tracks the length of the line being written so that it knows
/// when to fold
struct FoldingWriter<'a> {
    out: &'a mut Vec<u8>,
    line_len: usize,
    line_length: usize,
}

impl<'a> FoldingWriter<'a> {
    fn new(out: &'a mut Vec<u8>, name: &str, line_length: usize) -> Self {
        out.extend_from_slice(name.as_bytes());
        out.push(b':');
        Self {
            out,
            line_len: name.len() + 1,
            line_length,
        }
    }

    /// Append a part, separated from the previous one by a space
    /// unless it already starts with whitespace. Folds first if the
    /// part would not fit. Whitespace-only parts are dropped.
    fn push_part(&mut self, part: &[u8]) {
        if part.iter().all(|&b| is_wsp(b)) {
            return;
        }
        let needs_space = !is_wsp(part[0]);
        let width = part.len() + usize::from(needs_space);
        if self.line_len + width > self.line_length {
            tracing::trace!(at = self.line_len, width, "fold");
            self.out.extend_from_slice(b"\r\n");
            self.line_len = 0;
        }
        if needs_space {
            self.out.push(b' ');
        }
        self.out.extend_from_slice(part);
        self.line_len += width;
    }

    /// Append a part at the start of a new line
    fn push_line(&mut self, part: &[u8]) {
        self.out.extend_from_slice(b"\r\n ");
        self.out.extend_from_slice(part);
        self.line_len = part.len() + 1;
    }

    fn finish(self) {
        self.out.extend_from_slice(b"\r\n");
    }
}

/// The rendered form of a parameter value if it can be written
/// without RFC 2231 encoding
fn regular_value(name: &str, value: &str, options: &EncoderOptions) -> Option<Vec<u8>> {
    if !value
        .bytes()
        .all(|b| is_wsp(b) || is_class(b, CharClass::VISIBLE))
    {
        return None;
    }
    if value.split([' ', '\t']).any(looks_like_encoded_word) {
        return None;
    }

    let rendered = if is_token(value) {
        value.as_bytes().to_vec()
    } else {
        let mut quoted = vec![];
        QuotedStringEncoder::new().encode(value.as_bytes(), &mut quoted, usize::MAX, 0, true);
        quoted
    };

    let limit = options.line_length.saturating_sub(name.len() + 2);
    (rendered.len() <= limit).then_some(rendered)
}

/// Alternating runs of text that must be percent encoded and text
/// that can be written literally, covering all of `value`
fn extended_runs(value: &str, options: &EncoderOptions) -> Vec<(bool, Range<usize>)> {
    let mut runs = vec![];
    let mut pos = 0;
    for element in Segmenter::new(options).segment(value, SegmentMode::Parameter) {
        if element.representation != Representation::Percent {
            continue;
        }
        if pos < element.span.start {
            runs.push((false, pos..element.span.start));
        }
        pos = element.span.end;
        runs.push((true, element.span));
    }
    if pos < value.len() {
        runs.push((false, pos..value.len()));
    }
    if runs.is_empty() {
        runs.push((true, 0..0));
    }
    runs
}

/// Write `input` as a literal continuation value into `out`,
/// returning how many bytes of input were used
fn literal_segment(input: &[u8], out: &mut Vec<u8>, budget: usize) -> usize {
    if input.len() <= budget && input.iter().all(|&b| is_class(b, CharClass::TOKEN)) {
        out.extend_from_slice(input);
        return input.len();
    }
    let encoder = QuotedStringEncoder::new();
    // Leave room for the closing quote
    let chunk = encoder
        .estimate(input, budget.saturating_sub(1), 0, false)
        .consumed;
    if chunk == 0 {
        return 0;
    }
    encoder.encode(&input[..chunk], out, budget, 0, true).consumed
}

/// Write `name` as RFC 2231 continuations, one segment per line.
/// Fails if a segment cannot make progress within the hard limit.
fn write_extended(
    writer: &mut FoldingWriter,
    part: &mut Vec<u8>,
    name: &str,
    value: &str,
    options: &EncoderOptions,
    last_parameter: bool,
) -> Result<()> {
    let runs = extended_runs(value, options);
    let encoder = ExtendedParameterEncoder::new(&options.charset);
    let bytes = value.as_bytes();
    let mut index = 0usize;

    for (run_idx, (encoded, range)) in runs.iter().enumerate() {
        let mut pos = range.start;
        loop {
            // The first segment always carries the charset
            let extended = *encoded || index == 0;
            part.clear();
            if extended {
                part.extend_from_slice(format!("{name}*{index}*=").as_bytes());
            } else {
                part.extend_from_slice(format!("{name}*{index}=").as_bytes());
            }
            let head = part.len();
            let input = &bytes[pos..range.end];

            let mut consumed = 0;
            for line_length in [options.line_length, options.hard_line_length] {
                // leading space, head and the trailing ';'
                let budget = line_length.saturating_sub(head + 2);
                consumed = if extended {
                    let estimate = encoder.estimate(input, budget, index, true);
                    if estimate.consumed == 0 && !input.is_empty() {
                        continue;
                    }
                    encoder.encode(input, part, budget, index, true).consumed
                } else {
                    literal_segment(input, part, budget)
                };
                if consumed > 0 || input.is_empty() {
                    break;
                }
            }
            tracing::trace!(parameter = name, index, extended, consumed, "parameter segment");
            if consumed == 0 && !input.is_empty() {
                return Err(MailHeaderError::format(format!(
                    "parameter {name:?} is too long to fit a segment within {} columns",
                    options.hard_line_length
                )));
            }

            pos += consumed;
            index += 1;
            let done = pos >= range.end;
            if !(last_parameter && done && run_idx + 1 == runs.len()) {
                part.push(b';');
            }
            writer.push_line(part);
            if done {
                break;
            }
        }
    }
    Ok(())
}

/// A header field ready to be serialized
#[derive(Debug, Clone)]
pub struct HeaderField {
    name: String,
    value: FieldValue,
    parameters: ParameterList,
}

impl HeaderField {
    pub fn new<V: Into<FieldValue>>(name: &str, value: V) -> Result<Self> {
        if name.is_empty() || !name.bytes().all(|b| (33..=126).contains(&b) && b != b':') {
            return Err(MailHeaderError::format(format!(
                "{name:?} is not a valid field name"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            value: value.into(),
            parameters: ParameterList::new(),
        })
    }

    pub fn with_parameters(mut self, parameters: ParameterList) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &ParameterList {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut ParameterList {
        &mut self.parameters
    }

    /// Serialize the field, including its terminating CRLF, into `sink`
    pub fn write_to<W: Write>(
        &mut self,
        scratch: &mut Scratch,
        options: &EncoderOptions,
        sink: &mut W,
    ) -> Result<()> {
        let Scratch { line, part } = scratch;
        line.clear();
        part.clear();

        let mut writer = FoldingWriter::new(line, &self.name, options.line_length);

        self.value.prepare(options);
        if self.value.next_part(part, options) {
            // Keep one part in hand so that the last one can
            // have the ';' that introduces the parameters
            loop {
                let split = part.len();
                if self.value.next_part(part, options) {
                    writer.push_part(&part[..split]);
                    part.drain(..split);
                    continue;
                }
                part.truncate(split);
                if !self.parameters.is_empty() {
                    part.push(b';');
                }
                writer.push_part(part);
                break;
            }
        }

        let count = self.parameters.len();
        for (idx, param) in self.parameters.iter().enumerate() {
            let last = idx + 1 == count;
            match regular_value(&param.name, &param.value, options) {
                Some(rendered) => {
                    part.clear();
                    part.extend_from_slice(param.name.as_bytes());
                    part.push(b'=');
                    part.extend_from_slice(&rendered);
                    if !last {
                        part.push(b';');
                    }
                    writer.push_part(part);
                }
                None => {
                    write_extended(&mut writer, part, &param.name, &param.value, options, last)?
                }
            }
        }

        writer.finish();
        sink.write_all(line)?;
        Ok(())
    }

    /// The serialized field as a string
    pub fn to_wire_string(&mut self, options: &EncoderOptions) -> Result<String> {
        let mut scratch = Scratch::new();
        let mut out = vec![];
        self.write_to(&mut scratch, options, &mut out)?;
        String::from_utf8(out).map_err(|err| MailHeaderError::format(format!("{err:#}")))
    }
}

/// Serialize `fields` in order into `sink`. `cancel` is checked
/// before each field; once it is set no further fields are written
/// and [MailHeaderError::Cancelled] is returned.
pub fn write_fields<W: Write>(
    fields: &mut [HeaderField],
    pool: &ScratchPool,
    options: &EncoderOptions,
    sink: &mut W,
    cancel: Option<&AtomicBool>,
) -> Result<()> {
    options.validate()?;
    let total = fields.len();
    for (idx, field) in fields.iter_mut().enumerate() {
        if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            tracing::debug!(written = idx, remaining = total - idx, "cancelled");
            return Err(MailHeaderError::Cancelled);
        }
        let mut scratch = pool.acquire();
        field.write_to(&mut scratch, options, sink)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::encode::builder::{ExactValue, PhraseValue, StructuredValue, UnstructuredValue};
    use crate::Decoder;
    use k9::assert_equal;

    fn lines(wire: &str) -> Vec<&str> {
        wire.strip_suffix("\r\n").unwrap().split("\r\n").collect()
    }

    #[test]
    fn short_field() {
        let options = EncoderOptions::default();
        let mut field = HeaderField::new("Subject", UnstructuredValue::new("hello there")).unwrap();
        assert_equal!(
            field.to_wire_string(&options).unwrap(),
            "Subject: hello there\r\n"
        );
    }

    #[test]
    fn folds_at_line_length() {
        let options = EncoderOptions::default();
        let text = vec!["lorem"; 30].join(" ");
        let mut field = HeaderField::new("Subject", UnstructuredValue::new(&text)).unwrap();
        let wire = field.to_wire_string(&options).unwrap();
        for line in lines(&wire) {
            assert!(line.len() <= 78, "{line:?}");
            assert!(!line.trim().is_empty());
        }
        let unfolded = wire.trim_end().replace("\r\n", "");
        assert_equal!(unfolded, format!("Subject: {text}"));
    }

    #[test]
    fn invalid_names() {
        for name in ["", "Sub ject", "Sub:ject", "Süject"] {
            assert!(HeaderField::new(name, ExactValue::new("x")).is_err(), "{name}");
        }
    }

    #[test]
    fn regular_parameters() {
        let options = EncoderOptions::default();
        let mut params = ParameterList::new();
        params.set("charset", "us-ascii").unwrap();
        params.set("name", "my file.txt").unwrap();
        let value = StructuredValue::new("text/plain").unwrap();
        let mut field = HeaderField::new("Content-Type", value)
            .unwrap()
            .with_parameters(params.clone());
        let wire = field.to_wire_string(&options).unwrap();
        assert_equal!(
            wire,
            "Content-Type: text/plain; charset=us-ascii; name=\"my file.txt\"\r\n"
        );

        let raw = wire.split_once(':').unwrap().1.trim();
        let (value, decoded) = Decoder::decode_atom_and_parameter_list(raw).unwrap();
        assert_equal!(value, "text/plain");
        assert_equal!(decoded, params);
    }

    #[test]
    fn extended_prolog() {
        let options = EncoderOptions::default();
        let mut params = ParameterList::new();
        params.set("name", "naïve").unwrap();
        let value = StructuredValue::new("text/plain").unwrap();
        let mut field = HeaderField::new("Content-Type", value)
            .unwrap()
            .with_parameters(params);
        assert_equal!(
            lines(&field.to_wire_string(&options).unwrap()),
            vec!["Content-Type: text/plain;", " name*0*=utf-8''na%C3%AFve"]
        );
    }

    #[test]
    fn long_ascii_parameter() {
        let options = EncoderOptions::default();
        let value = vec!["segment"; 20].join("-");
        let mut params = ParameterList::new();
        params.set("filename", &value).unwrap();
        let value = StructuredValue::new("attachment").unwrap();
        let mut field = HeaderField::new("Content-Disposition", value)
            .unwrap()
            .with_parameters(params.clone());
        let wire = field.to_wire_string(&options).unwrap();
        let lines = lines(&wire);
        assert!(lines.len() > 2);
        assert!(lines[1].starts_with(" filename*0*=utf-8''"));
        for line in &lines {
            assert!(line.len() <= 78, "{line:?}");
        }

        let unfolded = wire.trim_end().replace("\r\n", "");
        let raw = unfolded.split_once(':').unwrap().1.trim();
        let (_, decoded) = Decoder::decode_atom_and_parameter_list(raw).unwrap();
        assert_equal!(decoded, params);
    }

    #[test]
    fn escaped_phrases_respect_the_hard_limit() {
        let options = EncoderOptions::default();
        for text in ["\"".repeat(400), "\"".repeat(600), "\\".repeat(700)] {
            let mut field = HeaderField::new("X-Phrase", PhraseValue::new(&text)).unwrap();
            let wire = field.to_wire_string(&options).unwrap();
            for line in lines(&wire) {
                assert!(line.len() <= 998, "{} bytes", line.len());
            }
            let unfolded = wire.trim_end().replace("\r\n", "");
            let value = unfolded.split_once(':').unwrap().1;
            assert_equal!(Decoder::decode_phrase(value).unwrap(), text);
        }
    }

    #[test]
    fn long_parameter_names() {
        let options = EncoderOptions::default();
        let name = "x".repeat(900);
        let mut params = ParameterList::new();
        params.set(&name, "é").unwrap();
        let value = StructuredValue::new("text/plain").unwrap();
        let mut field = HeaderField::new("Content-Type", value)
            .unwrap()
            .with_parameters(params);
        let wire = field.to_wire_string(&options).unwrap();
        for line in lines(&wire) {
            assert!(line.len() <= 998, "{} bytes", line.len());
        }
        assert!(wire.ends_with("*0*=utf-8''%C3%A9\r\n"));

        // No room left for the value
        let mut params = ParameterList::new();
        params.set(&"x".repeat(990), "é").unwrap();
        let value = StructuredValue::new("text/plain").unwrap();
        let mut field = HeaderField::new("Content-Type", value)
            .unwrap()
            .with_parameters(params);
        let mut out: Vec<u8> = vec![];
        let err = field
            .write_to(&mut Scratch::new(), &options, &mut out)
            .unwrap_err();
        assert!(matches!(err, MailHeaderError::Format(_)));
        assert!(out.is_empty());
    }

    #[test]
    fn no_value_parts() {
        let options = EncoderOptions::default();
        let mut field = HeaderField::new("X-Empty", PhraseValue::new("   ")).unwrap();
        assert_equal!(field.to_wire_string(&options).unwrap(), "X-Empty:\r\n");
    }

    #[test]
    fn cancellation() {
        let options = EncoderOptions::default();
        let pool = ScratchPool::default();
        let mut fields = vec![
            HeaderField::new("Subject", UnstructuredValue::new("one")).unwrap(),
            HeaderField::new("Subject", UnstructuredValue::new("two")).unwrap(),
        ];

        let mut out = vec![];
        write_fields(&mut fields, &pool, &options, &mut out, None).unwrap();
        assert_equal!(out, b"Subject: one\r\nSubject: two\r\n".to_vec());
        assert_equal!(pool.spare_count(), 1);

        let cancel = AtomicBool::new(true);
        let mut out = vec![];
        let err = write_fields(&mut fields, &pool, &options, &mut out, Some(&cancel)).unwrap_err();
        assert!(matches!(err, MailHeaderError::Cancelled));
        assert!(out.is_empty());
    }

    #[test]
    fn options_are_validated() {
        let options = EncoderOptions {
            charset: "latin1".to_string(),
            ..Default::default()
        };
        let mut fields = vec![HeaderField::new("Subject", UnstructuredValue::new("x")).unwrap()];
        let mut out: Vec<u8> = vec![];
        let err = write_fields(&mut fields, &ScratchPool::default(), &options, &mut out, None)
            .unwrap_err();
        assert!(matches!(err, MailHeaderError::Config(_)));
    }
}
