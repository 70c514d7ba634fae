use crate::{MailHeaderError, Result};
use nom::combinator::all_consuming;
use nom::error::{ContextError, ErrorKind};
use nom::Parser;
use nom_locate::LocatedSpan;
use std::fmt::Write;

pub(crate) type Span<'a> = LocatedSpan<&'a str>;
pub(crate) type IResult<'a, A, B> = nom::IResult<A, B, ParseError<'a>>;

#[derive(Debug)]
pub(crate) enum FrameKind {
    Context(&'static str),
    Expected(char),
    Nom(ErrorKind),
    Reason(String),
}

/// Where in the value a parser gave up, and why
#[derive(Debug)]
pub(crate) struct Frame<'a> {
    at: Span<'a>,
    kind: FrameKind,
}

/// Errors from parsers over a [Span], innermost frame first
#[derive(Debug)]
pub(crate) struct ParseError<'a> {
    frames: Vec<Frame<'a>>,
}

impl<'a> ParseError<'a> {
    fn new(at: Span<'a>, kind: FrameKind) -> Self {
        Self {
            frames: vec![Frame { at, kind }],
        }
    }

    fn push(mut self, at: Span<'a>, kind: FrameKind) -> Self {
        self.frames.push(Frame { at, kind });
        self
    }
}

impl<'a> nom::error::ParseError<Span<'a>> for ParseError<'a> {
    fn from_error_kind(input: Span<'a>, kind: ErrorKind) -> Self {
        Self::new(input, FrameKind::Nom(kind))
    }

    fn append(input: Span<'a>, kind: ErrorKind, other: Self) -> Self {
        other.push(input, FrameKind::Nom(kind))
    }

    fn from_char(input: Span<'a>, c: char) -> Self {
        Self::new(input, FrameKind::Expected(c))
    }
}

impl<'a> ContextError<Span<'a>> for ParseError<'a> {
    fn add_context(input: Span<'a>, ctx: &'static str, other: Self) -> Self {
        other.push(input, FrameKind::Context(ctx))
    }
}

/// Fail the current parser with a free form explanation
pub(crate) fn make_context_error<S: Into<String>>(
    input: Span<'_>,
    reason: S,
) -> nom::Err<ParseError<'_>> {
    nom::Err::Error(ParseError::new(input, FrameKind::Reason(reason.into())))
}

/// Header values are unfolded before they reach a parser, so each
/// frame is shown against the one line with a caret under the column.
pub(crate) fn explain_nom(input: Span<'_>, err: nom::Err<ParseError<'_>>) -> String {
    let error = match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => e,
        nom::Err::Incomplete(needed) => return format!("incomplete input: {needed:?}"),
    };

    // Control characters would throw off the caret
    let line: String = input
        .fragment()
        .chars()
        .map(|c| match c {
            '\t' => '\u{2409}',
            '\r' => '\u{240d}',
            '\n' => '\u{240a}',
            _ => c,
        })
        .collect();

    let mut result = String::new();
    for (i, frame) in error.frames.iter().enumerate() {
        let column = frame.at.get_utf8_column();
        let what = match &frame.kind {
            FrameKind::Context(context) => format!("in {context}"),
            FrameKind::Expected(expected) => match frame.at.fragment().chars().next() {
                Some(actual) => format!("expected '{expected}', found '{actual}'"),
                None => format!("expected '{expected}', got end of input"),
            },
            FrameKind::Nom(kind) => format!("in {kind:?}"),
            FrameKind::Reason(reason) => reason.clone(),
        };
        writeln!(
            &mut result,
            "{i}: at column {column}, {what}:\n{line}\n{caret:>column$}",
            caret = "^"
        )
        .ok();
    }
    result
}

/// Run `parser` over the whole of `text`
pub(crate) fn parse_with<'a, R, F>(text: &'a str, parser: F) -> Result<R>
where
    F: Parser<Span<'a>, Output = R, Error = ParseError<'a>>,
{
    let input = Span::new(text);
    let (_, result) = all_consuming(parser)
        .parse(input)
        .map_err(|err| MailHeaderError::Format(explain_nom(input, err)))?;
    Ok(result)
}
