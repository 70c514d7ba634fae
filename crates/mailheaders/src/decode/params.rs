//! RFC 2231 parameter reassembly.
use crate::charclass::{is_char_class, CharClass};
use crate::decode::encoded_word::{decode_encoded_word, looks_like_encoded_word};
use crate::decode::text::TextAssembler;
use crate::nom_utils::{parse_with, IResult, Span};
use crate::{MailHeaderError, ParameterList, Result};
use charset::Charset;
use nom::bytes::complete::{take_while, take_while1};
use nom::character::complete::{char, u32};
use nom::combinator::{opt, rest};
use nom::error::context;
use nom::sequence::preceded;
use nom::Parser;
use std::borrow::Cow;

/// A single `name[*N][*]=value` as it appeared in the field
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawParameter<'a> {
    pub name: &'a str,
    pub section: Option<u32>,
    pub extended: bool,
    pub value: Cow<'a, str>,
    pub quoted: bool,
}

fn parameter_name(input: Span) -> IResult<Span, (&str, Option<u32>, bool)> {
    let (loc, (name, section, star)) = context(
        "parameter name",
        (
            take_while1(|c| is_char_class(c, CharClass::ATTRIBUTE)),
            opt(preceded(char('*'), u32)),
            opt(char('*')),
        ),
    )
    .parse(input)?;
    Ok((loc, (*name.fragment(), section, star.is_some())))
}

/// `charset'language'text`
fn extended_initial_value(input: Span) -> IResult<Span, (&str, &str, &str)> {
    let (loc, (charset, _, language, _, text)) = context(
        "extended parameter value",
        (
            take_while(|c| c != '\''),
            char('\''),
            take_while(|c| c != '\''),
            char('\''),
            rest,
        ),
    )
    .parse(input)?;
    Ok((
        loc,
        (*charset.fragment(), *language.fragment(), *text.fragment()),
    ))
}

impl<'a> RawParameter<'a> {
    pub fn new(name: &'a str, value: Cow<'a, str>, quoted: bool) -> Result<Self> {
        let (name, section, extended) = parse_with(name, parameter_name)?;
        Ok(Self {
            name,
            section,
            extended,
            value,
            quoted,
        })
    }
}

fn percent_decode(text: &str, out: &mut Vec<u8>) -> Result<()> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let decoded = bytes
                .get(i + 1..i + 3)
                .and_then(|hex| data_encoding::HEXUPPER_PERMISSIVE.decode(hex).ok())
                .ok_or_else(|| {
                    MailHeaderError::format(format!(
                        "invalid percent escape at offset {i} in {text:?}"
                    ))
                })?;
            out.extend_from_slice(&decoded);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(())
}

fn decode_sections(sections: &[&RawParameter]) -> Result<String> {
    let mut bytes = vec![];
    let mut charset = None;

    for (idx, section) in sections.iter().enumerate() {
        if !section.extended {
            bytes.extend_from_slice(section.value.as_bytes());
            continue;
        }
        let text = if idx == 0 {
            let (label, _language, text) = parse_with(&section.value, extended_initial_value)?;
            charset = Some(label);
            text
        } else {
            &section.value[..]
        };
        percent_decode(text, &mut bytes)?;
    }

    match charset.filter(|label| !label.is_empty()) {
        Some(label) => {
            let charset = Charset::for_label_no_replacement(label.as_bytes()).ok_or_else(|| {
                MailHeaderError::format(format!("unsupported charset {label}"))
            })?;
            let (decoded, _malformed) = charset.decode_without_bom_handling(&bytes);
            Ok(decoded.into_owned())
        }
        None => Ok(String::from_utf8_lossy(&bytes).into_owned()),
    }
}

fn decode_regular(param: &RawParameter) -> Result<String> {
    if param.quoted {
        let mut text = TextAssembler::default();
        text.push_unstructured(&param.value)?;
        Ok(text.finish())
    } else if looks_like_encoded_word(&param.value) {
        decode_encoded_word(&param.value)
    } else {
        Ok(param.value.to_string())
    }
}

/// Group sections by name and decode each group into a single value.
/// Continuations take precedence over a lone extended value, which in
/// turn takes precedence over a regular value of the same name.
pub(crate) fn assemble(raw: &[RawParameter]) -> Result<ParameterList> {
    let mut result = ParameterList::new();
    let mut seen: Vec<&str> = vec![];

    for param in raw {
        if seen.iter().any(|name| name.eq_ignore_ascii_case(param.name)) {
            continue;
        }
        seen.push(param.name);

        let group: Vec<&RawParameter> = raw
            .iter()
            .filter(|p| p.name.eq_ignore_ascii_case(param.name))
            .collect();

        let mut sections: Vec<&RawParameter> =
            group.iter().copied().filter(|p| p.section.is_some()).collect();

        let value = if !sections.is_empty() {
            sections.sort_by_key(|p| p.section);
            for (expect, section) in sections.iter().enumerate() {
                if section.section != Some(expect as u32) {
                    return Err(MailHeaderError::format(format!(
                        "parameter {} is missing section {expect}",
                        param.name
                    )));
                }
            }
            decode_sections(&sections)?
        } else if let Some(extended) = group.iter().find(|p| p.extended) {
            decode_sections(&[*extended])?
        } else {
            decode_regular(param)?
        };

        tracing::trace!(parameter = param.name, sections = group.len(), "assembled parameter");
        result.set(param.name, &value)?;
    }

    Ok(result)
}
