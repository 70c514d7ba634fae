//! Decoding of header field values into typed values.
//!
//! Each entry point on [Decoder] takes an unfolded field value, such as
//! [RawField::value](crate::RawField), and either returns the typed value
//! or a [MailHeaderError::Format] describing what was wrong with it.
use crate::charclass::{is_atom, is_message_id};
use crate::nom_utils::{make_context_error, parse_with, IResult, Span};
use crate::tokenizer::{Grammar, Token, TokenKind, Tokenizer, ATOM, TOKEN};
use crate::{
    AddrSpec, DispositionAction, DispositionNotificationParameter, Importance, MailHeaderError,
    Mailbox, NotificationField, ParameterList, QualityValue, Result, Version,
};
use chrono::{DateTime, FixedOffset};
use nom::branch::alt;
use nom::bytes::complete::take_while_m_n;
use nom::character::complete::{char, u32};
use nom::combinator::{opt, recognize};
use nom::error::context;
use nom::Parser;
use text::{inter_token_space, TextAssembler};

pub mod encoded_word;
mod params;
mod text;

pub use encoded_word::{decode_encoded_word, looks_like_encoded_word, EncodedWord, Encoding};

fn unexpected(source: &str, token: Option<Token>, expecting: &str) -> MailHeaderError {
    match token {
        Some(token) => MailHeaderError::format(format!(
            "expected {expecting} but found {:?} at offset {} in {source:?}",
            token.text(source),
            token.position
        )),
        None => MailHeaderError::format(format!(
            "expected {expecting} but reached the end of {source:?}"
        )),
    }
}

/// Semantic tokens with one token of lookahead
struct Walker<'a> {
    tokenizer: Tokenizer<'a>,
    peeked: Option<Token>,
}

impl<'a> Walker<'a> {
    fn new(source: &'a str, grammar: &'a Grammar) -> Self {
        Self {
            tokenizer: Tokenizer::new(source, grammar),
            peeked: None,
        }
    }

    fn source(&self) -> &'a str {
        self.tokenizer.source()
    }

    fn advance(&mut self) -> Result<Option<Token>> {
        match self.peeked.take() {
            Some(token) => Ok(Some(token)),
            None => self.tokenizer.next_semantic_token(),
        }
    }

    fn peek(&mut self) -> Result<Option<Token>> {
        if self.peeked.is_none() {
            self.peeked = self.tokenizer.next_semantic_token()?;
        }
        Ok(self.peeked)
    }

    /// The unconsumed remainder of the source
    fn remainder(&self) -> &'a str {
        let position = match self.peeked {
            Some(token) => token.position,
            None => self.tokenizer.position(),
        };
        &self.source()[position..]
    }

    fn expect_value(&mut self, expecting: &str) -> Result<&'a str> {
        let source = self.source();
        match self.advance()? {
            Some(token) if token.kind == TokenKind::Value => Ok(token.text(source)),
            other => Err(unexpected(source, other, expecting)),
        }
    }

    /// A value or the content of a quoted-string
    fn expect_word(&mut self, expecting: &str) -> Result<String> {
        let source = self.source();
        match self.advance()? {
            Some(token) if matches!(token.kind, TokenKind::Value | TokenKind::QuotedValue) => {
                Ok(token.content(source).into_owned())
            }
            other => Err(unexpected(source, other, expecting)),
        }
    }

    fn expect_separator(&mut self, c: char) -> Result<()> {
        let source = self.source();
        match self.advance()? {
            Some(token) if token.is_separator(source, c) => Ok(()),
            other => Err(unexpected(source, other, &format!("'{c}'"))),
        }
    }

    fn expect_end(&mut self) -> Result<()> {
        let source = self.source();
        match self.advance()? {
            None => Ok(()),
            other => Err(unexpected(source, other, "the end of the value")),
        }
    }
}

/// Builds up a phrase from words, quoted-strings and periods,
/// keeping the whitespace that appeared between them
struct PhraseBuilder<'a> {
    source: &'a str,
    text: TextAssembler,
    last_end: Option<usize>,
}

impl<'a> PhraseBuilder<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            text: TextAssembler::default(),
            last_end: None,
        }
    }

    fn push(&mut self, token: Token) -> Result<()> {
        if let Some(end) = self.last_end {
            self.text.push_space(&inter_token_space(&self.source[end..token.position]));
        }
        match token.kind {
            TokenKind::Value => self.text.push_word(token.text(self.source))?,
            TokenKind::QuotedValue => self.text.push_unstructured(&token.content(self.source))?,
            TokenKind::Separator if token.is_separator(self.source, '.') => {
                self.text.push_literal(".")
            }
            _ => return Err(unexpected(self.source, Some(token), "a word")),
        }
        self.last_end = Some(token.end());
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.last_end.is_none()
    }

    fn finish(self) -> String {
        self.text.finish()
    }
}

fn local_part_from_tokens(source: &str, tokens: &[Token]) -> Result<String> {
    let mut result = String::new();
    let mut expect_word = true;
    for token in tokens {
        match token.kind {
            TokenKind::Value | TokenKind::QuotedValue if expect_word => {
                result.push_str(&token.content(source));
                expect_word = false;
            }
            TokenKind::Separator if !expect_word && token.is_separator(source, '.') => {
                result.push('.');
                expect_word = true;
            }
            _ => return Err(unexpected(source, Some(*token), "a local part")),
        }
    }
    if expect_word {
        return Err(unexpected(source, None, "a local part"));
    }
    Ok(result)
}

fn domain_from_tokens(source: &str, tokens: &[Token]) -> Result<String> {
    if let [token] = tokens {
        if token.kind == TokenKind::SquareBracketed {
            return Ok(token.text(source).to_string());
        }
    }

    let mut result = String::new();
    let mut expect_label = true;
    for token in tokens {
        match token.kind {
            TokenKind::Value if expect_label => {
                result.push_str(token.text(source));
                expect_label = false;
            }
            TokenKind::Separator if !expect_label && token.is_separator(source, '.') => {
                result.push('.');
                expect_label = true;
            }
            _ => return Err(unexpected(source, Some(*token), "a domain")),
        }
    }
    if expect_label {
        return Err(unexpected(source, None, "a domain"));
    }
    Ok(result)
}

fn addr_spec_from_tokens(source: &str, tokens: &[Token]) -> Result<AddrSpec> {
    let at = tokens
        .iter()
        .position(|t| t.is_separator(source, '@'))
        .ok_or_else(|| {
            MailHeaderError::format(format!("address is missing an '@' in {source:?}"))
        })?;
    let local_part = local_part_from_tokens(source, &tokens[..at])?;
    let domain = domain_from_tokens(source, &tokens[at + 1..])?;
    AddrSpec::new(&local_part, &domain)
}

/// Parse the content of `<...>`, skipping any obsolete source route
fn angle_addr_spec(source: &str, token: Token) -> Result<AddrSpec> {
    let inner = &source[token.position + 1..token.end() - 1];
    let mut walker = Walker::new(inner, &ATOM);
    let mut tokens = vec![];
    while let Some(t) = walker.advance()? {
        tokens.push(t);
    }

    let start = if tokens.first().is_some_and(|t| t.is_separator(inner, '@')) {
        tokens
            .iter()
            .position(|t| t.is_separator(inner, ':'))
            .map(|p| p + 1)
            .ok_or_else(|| {
                MailHeaderError::format(format!("unterminated source route in {inner:?}"))
            })?
    } else {
        0
    };

    addr_spec_from_tokens(inner, &tokens[start..])
}

fn phrase_from_tokens(source: &str, tokens: &[Token]) -> Result<String> {
    let mut phrase = PhraseBuilder::new(source);
    for token in tokens {
        phrase.push(*token)?;
    }
    Ok(phrase.finish())
}

fn quality_value(input: Span) -> IResult<Span, f32> {
    let (loc, text) = context(
        "quality value between 0 and 1",
        alt((
            recognize((
                char('0'),
                opt((char('.'), take_while_m_n(0, 3, |c: char| c.is_ascii_digit()))),
            )),
            recognize((
                char('1'),
                opt((char('.'), take_while_m_n(0, 3, |c: char| c == '0'))),
            )),
        )),
    )
    .parse(input)?;

    let quality = text
        .fragment()
        .parse::<f32>()
        .map_err(|err| make_context_error(text, format!("{err:#}")))?;
    Ok((loc, quality))
}

/// Decoders for the value shapes found in message header fields
pub struct Decoder;

impl Decoder {
    /// Exactly one atom, optionally surrounded by comments
    pub fn decode_atom(text: &str) -> Result<String> {
        let mut walker = Walker::new(text, &ATOM);
        let atom = match walker.advance()? {
            Some(token) if token.kind == TokenKind::Value && is_atom(token.text(text)) => {
                token.text(text)
            }
            other => return Err(unexpected(text, other, "an atom")),
        };
        walker.expect_end()?;
        Ok(atom.to_string())
    }

    pub fn decode_unstructured(text: &str) -> Result<String> {
        let mut assembler = TextAssembler::default();
        assembler.push_unstructured(text)?;
        Ok(assembler.finish())
    }

    pub fn decode_phrase(text: &str) -> Result<String> {
        let mut walker = Walker::new(text, &ATOM);
        let mut phrase = PhraseBuilder::new(text);
        while let Some(token) = walker.advance()? {
            phrase.push(token)?;
        }
        Ok(phrase.finish())
    }

    pub fn decode_atom_list(text: &str) -> Result<Vec<String>> {
        let mut walker = Walker::new(text, &ATOM);
        let mut result = vec![];
        let mut need_comma = false;
        while let Some(token) = walker.advance()? {
            if token.is_separator(text, ',') {
                need_comma = false;
            } else if !need_comma && token.kind == TokenKind::Value && is_atom(token.text(text)) {
                result.push(token.text(text).to_string());
                need_comma = true;
            } else {
                let expecting = if need_comma { "','" } else { "an atom" };
                return Err(unexpected(text, Some(token), expecting));
            }
        }
        Ok(result)
    }

    /// Mailboxes and groups, with the groups flattened into their members
    pub fn decode_mailbox_list(text: &str) -> Result<Vec<Mailbox>> {
        let mut walker = Walker::new(text, &ATOM);
        let mut result = vec![];
        let mut pending: Vec<Token> = vec![];
        let mut angle: Option<AddrSpec> = None;

        fn finish(
            source: &str,
            pending: &mut Vec<Token>,
            angle: &mut Option<AddrSpec>,
            result: &mut Vec<Mailbox>,
        ) -> Result<()> {
            match angle.take() {
                Some(address) => {
                    let name = if pending.is_empty() {
                        None
                    } else {
                        Some(phrase_from_tokens(source, pending)?)
                    };
                    result.push(Mailbox { name, address });
                }
                None if pending.is_empty() => {}
                None => result.push(Mailbox {
                    name: None,
                    address: addr_spec_from_tokens(source, pending)?,
                }),
            }
            pending.clear();
            Ok(())
        }

        while let Some(token) = walker.advance()? {
            let ends_mailbox = token.is_separator(text, ',') || token.is_separator(text, ';');
            match token.kind {
                TokenKind::AngleBracketed => {
                    if angle.is_some() {
                        return Err(unexpected(text, Some(token), "',' between addresses"));
                    }
                    angle = Some(angle_addr_spec(text, token)?);
                }
                _ if angle.is_some() && !ends_mailbox => {
                    return Err(unexpected(text, Some(token), "',' after an address"));
                }
                TokenKind::Separator if ends_mailbox => {
                    finish(text, &mut pending, &mut angle, &mut result)?;
                }
                TokenKind::Separator if token.is_separator(text, ':') => {
                    // The display name of a group is not retained
                    if pending.is_empty() {
                        return Err(unexpected(text, Some(token), "a group name"));
                    }
                    pending.clear();
                }
                TokenKind::Separator
                    if token.is_separator(text, '.') || token.is_separator(text, '@') =>
                {
                    pending.push(token);
                }
                TokenKind::Value | TokenKind::QuotedValue | TokenKind::SquareBracketed => {
                    pending.push(token);
                }
                _ => return Err(unexpected(text, Some(token), "a mailbox")),
            }
        }
        finish(text, &mut pending, &mut angle, &mut result)?;

        Ok(result)
    }

    pub fn decode_addr_spec_list(text: &str) -> Result<Vec<AddrSpec>> {
        let mut walker = Walker::new(text, &ATOM);
        let mut result = vec![];
        let mut pending: Vec<Token> = vec![];
        let mut angle: Option<AddrSpec> = None;

        loop {
            let token = walker.advance()?;
            match token {
                None => {}
                Some(t) if t.is_separator(text, ',') => {}
                Some(t) if t.kind == TokenKind::AngleBracketed => {
                    if angle.is_some() || !pending.is_empty() {
                        return Err(unexpected(text, token, "',' between addresses"));
                    }
                    angle = Some(angle_addr_spec(text, t)?);
                    continue;
                }
                Some(t) if angle.is_none() => {
                    pending.push(t);
                    continue;
                }
                Some(_) => return Err(unexpected(text, token, "',' after an address")),
            }

            if let Some(address) = angle.take() {
                result.push(address);
            } else if !pending.is_empty() {
                result.push(addr_spec_from_tokens(text, &pending)?);
            }
            pending.clear();

            if token.is_none() {
                break;
            }
        }

        Ok(result)
    }

    /// A list such as `en-US, en;q=0.8, *;q=0.1`
    pub fn decode_quality_value_parameter_list(text: &str) -> Result<Vec<QualityValue>> {
        let mut walker = Walker::new(text, &TOKEN);
        let mut result = vec![];

        while let Some(token) = walker.advance()? {
            if token.is_separator(text, ',') {
                continue;
            }
            if token.kind != TokenKind::Value {
                return Err(unexpected(text, Some(token), "a value"));
            }
            let mut item = QualityValue {
                value: token.text(text).to_string(),
                quality: 1.0,
            };

            loop {
                match walker.peek()? {
                    Some(t) if t.is_separator(text, ';') => {
                        walker.advance()?;
                        let name = walker.expect_value("a parameter name")?;
                        walker.expect_separator('=')?;
                        let value = walker.expect_value("a parameter value")?;
                        if name.eq_ignore_ascii_case("q") {
                            item.quality = parse_with(value, quality_value)?;
                        }
                    }
                    Some(t) if t.is_separator(text, ',') => break,
                    None => break,
                    other => return Err(unexpected(text, other, "';' or ','")),
                }
            }
            result.push(item);
        }

        Ok(result)
    }

    /// `major.minor`, as used by MIME-Version
    pub fn decode_version(text: &str) -> Result<Version> {
        let mut walker = Walker::new(text, &ATOM);
        let major = walker.expect_value("a major version number")?;
        walker.expect_separator('.')?;
        let minor = walker.expect_value("a minor version number")?;
        walker.expect_end()?;

        Ok(Version {
            major: parse_with(major, context("major version", u32))?,
            minor: parse_with(minor, context("minor version", u32))?,
        })
    }

    /// `action-mode/sending-mode; type[/modifier,...]`
    pub fn decode_disposition_action(text: &str) -> Result<DispositionAction> {
        let mut walker = Walker::new(text, &TOKEN);
        let action_mode = walker.expect_value("an action mode")?;
        walker.expect_separator('/')?;
        let sending_mode = walker.expect_value("a sending mode")?;
        walker.expect_separator(';')?;
        let disposition_type = walker.expect_value("a disposition type")?;

        let mut modifiers = vec![];
        match walker.advance()? {
            None => {}
            Some(t) if t.is_separator(text, '/') => loop {
                modifiers.push(walker.expect_value("a disposition modifier")?.to_string());
                match walker.advance()? {
                    None => break,
                    Some(t) if t.is_separator(text, ',') => continue,
                    other => return Err(unexpected(text, other, "',' or the end of the value")),
                }
            },
            other => return Err(unexpected(text, other, "'/' or the end of the value")),
        }

        Ok(DispositionAction {
            action_mode: action_mode.to_string(),
            sending_mode: sending_mode.to_string(),
            disposition_type: disposition_type.to_string(),
            modifiers,
        })
    }

    /// `name=importance,value[,value...]` items separated by `;`
    pub fn decode_disposition_notification_parameter_list(
        text: &str,
    ) -> Result<Vec<DispositionNotificationParameter>> {
        let mut walker = Walker::new(text, &TOKEN);
        let mut result = vec![];

        loop {
            let name = match walker.advance()? {
                None => break,
                Some(t) if t.is_separator(text, ';') => continue,
                Some(t) if t.kind == TokenKind::Value => t.text(text),
                other => return Err(unexpected(text, other, "a parameter name")),
            };
            walker.expect_separator('=')?;
            let importance: Importance = walker.expect_value("an importance")?.parse()?;

            let mut values = vec![];
            loop {
                walker.expect_separator(',')?;
                values.push(walker.expect_word("a parameter value")?);
                match walker.peek()? {
                    Some(t) if t.is_separator(text, ',') => continue,
                    Some(t) if t.is_separator(text, ';') => break,
                    None => break,
                    other => return Err(unexpected(text, other, "',' or ';'")),
                }
            }

            result.push(DispositionNotificationParameter {
                name: name.to_string(),
                importance,
                values,
            });
        }

        Ok(result)
    }

    /// A value such as `text/plain` or `attachment` followed by
    /// parameters, with RFC 2231 continuations reassembled
    pub fn decode_atom_and_parameter_list(text: &str) -> Result<(String, ParameterList)> {
        let mut walker = Walker::new(text, &TOKEN);
        let mut value = walker.expect_value("a value")?.to_string();
        while matches!(walker.peek()?, Some(t) if t.is_separator(text, '/')) {
            walker.advance()?;
            value.push('/');
            value.push_str(walker.expect_value("a subtype")?);
        }

        let mut raw = vec![];
        loop {
            match walker.advance()? {
                None => break,
                Some(t) if t.is_separator(text, ';') => continue,
                Some(t) if t.kind == TokenKind::Value => {
                    let name = t.text(text);
                    walker.expect_separator('=')?;
                    let (param_value, quoted) = match walker.advance()? {
                        Some(v) if v.kind == TokenKind::Value => (v.content(text), false),
                        Some(v) if v.kind == TokenKind::QuotedValue => (v.content(text), true),
                        other => return Err(unexpected(text, other, "a parameter value")),
                    };
                    raw.push(params::RawParameter::new(name, param_value, quoted)?);
                }
                other => return Err(unexpected(text, other, "a parameter")),
            }
        }

        Ok((value, params::assemble(&raw)?))
    }

    /// `type; text`, as used for RFC 3464 diagnostic codes
    pub fn decode_notification_field_value(text: &str) -> Result<NotificationField> {
        let mut walker = Walker::new(text, &ATOM);
        let kind = walker.expect_value("a notification type")?;
        if !is_atom(kind) {
            return Err(MailHeaderError::format(format!(
                "notification type {kind:?} is not an atom"
            )));
        }
        walker.expect_separator(';')?;
        let value = Self::decode_unstructured(walker.remainder().trim())?;
        Ok(NotificationField {
            kind: kind.to_string(),
            value,
        })
    }

    /// `text; date`, where the date follows the last `;`
    pub fn decode_unstructured_and_date(text: &str) -> Result<(String, DateTime<FixedOffset>)> {
        let split = memchr::memrchr(b';', text.as_bytes()).ok_or_else(|| {
            MailHeaderError::format(format!("expected ';' before the date in {text:?}"))
        })?;
        let date = DateTime::parse_from_rfc2822(text[split + 1..].trim())?;
        let value = Self::decode_unstructured(text[..split].trim())?;
        Ok((value, date))
    }

    /// An optional phrase followed by `<id>`, as used by List-Id
    pub fn decode_phrase_and_id(text: &str) -> Result<(Option<String>, String)> {
        let mut walker = Walker::new(text, &ATOM);
        let mut phrase = PhraseBuilder::new(text);
        let id = loop {
            match walker.advance()? {
                Some(t) if t.kind == TokenKind::AngleBracketed => {
                    break t.content(text).trim().to_string();
                }
                Some(t) => phrase.push(t)?,
                None => return Err(unexpected(text, None, "an id in angle brackets")),
            }
        };
        walker.expect_end()?;

        if !is_message_id(&id) {
            return Err(MailHeaderError::format(format!(
                "{id:?} is not a valid identifier"
            )));
        }

        let phrase = if phrase.is_empty() {
            None
        } else {
            Some(phrase.finish())
        };
        Ok((phrase, id))
    }
}
