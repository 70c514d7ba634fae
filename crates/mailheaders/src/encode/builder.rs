//! Builders that turn typed values into the sequence of parts that
//! make up a field value. Each part is an unbreakable unit; the
//! folding writer decides where the line breaks go between them.
use crate::charclass::{is_atom, is_class, is_message_id, CharClass};
use crate::config::{EncoderOptions, MAX_ENCODED_WORD_LEN};
use crate::encode::estimate::{
    EncodedWordBEncoder, EncodedWordQEncoder, EstimatingEncoder, ExtendedParameterEncoder,
    QuotedStringEncoder,
};
use crate::encode::segment::{Element, Representation, SegmentMode, Segmenter};
use crate::{
    AddrSpec, DispositionAction, DispositionNotificationParameter, MailHeaderError, Mailbox, Result,
};
use chrono::{DateTime, FixedOffset};

/// A source of field value parts
pub trait PartSource {
    /// Work out the parts for `options`. Must be called before
    /// the first call to `next_part`, and may be called again to
    /// start over.
    fn prepare(&mut self, options: &EncoderOptions);

    /// Append the next part to `out`. Returns false once there
    /// are no more parts.
    fn next_part(&mut self, out: &mut Vec<u8>, options: &EncoderOptions) -> bool;
}

/// Write `element` from `source`, including its leading whitespace
pub(crate) fn render_element(
    source: &str,
    element: &Element,
    mode: SegmentMode,
    options: &EncoderOptions,
    out: &mut Vec<u8>,
) {
    out.extend_from_slice(element.lead_text(source).as_bytes());
    let input = element.text(source).as_bytes();
    let part_index = usize::from(!element.word_start);
    let charset = options.charset.as_str();

    match element.representation {
        Representation::Raw => out.extend_from_slice(input),
        Representation::Quoted => {
            QuotedStringEncoder::new().encode(input, out, usize::MAX, part_index, element.word_end);
        }
        Representation::EncodedWordQ => {
            EncodedWordQEncoder::new(charset, mode.q_class()).encode(
                input,
                out,
                MAX_ENCODED_WORD_LEN,
                part_index,
                element.word_end,
            );
        }
        Representation::EncodedWordB => {
            EncodedWordBEncoder::new(charset).encode(
                input,
                out,
                MAX_ENCODED_WORD_LEN,
                part_index,
                element.word_end,
            );
        }
        Representation::Percent => {
            ExtendedParameterEncoder::new(charset).encode(
                input,
                out,
                usize::MAX,
                part_index,
                element.word_end,
            );
        }
    }
}

#[derive(Debug, Clone)]
enum Body {
    /// Segmented text from the builder's source number `source`
    Element {
        source: usize,
        element: Element,
        mode: SegmentMode,
    },
    Literal(String),
}

#[derive(Debug, Clone)]
struct Step {
    body: Body,
    suffix: Option<u8>,
}

/// The prepared parts of a builder and how far through them we are
#[derive(Debug, Clone, Default)]
struct PartPlan {
    steps: Vec<Step>,
    next: usize,
}

impl PartPlan {
    fn clear(&mut self) {
        self.steps.clear();
        self.next = 0;
    }

    fn push_text(
        &mut self,
        source: usize,
        text: &str,
        mode: SegmentMode,
        options: &EncoderOptions,
    ) {
        let elements = Segmenter::new(options).segment(text, mode);
        self.steps.extend(elements.into_iter().map(|element| Step {
            body: Body::Element {
                source,
                element,
                mode,
            },
            suffix: None,
        }));
    }

    fn push_literal<S: Into<String>>(&mut self, text: S) {
        self.steps.push(Step {
            body: Body::Literal(text.into()),
            suffix: None,
        });
    }

    /// Attach a separator to the most recent part
    fn set_suffix(&mut self, suffix: u8) {
        if let Some(step) = self.steps.last_mut() {
            step.suffix = Some(suffix);
        }
    }

    fn next_part(&mut self, sources: &[&str], out: &mut Vec<u8>, options: &EncoderOptions) -> bool {
        let Some(step) = self.steps.get(self.next) else {
            return false;
        };
        self.next += 1;

        match &step.body {
            Body::Literal(text) => out.extend_from_slice(text.as_bytes()),
            Body::Element {
                source,
                element,
                mode,
            } => render_element(sources[*source], element, *mode, options, out),
        }
        if let Some(suffix) = step.suffix {
            out.push(suffix);
        }
        true
    }
}

/// Written exactly as given
#[derive(Debug, Clone)]
pub struct ExactValue {
    text: String,
    plan: PartPlan,
}

impl ExactValue {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            plan: PartPlan::default(),
        }
    }
}

impl PartSource for ExactValue {
    fn prepare(&mut self, _options: &EncoderOptions) {
        self.plan.clear();
        if !self.text.is_empty() {
            self.plan.push_literal(self.text.as_str());
        }
    }

    fn next_part(&mut self, out: &mut Vec<u8>, options: &EncoderOptions) -> bool {
        self.plan.next_part(&[], out, options)
    }
}

/// Free text, such as a Subject
#[derive(Debug, Clone)]
pub struct UnstructuredValue {
    text: String,
    plan: PartPlan,
}

impl UnstructuredValue {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            plan: PartPlan::default(),
        }
    }
}

impl PartSource for UnstructuredValue {
    fn prepare(&mut self, options: &EncoderOptions) {
        self.plan.clear();
        self.plan.push_text(0, &self.text, SegmentMode::Unstructured, options);
    }

    fn next_part(&mut self, out: &mut Vec<u8>, options: &EncoderOptions) -> bool {
        self.plan.next_part(&[self.text.as_str()], out, options)
    }
}

/// `atom; text`, such as a diagnostic code
#[derive(Debug, Clone)]
pub struct AtomAndUnstructuredValue {
    atom: String,
    text: String,
    plan: PartPlan,
}

impl AtomAndUnstructuredValue {
    pub fn new(atom: &str, text: &str) -> Result<Self> {
        if !is_atom(atom) {
            return Err(MailHeaderError::format(format!("{atom:?} is not an atom")));
        }
        Ok(Self {
            atom: atom.to_string(),
            text: text.to_string(),
            plan: PartPlan::default(),
        })
    }
}

impl PartSource for AtomAndUnstructuredValue {
    fn prepare(&mut self, options: &EncoderOptions) {
        self.plan.clear();
        self.plan.push_literal(self.atom.as_str());
        self.plan.set_suffix(b';');
        self.plan.push_text(0, &self.text, SegmentMode::Unstructured, options);
    }

    fn next_part(&mut self, out: &mut Vec<u8>, options: &EncoderOptions) -> bool {
        self.plan.next_part(&[self.text.as_str()], out, options)
    }
}

#[derive(Debug, Clone)]
pub struct PhraseValue {
    phrase: String,
    plan: PartPlan,
}

impl PhraseValue {
    pub fn new(phrase: &str) -> Self {
        Self {
            phrase: phrase.to_string(),
            plan: PartPlan::default(),
        }
    }
}

impl PartSource for PhraseValue {
    fn prepare(&mut self, options: &EncoderOptions) {
        self.plan.clear();
        self.plan.push_text(0, &self.phrase, SegmentMode::Phrase, options);
    }

    fn next_part(&mut self, out: &mut Vec<u8>, options: &EncoderOptions) -> bool {
        self.plan.next_part(&[self.phrase.as_str()], out, options)
    }
}

/// An optional phrase followed by `<id>`, as used by List-Id
#[derive(Debug, Clone)]
pub struct PhraseAndIdValue {
    phrase: String,
    id: String,
    plan: PartPlan,
}

impl PhraseAndIdValue {
    pub fn new(phrase: Option<&str>, id: &str) -> Result<Self> {
        if !is_message_id(id) {
            return Err(MailHeaderError::format(format!(
                "{id:?} is not a valid identifier"
            )));
        }
        Ok(Self {
            phrase: phrase.unwrap_or_default().to_string(),
            id: id.to_string(),
            plan: PartPlan::default(),
        })
    }
}

impl PartSource for PhraseAndIdValue {
    fn prepare(&mut self, options: &EncoderOptions) {
        self.plan.clear();
        self.plan.push_text(0, &self.phrase, SegmentMode::Phrase, options);
        self.plan.push_literal(format!("<{}>", self.id));
    }

    fn next_part(&mut self, out: &mut Vec<u8>, options: &EncoderOptions) -> bool {
        self.plan.next_part(&[self.phrase.as_str()], out, options)
    }
}

fn mailbox_name(mailbox: &Mailbox) -> &str {
    mailbox.name.as_deref().unwrap_or_default()
}

fn push_mailbox(plan: &mut PartPlan, source: usize, mailbox: &Mailbox, options: &EncoderOptions) {
    let name = mailbox_name(mailbox);
    if name.trim().is_empty() {
        plan.push_literal(mailbox.address.to_wire());
    } else {
        plan.push_text(source, name, SegmentMode::Phrase, options);
        plan.push_literal(format!("<{}>", mailbox.address.to_wire()));
    }
}

#[derive(Debug, Clone)]
pub struct MailboxValue {
    mailbox: Mailbox,
    plan: PartPlan,
}

impl MailboxValue {
    pub fn new(mailbox: Mailbox) -> Self {
        Self {
            mailbox,
            plan: PartPlan::default(),
        }
    }
}

impl PartSource for MailboxValue {
    fn prepare(&mut self, options: &EncoderOptions) {
        self.plan.clear();
        push_mailbox(&mut self.plan, 0, &self.mailbox, options);
    }

    fn next_part(&mut self, out: &mut Vec<u8>, options: &EncoderOptions) -> bool {
        self.plan.next_part(&[mailbox_name(&self.mailbox)], out, options)
    }
}

#[derive(Debug, Clone)]
pub struct MailboxListValue {
    mailboxes: Vec<Mailbox>,
    plan: PartPlan,
}

impl MailboxListValue {
    pub fn new(mailboxes: Vec<Mailbox>) -> Self {
        Self {
            mailboxes,
            plan: PartPlan::default(),
        }
    }
}

impl PartSource for MailboxListValue {
    fn prepare(&mut self, options: &EncoderOptions) {
        self.plan.clear();
        for (idx, mailbox) in self.mailboxes.iter().enumerate() {
            if idx > 0 {
                self.plan.set_suffix(b',');
            }
            push_mailbox(&mut self.plan, idx, mailbox, options);
        }
    }

    fn next_part(&mut self, out: &mut Vec<u8>, options: &EncoderOptions) -> bool {
        let names: Vec<&str> = self.mailboxes.iter().map(mailbox_name).collect();
        self.plan.next_part(&names, out, options)
    }
}

/// `<addr>` items separated by commas
#[derive(Debug, Clone)]
pub struct AddrSpecListValue {
    addresses: Vec<AddrSpec>,
    plan: PartPlan,
}

impl AddrSpecListValue {
    pub fn new(addresses: Vec<AddrSpec>) -> Self {
        Self {
            addresses,
            plan: PartPlan::default(),
        }
    }
}

impl PartSource for AddrSpecListValue {
    fn prepare(&mut self, _options: &EncoderOptions) {
        self.plan.clear();
        for (idx, address) in self.addresses.iter().enumerate() {
            if idx > 0 {
                self.plan.set_suffix(b',');
            }
            self.plan.push_literal(format!("<{}>", address.to_wire()));
        }
    }

    fn next_part(&mut self, out: &mut Vec<u8>, options: &EncoderOptions) -> bool {
        self.plan.next_part(&[], out, options)
    }
}

/// Comma separated language tags, as used by Content-Language
#[derive(Debug, Clone)]
pub struct LanguageListValue {
    languages: Vec<String>,
    plan: PartPlan,
}

impl LanguageListValue {
    pub fn new<S: AsRef<str>>(languages: &[S]) -> Result<Self> {
        let mut result = vec![];
        for language in languages {
            let language = language.as_ref();
            if !is_atom(language) {
                return Err(MailHeaderError::format(format!(
                    "language {language:?} is not an atom"
                )));
            }
            result.push(language.to_string());
        }
        Ok(Self {
            languages: result,
            plan: PartPlan::default(),
        })
    }
}

impl PartSource for LanguageListValue {
    fn prepare(&mut self, _options: &EncoderOptions) {
        self.plan.clear();
        for (idx, language) in self.languages.iter().enumerate() {
            if idx > 0 {
                self.plan.set_suffix(b',');
            }
            self.plan.push_literal(language.as_str());
        }
    }

    fn next_part(&mut self, out: &mut Vec<u8>, options: &EncoderOptions) -> bool {
        self.plan.next_part(&[], out, options)
    }
}

/// `tokens; date`, as used by Received
#[derive(Debug, Clone)]
pub struct TokensAndDateValue {
    tokens: String,
    date: DateTime<FixedOffset>,
    plan: PartPlan,
}

impl TokensAndDateValue {
    pub fn new(tokens: &str, date: DateTime<FixedOffset>) -> Self {
        Self {
            tokens: tokens.to_string(),
            date,
            plan: PartPlan::default(),
        }
    }
}

impl PartSource for TokensAndDateValue {
    fn prepare(&mut self, options: &EncoderOptions) {
        self.plan.clear();
        self.plan.push_text(0, &self.tokens, SegmentMode::Unstructured, options);
        if self.plan.steps.is_empty() {
            self.plan.push_literal(";");
        } else {
            self.plan.set_suffix(b';');
        }
        let date = self.date.to_rfc2822();
        for word in date.split_ascii_whitespace() {
            self.plan.push_literal(word);
        }
    }

    fn next_part(&mut self, out: &mut Vec<u8>, options: &EncoderOptions) -> bool {
        self.plan.next_part(&[self.tokens.as_str()], out, options)
    }
}

/// An RFC 8098 Disposition value
#[derive(Debug, Clone)]
pub struct DispositionValue {
    action: DispositionAction,
    plan: PartPlan,
}

impl DispositionValue {
    pub fn new(action: DispositionAction) -> Self {
        Self {
            action,
            plan: PartPlan::default(),
        }
    }
}

impl PartSource for DispositionValue {
    fn prepare(&mut self, _options: &EncoderOptions) {
        let action = &self.action;
        self.plan.clear();
        self.plan.push_literal(format!("{}/{}", action.action_mode, action.sending_mode));
        self.plan.set_suffix(b';');

        let mut disposition = action.disposition_type.clone();
        if !action.modifiers.is_empty() {
            disposition.push('/');
            disposition.push_str(&action.modifiers.join(","));
        }
        self.plan.push_literal(disposition);
    }

    fn next_part(&mut self, out: &mut Vec<u8>, options: &EncoderOptions) -> bool {
        self.plan.next_part(&[], out, options)
    }
}

/// An RFC 8098 Disposition-Notification-Options value
#[derive(Debug, Clone)]
pub struct DispositionNotificationParametersValue {
    parameters: Vec<DispositionNotificationParameter>,
    plan: PartPlan,
}

impl DispositionNotificationParametersValue {
    pub fn new(parameters: Vec<DispositionNotificationParameter>) -> Self {
        Self {
            parameters,
            plan: PartPlan::default(),
        }
    }
}

impl PartSource for DispositionNotificationParametersValue {
    fn prepare(&mut self, _options: &EncoderOptions) {
        self.plan.clear();
        for (idx, param) in self.parameters.iter().enumerate() {
            if idx > 0 {
                self.plan.set_suffix(b';');
            }
            self.plan.push_literal(format!(
                "{}={},{}",
                param.name,
                param.importance,
                param.values.join(",")
            ));
        }
    }

    fn next_part(&mut self, out: &mut Vec<u8>, options: &EncoderOptions) -> bool {
        self.plan.next_part(&[], out, options)
    }
}

/// A token value such as `text/plain` or `attachment`, usually
/// followed by parameters
#[derive(Debug, Clone)]
pub struct StructuredValue {
    value: String,
    plan: PartPlan,
}

impl StructuredValue {
    pub fn new(value: &str) -> Result<Self> {
        let valid = value.split('/').all(|piece| {
            !piece.is_empty() && piece.bytes().all(|b| is_class(b, CharClass::TOKEN))
        });
        if !valid {
            return Err(MailHeaderError::format(format!(
                "{value:?} is not a valid structured value"
            )));
        }
        Ok(Self {
            value: value.to_string(),
            plan: PartPlan::default(),
        })
    }
}

impl PartSource for StructuredValue {
    fn prepare(&mut self, _options: &EncoderOptions) {
        self.plan.clear();
        self.plan.push_literal(self.value.as_str());
    }

    fn next_part(&mut self, out: &mut Vec<u8>, options: &EncoderOptions) -> bool {
        self.plan.next_part(&[], out, options)
    }
}

/// Every shape of field value that can be encoded
#[derive(Debug, Clone)]
pub enum FieldValue {
    Exact(ExactValue),
    Unstructured(UnstructuredValue),
    AtomAndUnstructured(AtomAndUnstructuredValue),
    Phrase(PhraseValue),
    PhraseAndId(PhraseAndIdValue),
    Mailbox(MailboxValue),
    MailboxList(MailboxListValue),
    AddrSpecList(AddrSpecListValue),
    LanguageList(LanguageListValue),
    TokensAndDate(TokensAndDateValue),
    Disposition(DispositionValue),
    DispositionNotificationParameters(DispositionNotificationParametersValue),
    Structured(StructuredValue),
}

macro_rules! field_value {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*

        impl PartSource for FieldValue {
            fn prepare(&mut self, options: &EncoderOptions) {
                match self {
                    $(Self::$variant(v) => v.prepare(options),)*
                }
            }

            fn next_part(&mut self, out: &mut Vec<u8>, options: &EncoderOptions) -> bool {
                match self {
                    $(Self::$variant(v) => v.next_part(out, options),)*
                }
            }
        }
    };
}

field_value!(
    Exact(ExactValue),
    Unstructured(UnstructuredValue),
    AtomAndUnstructured(AtomAndUnstructuredValue),
    Phrase(PhraseValue),
    PhraseAndId(PhraseAndIdValue),
    Mailbox(MailboxValue),
    MailboxList(MailboxListValue),
    AddrSpecList(AddrSpecListValue),
    LanguageList(LanguageListValue),
    TokensAndDate(TokensAndDateValue),
    Disposition(DispositionValue),
    DispositionNotificationParameters(DispositionNotificationParametersValue),
    Structured(StructuredValue),
);
