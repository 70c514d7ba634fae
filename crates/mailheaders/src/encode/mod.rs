//! Encoding typed values into folded header fields.
mod builder;
mod estimate;
mod fold;
mod segment;

pub use builder::{
    AddrSpecListValue, AtomAndUnstructuredValue, DispositionNotificationParametersValue,
    DispositionValue, ExactValue, FieldValue, LanguageListValue, MailboxListValue, MailboxValue,
    PartSource, PhraseAndIdValue, PhraseValue, StructuredValue, TokensAndDateValue,
    UnstructuredValue,
};
pub use estimate::{
    EncodedWordBEncoder, EncodedWordQEncoder, Estimate, EstimatingEncoder,
    ExtendedParameterEncoder, QuotedStringEncoder,
};
pub use fold::{write_fields, HeaderField};
pub use segment::{Element, Representation, SegmentMode, Segmenter};
