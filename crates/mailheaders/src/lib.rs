//! Decoding and encoding of e-mail header field values.
//!
//! [Decoder] turns unfolded field values into typed values, handling
//! RFC 2047 encoded-words and RFC 2231 parameter continuations.
//! [HeaderField] goes the other way, choosing the shortest legal
//! representation for each run of text and folding the result into
//! lines that respect [EncoderOptions::line_length].
pub mod charclass;
mod config;
mod conformance;
pub mod decode;
mod encode;
mod error;
mod header;
mod nom_utils;
mod scratch;
pub mod tokenizer;
mod types;

pub use error::MailHeaderError;
pub type Result<T> = std::result::Result<T, MailHeaderError>;

pub use config::{EncoderOptions, WordEncoding, MAX_ENCODED_WORD_LEN};
pub use conformance::FieldConformance;
pub use decode::Decoder;
pub use encode::*;
pub use header::{HeaderLoader, RawField};
pub use scratch::{Scratch, ScratchGuard, ScratchPool};
pub use types::*;
