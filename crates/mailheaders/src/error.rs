use thiserror::Error;

#[derive(Error, Debug)]
pub enum MailHeaderError {
    #[error("invalid header value: {0}")]
    Format(String),
    #[error("invalid date: {0}")]
    Date(#[from] chrono::ParseError),
    #[error("invalid encoder options: {0}")]
    Config(String),
    #[error("failed to write header: {0}")]
    Io(#[from] std::io::Error),
    #[error("header serialization was cancelled")]
    Cancelled,
}

impl MailHeaderError {
    pub(crate) fn format<S: Into<String>>(reason: S) -> Self {
        Self::Format(reason.into())
    }
}
