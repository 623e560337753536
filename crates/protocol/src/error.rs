use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("empty message: missing tag byte")]
    Empty,

    #[error("truncated message: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
}

pub type EnvelopeResult<T> = std::result::Result<T, EnvelopeError>;
