use thiserror::Error;

/// Box parsing errors.
///
/// `Truncated` is the recoverable "incomplete input" case: callers treat the
/// box (or the whole buffer) as not-yet-parseable and move on. `Malformed`
/// means the bytes can never form a valid box (zero-size header, declared
/// size smaller than the header itself).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("truncated box data: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("malformed box: {0}")]
    Malformed(String),
}

pub type ParseResult<T> = Result<T, ParseError>;
