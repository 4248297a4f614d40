use thiserror::Error;

/// Parse failure with 1-based line and column of the offending token.
#[derive(Debug, Clone, Error)]
#[error("parse error at {line}:{col}: {message}")]
pub struct QueryParseError {
    pub line: u32,
    pub col: u32,
    pub message: String,
}

impl QueryParseError {
    pub fn err<T>(self) -> Result<T, QueryParseError> {
        Err(self)
    }
}
