use thiserror::Error;

use crate::parser::QueryParseError;

#[derive(Debug, Clone, Error)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] QueryParseError),
    #[error("unsupported query fragment: {reason} ({fragment})")]
    NotSupported { reason: String, fragment: String },
    #[error("unknown table {0}")]
    UnknownTable(String),
    #[error("ambiguous table {0}")]
    AmbiguousTable(String),
    #[error("unknown column {0}")]
    UnknownAttribute(String),
    #[error("ambiguous column {0}")]
    AmbiguousAttribute(String),
    #[error("unknown function {0}")]
    UnknownFunction(String),
    #[error("subqueries are not supported here, rewrite as a join: {0}")]
    UnsupportedSubquery(String),
    #[error("the join condition on {0} cannot be applied natively, move it to WHERE")]
    RewriteAsWhere(String),
}

impl CompileError {
    pub fn not_supported(reason: impl Into<String>, fragment: impl std::fmt::Display) -> Self {
        CompileError::NotSupported { reason: reason.into(), fragment: fragment.to_string() }
    }
}

/// Control signal for the fallback protocol: the construct has no
/// native form and must go through the expression path. Caught by the
/// nearest assembler step; never escapes `compile`.
#[derive(Debug, Clone)]
pub(crate) struct PostProcessing {
    pub reason: &'static str,
}

#[derive(Debug, Clone)]
pub(crate) enum LowerFailure {
    PostProcessing(PostProcessing),
    Fatal(CompileError),
}

impl LowerFailure {
    pub fn post_processing(reason: &'static str) -> Self {
        LowerFailure::PostProcessing(PostProcessing { reason })
    }
}

impl From<CompileError> for LowerFailure {
    fn from(e: CompileError) -> Self {
        LowerFailure::Fatal(e)
    }
}

pub(crate) type LowerResult<T> = Result<T, LowerFailure>;
