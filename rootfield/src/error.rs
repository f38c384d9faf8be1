//! Error types for rootfield

use thiserror::Error;

/// Result type alias using rootfield's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Request-level failures. Each one aborts the whole request; its `Display`
/// text is what the caller sees in the response's `error` field.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Unknown or malformed sampling domain
    #[error("Domain sampling error: {0}")]
    DomainConfig(String),

    /// Symbolic text that does not fit the expression grammar
    #[error("Could not parse expression '{expr}': {reason}")]
    ExpressionSyntax {
        /// The offending source text
        expr: String,
        /// What the parser tripped over
        reason: String,
    },

    /// Sparse term exponent outside `0..=degree`
    #[error("Exponent {exponent} is out of range for a degree {degree} polynomial")]
    ExponentOutOfRange {
        /// The rejected exponent
        exponent: i64,
        /// Declared polynomial degree
        degree: usize,
    },

    /// Two sparse terms share an exponent
    #[error("Exponent {exponent} is defined more than once")]
    DuplicateExponent {
        /// The repeated exponent
        exponent: usize,
    },

    /// Bad parameter name or template field
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter {
        /// Parameter name as given in the request
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// Batch-wide coefficient evaluation failure
    #[error("Coefficient evaluation failed: {0}")]
    Evaluation(String),

    /// The high-precision backend was requested but cannot be loaded
    #[error("High-precision root solver unavailable: {0}")]
    RootSolverUnavailable(String),

    /// Every root set was empty or non-finite
    #[error("No valid roots found.")]
    NoValidRoots,

    /// Request fields that make no sense before any work starts
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    pub(crate) fn syntax(expr: &str, reason: impl Into<String>) -> Self {
        Error::ExpressionSyntax {
            expr: expr.to_string(),
            reason: reason.into(),
        }
    }
}
