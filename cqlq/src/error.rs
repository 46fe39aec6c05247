//! Error types for query-object parsing

use thiserror::Error;

/// Error that occurred while classifying a query or data object
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Operator recognised by the language but not expressible against the store
    #[error("`{0}` is not supported")]
    Unsupported(String),

    /// Operator used in a position where it has no meaning
    #[error("Invalid query parameter {0}")]
    InvalidParameter(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: &'static str },

    #[error("Invalid select expression '{0}'")]
    InvalidSelect(String),
}

impl ParseError {
    pub fn invalid_value(key: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidValue {
            key: key.into(),
            reason,
        }
    }
}
