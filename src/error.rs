//! Error types for cassandra-service
//!
//! Every failure leaving the service belongs to a small, closed taxonomy of
//! HTTP-style errors. Native store failures are folded into it by
//! [`classify`], which follows the store's protocol error codes.

use thiserror::Error;

use crate::storage::DriverError;

/// The main error type for service operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Malformed input, unsupported operator, failed validation or hook
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotAuthenticated(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    MethodNotAllowed(String),

    #[error("{0}")]
    NotAcceptable(String),

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Conflict(String),

    /// The store is overloaded
    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    GeneralError(String),

    /// A capability that was not wired in
    #[error("{0}")]
    NotImplemented(String),

    #[error("{0}")]
    Unavailable(String),
}

/// Result type alias for service operations
pub type Result<T> = std::result::Result<T, Error>;

/// Discriminant of [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadRequest,
    NotAuthenticated,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    NotAcceptable,
    Timeout,
    Conflict,
    Unprocessable,
    GeneralError,
    NotImplemented,
    Unavailable,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BadRequest(_) => ErrorKind::BadRequest,
            Error::NotAuthenticated(_) => ErrorKind::NotAuthenticated,
            Error::Forbidden(_) => ErrorKind::Forbidden,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::MethodNotAllowed(_) => ErrorKind::MethodNotAllowed,
            Error::NotAcceptable(_) => ErrorKind::NotAcceptable,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Unprocessable(_) => ErrorKind::Unprocessable,
            Error::GeneralError(_) => ErrorKind::GeneralError,
            Error::NotImplemented(_) => ErrorKind::NotImplemented,
            Error::Unavailable(_) => ErrorKind::Unavailable,
        }
    }

    /// HTTP status code of the error
    pub fn status(&self) -> u16 {
        match self.kind() {
            ErrorKind::BadRequest => 400,
            ErrorKind::NotAuthenticated => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::MethodNotAllowed => 405,
            ErrorKind::NotAcceptable => 406,
            ErrorKind::Timeout => 408,
            ErrorKind::Conflict => 409,
            ErrorKind::Unprocessable => 422,
            ErrorKind::GeneralError => 500,
            ErrorKind::NotImplemented => 501,
            ErrorKind::Unavailable => 503,
        }
    }

    /// Class name as seen by web clients
    pub fn name(&self) -> &'static str {
        match self.kind() {
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::NotAuthenticated => "NotAuthenticated",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::MethodNotAllowed => "MethodNotAllowed",
            ErrorKind::NotAcceptable => "NotAcceptable",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::Unprocessable => "Unprocessable",
            ErrorKind::GeneralError => "GeneralError",
            ErrorKind::NotImplemented => "NotImplemented",
            ErrorKind::Unavailable => "Unavailable",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Error::BadRequest(m)
            | Error::NotAuthenticated(m)
            | Error::Forbidden(m)
            | Error::NotFound(m)
            | Error::MethodNotAllowed(m)
            | Error::NotAcceptable(m)
            | Error::Timeout(m)
            | Error::Conflict(m)
            | Error::Unprocessable(m)
            | Error::GeneralError(m)
            | Error::NotImplemented(m)
            | Error::Unavailable(m) => m,
        }
    }

    /// Transient store-health failures a caller may retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Unavailable(_))
    }

    pub(crate) fn not_found(id: impl std::fmt::Display) -> Self {
        Error::NotFound(format!("No record found for id '{}'", id))
    }
}

// =============================================================================
// Native error codes
// =============================================================================

/// Protocol error codes reported by the store
pub mod codes {
    pub const SERVER_ERROR: u32 = 0x0000;
    pub const PROTOCOL_ERROR: u32 = 0x000A;
    pub const BAD_CREDENTIALS: u32 = 0x0100;
    pub const UNAVAILABLE_EXCEPTION: u32 = 0x1000;
    pub const OVERLOADED: u32 = 0x1001;
    pub const IS_BOOTSTRAPPING: u32 = 0x1002;
    pub const TRUNCATE_ERROR: u32 = 0x1003;
    pub const WRITE_TIMEOUT: u32 = 0x1100;
    pub const READ_TIMEOUT: u32 = 0x1200;
    pub const READ_FAILURE: u32 = 0x1300;
    pub const FUNCTION_FAILURE: u32 = 0x1400;
    pub const WRITE_FAILURE: u32 = 0x1500;
    pub const SYNTAX_ERROR: u32 = 0x2000;
    pub const UNAUTHORIZED: u32 = 0x2100;
    pub const INVALID: u32 = 0x2200;
    pub const CONFIG_ERROR: u32 = 0x2300;
    pub const ALREADY_EXISTS: u32 = 0x2400;
    pub const UNPREPARED: u32 = 0x2500;
}

/// Taxonomy member for a native protocol error code
pub fn kind_for_code(code: u32) -> ErrorKind {
    use codes::*;

    match code {
        SYNTAX_ERROR | INVALID | TRUNCATE_ERROR => ErrorKind::BadRequest,
        BAD_CREDENTIALS => ErrorKind::NotAuthenticated,
        UNAUTHORIZED => ErrorKind::Forbidden,
        FUNCTION_FAILURE => ErrorKind::MethodNotAllowed,
        PROTOCOL_ERROR => ErrorKind::NotAcceptable,
        READ_TIMEOUT | WRITE_TIMEOUT => ErrorKind::Timeout,
        ALREADY_EXISTS => ErrorKind::Conflict,
        OVERLOADED => ErrorKind::Unprocessable,
        CONFIG_ERROR | SERVER_ERROR | READ_FAILURE | WRITE_FAILURE => ErrorKind::GeneralError,
        UNPREPARED => ErrorKind::NotImplemented,
        IS_BOOTSTRAPPING | UNAVAILABLE_EXCEPTION => ErrorKind::Unavailable,
        _ => ErrorKind::GeneralError,
    }
}

impl ErrorKind {
    pub fn with_message(self, message: impl Into<String>) -> Error {
        let message = message.into();
        match self {
            ErrorKind::BadRequest => Error::BadRequest(message),
            ErrorKind::NotAuthenticated => Error::NotAuthenticated(message),
            ErrorKind::Forbidden => Error::Forbidden(message),
            ErrorKind::NotFound => Error::NotFound(message),
            ErrorKind::MethodNotAllowed => Error::MethodNotAllowed(message),
            ErrorKind::NotAcceptable => Error::NotAcceptable(message),
            ErrorKind::Timeout => Error::Timeout(message),
            ErrorKind::Conflict => Error::Conflict(message),
            ErrorKind::Unprocessable => Error::Unprocessable(message),
            ErrorKind::GeneralError => Error::GeneralError(message),
            ErrorKind::NotImplemented => Error::NotImplemented(message),
            ErrorKind::Unavailable => Error::Unavailable(message),
        }
    }
}

/// Fold a native driver failure into the taxonomy.
///
/// Errors that are already classified pass through unchanged.
pub fn classify(err: DriverError) -> Error {
    match err {
        DriverError::Classified(err) => err,
        DriverError::TypeMismatch(message) => Error::BadRequest(message),
        DriverError::Response { code, message } => {
            let kind = kind_for_code(code);
            tracing::warn!(code = %format!("{:#06x}", code), ?kind, %message, "store rejected statement");
            kind.with_message(message)
        }
        DriverError::Other(message) => Error::GeneralError(message),
    }
}

// =============================================================================
// Conversions from external error types
// =============================================================================

impl From<cqlq::ParseError> for Error {
    fn from(err: cqlq::ParseError) -> Self {
        Error::BadRequest(err.to_string())
    }
}

impl From<crate::schema::ValidationError> for Error {
    fn from(err: crate::schema::ValidationError) -> Self {
        Error::BadRequest(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::BadRequest(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::GeneralError(format!("Failed to parse YAML: {}", err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::GeneralError(err.to_string())
    }
}
