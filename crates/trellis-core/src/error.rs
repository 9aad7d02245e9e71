//! Error types for trellis-core

use crate::response::StatusCode;
use thiserror::Error;

/// Result type alias for trellis operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types raised by the parsers, the pipeline and its middleware
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid parameter encoding (bad percent escape, unreadable body)
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A key used both as array and as map
    #[error("Parameter type conflict: {0}")]
    ParameterType(String),

    /// Structurally broken multipart body
    #[error("Malformed multipart body: {0}")]
    MalformedMultipart(String),

    /// Nesting deeper than the parser's limit
    #[error("Parameters nested deeper than {limit} levels")]
    ParamsTooDeep { limit: usize },

    /// Query string over the byte size or parameter count limit
    #[error("Query limit exceeded: {0}")]
    QueryLimit(String),

    /// Multipart part or file count over limit
    #[error("Maximum {what} count in multipart body reached (limit {limit})")]
    PartLimit { what: &'static str, limit: usize },

    /// Environment or response contract violated (development-time check)
    #[error("Contract violation: {0}")]
    Contract(String),

    /// Session store failure
    #[error("Session backend error: {0}")]
    SessionBackend(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used by error-translating middleware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedInput,
    ResourceLimit,
    Contract,
    Session,
    Io,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidParameter(_) | Error::ParameterType(_) | Error::MalformedMultipart(_) => {
                ErrorKind::MalformedInput
            }
            Error::ParamsTooDeep { .. } | Error::QueryLimit(_) | Error::PartLimit { .. } => {
                ErrorKind::ResourceLimit
            }
            Error::Contract(_) => ErrorKind::Contract,
            Error::SessionBackend(_) => ErrorKind::Session,
            Error::Io(_) => ErrorKind::Io,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Suggested response status for client-caused failures
    pub fn status_hint(&self) -> Option<StatusCode> {
        match self {
            Error::PartLimit { .. } => Some(StatusCode::PAYLOAD_TOO_LARGE),
            e if e.kind() == ErrorKind::MalformedInput => Some(StatusCode::BAD_REQUEST),
            e if e.kind() == ErrorKind::ResourceLimit => Some(StatusCode::BAD_REQUEST),
            _ => None,
        }
    }

    /// True for client input problems (malformed or over a limit)
    pub fn is_client_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::MalformedInput | ErrorKind::ResourceLimit)
    }

    pub(crate) fn contract(msg: impl Into<String>) -> Self {
        Error::Contract(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        assert_eq!(Error::ParamsTooDeep { limit: 32 }.kind(), ErrorKind::ResourceLimit);
        assert_eq!(Error::MalformedMultipart("eof".into()).kind(), ErrorKind::MalformedInput);
        assert_eq!(Error::contract("bad").kind(), ErrorKind::Contract);
    }

    #[test]
    fn test_status_hint() {
        let limit = Error::PartLimit { what: "file", limit: 2 };
        assert_eq!(limit.status_hint(), Some(StatusCode::PAYLOAD_TOO_LARGE));
        assert_eq!(Error::InvalidParameter("%zz".into()).status_hint(), Some(StatusCode::BAD_REQUEST));
        assert_eq!(Error::contract("x").status_hint(), None);
        assert!(!Error::Internal("x".into()).is_client_error());
    }
}
