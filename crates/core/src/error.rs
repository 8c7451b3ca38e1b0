//! Error types for disk-core
//!
//! Every public operation returns exactly one of these per call. Remote
//! failures (transport, HTTP status, protocol) and local file failures are
//! kept in separate variants so callers can decide what is worth retrying.

use std::path::Path;

use thiserror::Error;

use crate::link::HttpMethod;
use crate::status::{HttpError, ServerErrorBody, StatusClass};

/// Result type alias for disk-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for disk-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Connection could not be established or was interrupted mid-transfer
    #[error("Transport error: {0}")]
    Transport(String),

    /// Server answered with a classified non-success status
    #[error(transparent)]
    Http(#[from] HttpError),

    /// Response or link does not match the documented contract
    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// Local file could not be opened, read or written
    #[error("Local IO error ({context}): {source}")]
    LocalIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Caller asked to stop the transfer or the wait
    #[error("Cancelled by caller")]
    Cancelled,

    /// Wait strategy gave up before the operation finished
    #[error("Deadline exceeded after {0:?}")]
    DeadlineExceeded(std::time::Duration),

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Contract violations detected either before I/O or while reading a response
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("link declares method {actual}, expected {expected}")]
    WrongMethod {
        expected: HttpMethod,
        actual: HttpMethod,
    },

    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(u16),

    #[error("malformed {name} header: {value:?}")]
    MalformedHeader { name: String, value: String },

    #[error("unknown operation status {0:?}")]
    UnknownOperationStatus(String),

    #[error("response body exceeds {0} bytes")]
    BodyTooLarge(usize),
}

impl Error {
    /// Wrap a local IO failure on a file path
    pub fn local_io(path: &Path, source: std::io::Error) -> Self {
        Error::LocalIo {
            context: path.display().to_string(),
            source,
        }
    }

    /// Build the error for a non-success status.
    ///
    /// Statuses outside 4xx/5xx are protocol violations, not HTTP errors.
    pub fn from_status(status: http::StatusCode, body: Option<ServerErrorBody>) -> Self {
        let error = HttpError::new(status, body);
        match error.class {
            StatusClass::Protocol | StatusClass::Success => {
                Error::Protocol(ProtocolViolation::UnexpectedStatus(status.as_u16()))
            }
            _ => Error::Http(error),
        }
    }

    /// HTTP status behind this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Http(e) => Some(e.status),
            Error::Protocol(ProtocolViolation::UnexpectedStatus(code)) => Some(*code),
            _ => None,
        }
    }

    /// Whether the caller may reasonably try the same call again
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Transport(_) => true,
            Error::Http(e) => e.is_retriable(),
            _ => false,
        }
    }

    /// Whether this failure happened on the local side
    pub fn is_local(&self) -> bool {
        matches!(self, Error::LocalIo { .. })
    }
}
