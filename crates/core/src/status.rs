//! HTTP status classification
//!
//! Shared by the transfer engines and the operation poller. Classification is
//! a pure function of the status code and, when the server sent one, the
//! parsed error body.

use std::fmt;

use futures::StreamExt;
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::transport::ByteStream;

/// Service error codes that refine a 409 into a precise sub-kind
const RESOURCE_EXISTS_CODES: &[&str] = &[
    "DiskResourceAlreadyExistsError",
    "DiskPathPointsToExistentDirectoryError",
];
const MISSING_PARENT_CODES: &[&str] = &["DiskPathDoesntExistsError"];

/// Error payload returned by the service on non-success statuses
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerErrorBody {
    /// Machine readable error code
    #[serde(default)]
    pub error: Option<String>,

    /// Human readable description
    #[serde(default)]
    pub description: Option<String>,

    /// Localized message
    #[serde(default)]
    pub message: Option<String>,
}

/// Sub-kinds of a 4xx response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    NotAcceptable,
    Conflict,
    ResourceAlreadyExists,
    IntermediateFolderMissing,
    PreconditionFailed,
    PayloadTooLarge,
    RangeNotSatisfiable,
    Locked,
    TooManyRequests,
    Other,
}

/// Sub-kinds of a 5xx response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorKind {
    ServiceUnavailable,
    InsufficientStorage,
    Internal,
}

/// Outcome class of a raw HTTP status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    ClientRequest(ClientErrorKind),
    Server(ServerErrorKind),
    Protocol,
}

/// Classify a status code, optionally refined by the server's error body
pub fn classify(status: StatusCode, body: Option<&ServerErrorBody>) -> StatusClass {
    if status.is_success() {
        return StatusClass::Success;
    }

    if status.is_client_error() {
        let kind = match status {
            StatusCode::BAD_REQUEST => ClientErrorKind::BadRequest,
            StatusCode::UNAUTHORIZED => ClientErrorKind::Unauthorized,
            StatusCode::FORBIDDEN => ClientErrorKind::Forbidden,
            StatusCode::NOT_FOUND => ClientErrorKind::NotFound,
            StatusCode::METHOD_NOT_ALLOWED => ClientErrorKind::MethodNotAllowed,
            StatusCode::NOT_ACCEPTABLE => ClientErrorKind::NotAcceptable,
            StatusCode::CONFLICT => conflict_kind(body),
            StatusCode::PRECONDITION_FAILED => ClientErrorKind::PreconditionFailed,
            StatusCode::PAYLOAD_TOO_LARGE => ClientErrorKind::PayloadTooLarge,
            StatusCode::RANGE_NOT_SATISFIABLE => ClientErrorKind::RangeNotSatisfiable,
            StatusCode::LOCKED => ClientErrorKind::Locked,
            StatusCode::TOO_MANY_REQUESTS => ClientErrorKind::TooManyRequests,
            _ => ClientErrorKind::Other,
        };
        return StatusClass::ClientRequest(kind);
    }

    if status.is_server_error() {
        let kind = match status {
            StatusCode::SERVICE_UNAVAILABLE => ServerErrorKind::ServiceUnavailable,
            StatusCode::INSUFFICIENT_STORAGE => ServerErrorKind::InsufficientStorage,
            _ => ServerErrorKind::Internal,
        };
        return StatusClass::Server(kind);
    }

    StatusClass::Protocol
}

fn conflict_kind(body: Option<&ServerErrorBody>) -> ClientErrorKind {
    let code = body.and_then(|b| b.error.as_deref());
    match code {
        Some(code) if RESOURCE_EXISTS_CODES.contains(&code) => {
            ClientErrorKind::ResourceAlreadyExists
        }
        Some(code) if MISSING_PARENT_CODES.contains(&code) => {
            ClientErrorKind::IntermediateFolderMissing
        }
        _ => ClientErrorKind::Conflict,
    }
}

/// A classified non-success HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    pub status: u16,
    pub class: StatusClass,
    pub body: Option<ServerErrorBody>,
}

impl HttpError {
    pub fn new(status: StatusCode, body: Option<ServerErrorBody>) -> Self {
        Self {
            status: status.as_u16(),
            class: classify(status, body.as_ref()),
            body,
        }
    }

    /// Server errors and rate limiting are worth another attempt
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.class,
            StatusClass::Server(_) | StatusClass::ClientRequest(ClientErrorKind::TooManyRequests)
        )
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self.class, StatusClass::ClientRequest(_))
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self.class, StatusClass::Server(_))
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origin = match self.class {
            StatusClass::Server(_) => "Server error",
            _ => "Request error",
        };
        write!(f, "{origin}: HTTP {}", self.status)?;
        if let Some(body) = &self.body {
            if let Some(code) = &body.error {
                write!(f, " {code}")?;
            }
            if let Some(text) = body.description.as_ref().or(body.message.as_ref()) {
                write!(f, ": {text}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for HttpError {}

/// Read at most `limit` bytes of an error response and try to parse it.
///
/// A broken or non-JSON body yields `None`; the status alone still classifies.
pub async fn read_error_body(mut body: ByteStream, limit: usize) -> Option<ServerErrorBody> {
    let mut buf = Vec::new();
    while let Some(chunk) = body.next().await {
        let Ok(chunk) = chunk else { break };
        let room = limit.saturating_sub(buf.len());
        buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if buf.len() >= limit {
            break;
        }
    }
    serde_json::from_slice(&buf).ok()
}
