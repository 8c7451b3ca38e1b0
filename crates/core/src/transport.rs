//! Transport trait definition
//!
//! This trait is the only way the core talks to the network. It allows the
//! engines to be decoupled from the concrete HTTP client and driven by
//! in-memory doubles in tests.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::stream::BoxStream;
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{Error, ProtocolViolation, Result};
use crate::status::read_error_body;

/// Streaming body of a request or response
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Request payload
pub enum RequestBody {
    /// No body
    Empty,

    /// Small in-memory payload
    Bytes(Bytes),

    /// Streamed payload of a known length
    Stream { stream: ByteStream, length: u64 },
}

impl RequestBody {
    /// Declared payload length
    pub fn len(&self) -> u64 {
        match self {
            RequestBody::Empty => 0,
            RequestBody::Bytes(b) => b.len() as u64,
            RequestBody::Stream { length, .. } => *length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single HTTP request handed to the transport
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl TransportRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }
}

/// Status, headers and streaming body of a response
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

/// Trait for performing HTTP requests
///
/// Implementations map connection failures to [`Error::Transport`] and never
/// interpret the status code; that is left to the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute a request and return as soon as the response head is available
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse>;
}

/// Wrap an in-memory payload as a single-chunk body stream
pub fn body_from(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    futures::stream::once(async move { Ok(data) }).boxed()
}

/// Empty body stream
pub fn empty_body() -> ByteStream {
    futures::stream::empty().boxed()
}

/// Read a whole body into memory, refusing anything above `limit` bytes
pub async fn collect_body(mut body: ByteStream, limit: usize) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        if buf.len() + chunk.len() > limit {
            return Err(ProtocolViolation::BodyTooLarge(limit).into());
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// Execute a request whose successful response is a JSON document
pub async fn execute_json<T: DeserializeOwned>(
    transport: &dyn Transport,
    request: TransportRequest,
    limit: usize,
) -> Result<T> {
    let response = transport.execute(request).await?;

    if !response.status.is_success() {
        let body = read_error_body(response.body, limit).await;
        return Err(Error::from_status(response.status, body));
    }

    let bytes = collect_body(response.body, limit).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
