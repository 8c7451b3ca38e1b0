//! reqwest-backed transport
//!
//! This is the only place in the workspace that depends on an HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use disk_core::{
    ByteStream, ClientConfig, Error, RequestBody, Result, Transport, TransportRequest,
    TransportResponse,
};
use futures::StreamExt;
use http::header::{CONTENT_LENGTH, HeaderValue};
use reqwest::Client;
use reqwest::redirect::Policy;

const MAX_REDIRECTS: usize = 10;

/// [`Transport`] over a shared reqwest client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a client with the configured timeouts and redirect policy
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let redirect = if config.follow_redirects {
            Policy::limited(MAX_REDIRECTS)
        } else {
            Policy::none()
        };

        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.timeout.connect_ms))
            .read_timeout(Duration::from_millis(config.timeout.read_ms))
            .redirect(redirect)
            .build()
            .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Wrap an existing client, e.g. one with a custom TLS setup
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse> {
        let TransportRequest {
            method,
            url,
            mut headers,
            body,
        } = request;

        if let RequestBody::Stream { length, .. } = &body {
            headers
                .entry(CONTENT_LENGTH)
                .or_insert_with(|| HeaderValue::from(*length));
        }

        tracing::trace!(method = %method, url = %url, "sending request");

        let mut builder = self.client.request(method, url).headers(headers);
        builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Bytes(bytes) => builder.body(bytes),
            RequestBody::Stream { stream, .. } => builder.body(reqwest::Body::wrap_stream(stream)),
        };

        let response = builder.send().await.map_err(request_error)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body: ByteStream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| Error::Transport(format!("Failed to read response: {e}"))))
            .boxed();

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

fn request_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Transport(format!("Request timed out: {e}"))
    } else {
        Error::Transport(format!("Request failed: {e}"))
    }
}
