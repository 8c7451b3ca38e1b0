//! Shared helpers for disk-core integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use disk_core::transport::empty_body;
use disk_core::{
    Error, HttpMethod, RequestBody, Result, TransferLink, Transport, TransportRequest,
    TransportResponse,
};
use futures::StreamExt;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use tempfile::TempDir;

/// Install a test subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Scripted response handed out by [`ScriptedTransport`]
pub enum Reply {
    Status {
        status: StatusCode,
        headers: HeaderMap,
        body: Vec<Bytes>,
        /// Fail the body stream after the chunks above
        broken: bool,
    },
    Unreachable(String),
}

impl Reply {
    pub fn status(code: u16) -> Self {
        Reply::Status {
            status: StatusCode::from_u16(code).unwrap(),
            headers: HeaderMap::new(),
            body: Vec::new(),
            broken: false,
        }
    }

    pub fn header(mut self, name: &'static str, value: &str) -> Self {
        if let Reply::Status { headers, .. } = &mut self {
            headers.insert(name, HeaderValue::from_str(value).unwrap());
        }
        self
    }

    pub fn body(mut self, data: impl Into<Bytes>) -> Self {
        if let Reply::Status { body, .. } = &mut self {
            body.push(data.into());
        }
        self
    }

    pub fn chunks(mut self, chunks: Vec<Vec<u8>>) -> Self {
        if let Reply::Status { body, .. } = &mut self {
            body.extend(chunks.into_iter().map(Bytes::from));
        }
        self
    }

    pub fn broken(mut self) -> Self {
        if let Reply::Status { broken, .. } = &mut self {
            *broken = true;
        }
        self
    }
}

/// A request as the transport saw it, with the body fully drained
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// In-memory transport answering from a script and logging every request
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<Recorded>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn methods(&self) -> Vec<Method> {
        self.requests().into_iter().map(|r| r.method).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse> {
        let TransportRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let mut sent = Vec::new();
        let drained = match body {
            RequestBody::Empty => Ok(()),
            RequestBody::Bytes(b) => {
                sent.extend_from_slice(&b);
                Ok(())
            }
            RequestBody::Stream { mut stream, .. } => {
                let mut outcome = Ok(());
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(chunk) => sent.extend_from_slice(&chunk),
                        Err(e) => {
                            outcome = Err(Error::Transport(format!("error sending request: {e}")));
                            break;
                        }
                    }
                }
                outcome
            }
        };

        self.requests.lock().unwrap().push(Recorded {
            method,
            url: url.to_string(),
            headers,
            body: sent,
        });
        drained?;

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("no scripted reply left");

        match reply {
            Reply::Unreachable(message) => Err(Error::Transport(message)),
            Reply::Status {
                status,
                headers,
                body,
                broken,
            } => {
                let mut items: Vec<Result<Bytes>> = body.into_iter().map(Ok).collect();
                if broken {
                    items.push(Err(Error::Transport("connection reset by peer".into())));
                }
                let body = match items.len() {
                    0 => empty_body(),
                    _ => futures::stream::iter(items).boxed(),
                };
                Ok(TransportResponse {
                    status,
                    headers,
                    body,
                })
            }
        }
    }
}

/// Collects every progress event
#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<u64>>>);

impl Events {
    pub fn sink(&self) -> impl Fn(u64) + Send + Sync + 'static {
        let events = self.0.clone();
        move |n| events.lock().unwrap().push(n)
    }

    pub fn all(&self) -> Vec<u64> {
        self.0.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<u64> {
        self.0.lock().unwrap().last().copied()
    }
}

/// Writer that keeps its bytes reachable after being handed away
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl tokio::io::AsyncWrite for SharedBuffer {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);
        std::task::Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }
}

pub fn link(method: HttpMethod) -> TransferLink {
    TransferLink {
        href: "https://uploader.example.net/upload-target/20260101T000000.000.utd.abc".into(),
        method,
        templated: false,
    }
}

/// Deterministic payload of `size` bytes
pub fn payload(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i * 31 % 251) as u8).collect()
}

pub fn write_file(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, data).unwrap();
    path
}

pub fn read_file(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap()
}

/// Single-chunk body helper for small JSON replies
pub fn json(status: u16, body: &'static str) -> Reply {
    Reply::status(status)
        .header("content-type", "application/json")
        .body(Bytes::from_static(body.as_bytes()))
}

