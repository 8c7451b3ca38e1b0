//! Download engine
//!
//! Streams the body of a download link into a local file or a caller
//! supplied writer. Error responses are classified and never reach the
//! destination. A partially written file is left on disk for the caller.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use http::header::{CONTENT_RANGE, HeaderMap, HeaderValue, RANGE};
use http::{Method, StatusCode};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::config::TransferConfig;
use crate::error::{Error, ProtocolViolation, Result};
use crate::link::{HttpMethod, TransferLink};
use crate::progress::{NoProgress, ProgressSink, SharedProgress};
use crate::status::read_error_body;
use crate::transport::{ByteStream, Transport, TransportRequest};
use crate::upload::TransferReport;

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

enum Target {
    File { path: PathBuf, resume: bool },
    Writer(BoxWriter),
}

/// Where downloaded bytes go, plus who hears about progress
pub struct DownloadSink {
    target: Target,
    progress: SharedProgress,
}

impl DownloadSink {
    /// Write into a local file, created or truncated on the first byte
    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            target: Target::File {
                path: path.into(),
                resume: false,
            },
            progress: Arc::new(NoProgress),
        }
    }

    /// Stream into a caller-provided consumer
    pub fn to_writer(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            target: Target::Writer(Box::new(writer)),
            progress: Arc::new(NoProgress),
        }
    }

    /// Continue an existing local file with a `Range` request.
    ///
    /// Only meaningful for file targets.
    pub fn resume(mut self) -> Self {
        if let Target::File { resume, .. } = &mut self.target {
            *resume = true;
        }
        self
    }

    pub fn with_progress(mut self, progress: impl ProgressSink + 'static) -> Self {
        self.progress = Arc::new(progress);
        self
    }

    fn describe(&self) -> String {
        match &self.target {
            Target::File { path, .. } => path.display().to_string(),
            Target::Writer(_) => "stream consumer".to_string(),
        }
    }
}

/// Drives GET downloads
pub struct DownloadEngine {
    transport: Arc<dyn Transport>,
    config: TransferConfig,
}

impl DownloadEngine {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            config: TransferConfig::default(),
        }
    }

    pub fn with_config(mut self, config: TransferConfig) -> Self {
        self.config = config;
        self
    }

    /// Download `link` into `sink`.
    ///
    /// The link must declare GET. A non-success status writes nothing and is
    /// returned as a classified error.
    pub async fn download(&self, link: &TransferLink, sink: DownloadSink) -> Result<TransferReport> {
        link.expect_method(HttpMethod::Get)?;
        let url = link.url()?;
        let context = sink.describe();

        let local_length = match &sink.target {
            Target::File { path, resume: true } => existing_length(path).await,
            _ => 0,
        };

        let mut headers = HeaderMap::new();
        if local_length > 0 {
            let range = HeaderValue::from_str(&format!("bytes={local_length}-"))
                .map_err(|_| Error::Config(format!("invalid range start {local_length}")))?;
            headers.insert(RANGE, range);
        }

        let request = TransportRequest::new(Method::GET, url.clone()).headers(headers);
        let response = self.transport.execute(request).await?;

        if !response.status.is_success() {
            let body = read_error_body(response.body, self.config.body_limit).await;
            return Err(Error::from_status(response.status, body));
        }

        let start = match response.status {
            StatusCode::PARTIAL_CONTENT if local_length > 0 => {
                let served = range_start(&response.headers)?;
                if served != local_length {
                    tracing::warn!(
                        url = %url,
                        requested = local_length,
                        served,
                        "server answered a different range"
                    );
                    return Err(ProtocolViolation::UnexpectedStatus(206).into());
                }
                local_length
            }
            StatusCode::PARTIAL_CONTENT => {
                return Err(ProtocolViolation::UnexpectedStatus(206).into());
            }
            _ => {
                if local_length > 0 {
                    tracing::debug!(url = %url, "server ignored range, downloading from the start");
                }
                0
            }
        };

        let DownloadSink { target, progress } = sink;
        let mut writer: BoxWriter = match target {
            Target::File { path, .. } => Box::new(open_destination(&path, start > 0).await?),
            Target::Writer(writer) => writer,
        };

        let copied = copy_body(
            response.body,
            &mut writer,
            start,
            self.config.chunk_size(),
            progress.as_ref(),
            &context,
        )
        .await;
        let closed = writer.shutdown().await;

        let transferred = copied?;
        closed.map_err(|e| Error::LocalIo {
            context: context.clone(),
            source: e,
        })?;

        tracing::info!(
            url = %url,
            destination = %context,
            start,
            size = %humansize::format_size(start + transferred, humansize::BINARY),
            "download finished"
        );

        Ok(TransferReport {
            start_offset: start,
            transferred,
            total: start + transferred,
        })
    }
}

/// First byte position of a `Content-Range: bytes <start>-<end>/<total>` header
fn range_start(headers: &HeaderMap) -> Result<u64> {
    let value = headers.get(CONTENT_RANGE);
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().strip_prefix("bytes "))
        .and_then(|v| v.split_once('-'))
        .and_then(|(start, _)| start.trim().parse::<u64>().ok())
        .ok_or_else(|| {
            ProtocolViolation::MalformedHeader {
                name: CONTENT_RANGE.to_string(),
                value: value
                    .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                    .unwrap_or_default(),
            }
            .into()
        })
}

async fn existing_length(path: &Path) -> u64 {
    tokio::fs::metadata(path)
        .await
        .map(|m| if m.is_file() { m.len() } else { 0 })
        .unwrap_or(0)
}

async fn open_destination(path: &Path, append: bool) -> Result<tokio::fs::File> {
    let mut options = tokio::fs::OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    options.open(path).await.map_err(|e| Error::local_io(path, e))
}

/// Copy the body in bounded chunks, returning the number of bytes written
async fn copy_body(
    mut body: ByteStream,
    writer: &mut BoxWriter,
    start: u64,
    chunk_size: usize,
    progress: &dyn ProgressSink,
    context: &str,
) -> Result<u64> {
    let mut position = start;

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        for piece in chunk.chunks(chunk_size) {
            writer.write_all(piece).await.map_err(|e| Error::LocalIo {
                context: context.to_string(),
                source: e,
            })?;
            position += piece.len() as u64;
            progress.on_progress(position);

            if progress.should_cancel() {
                tracing::debug!(position, "download cancelled by caller");
                return Err(Error::Cancelled);
            }
        }
    }

    Ok(position - start)
}
