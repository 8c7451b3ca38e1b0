//! Upload engine
//!
//! Streams a local file to an upload link with a single PUT, optionally
//! resuming from the number of bytes the server already holds.
//!
//! Resume is a two-request protocol: a HEAD request carrying the file digest,
//! answered with the stored length, then a PUT with `Content-Range` covering
//! only the remaining bytes. Any failure of that check falls back to a full upload.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::StreamExt;
use http::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, HeaderMap, HeaderValue};
use http::{Method, StatusCode};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use url::Url;

use crate::config::TransferConfig;
use crate::error::{Error, ProtocolViolation, Result};
use crate::hasher::{self, ContentDigest};
use crate::link::{HttpMethod, TransferLink};
use crate::progress::{ProgressSink, SharedProgress};
use crate::status::read_error_body;
use crate::transport::{ByteStream, RequestBody, Transport, TransportRequest};

const HEADER_ETAG: &str = "etag";
const HEADER_SHA256: &str = "sha256";
const HEADER_SIZE: &str = "size";

/// Result of a finished transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    /// Offset the transfer started from
    pub start_offset: u64,

    /// Bytes actually sent or received in this call
    pub transferred: u64,

    /// Final absolute position, i.e. the file size on success
    pub total: u64,
}

/// Drives PUT uploads of local files
pub struct UploadEngine {
    transport: Arc<dyn Transport>,
    config: TransferConfig,
}

impl UploadEngine {
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

    /// Upload `path` to `link`.
    ///
    /// The link must declare PUT. With `resume` set the server is asked how
    /// many bytes of a matching upload it holds and only the rest is sent.
    /// Progress is always reported as an absolute position in the file.
    pub async fn upload(
        &self,
        link: &TransferLink,
        path: &Path,
        resume: bool,
        progress: impl ProgressSink + 'static,
    ) -> Result<TransferReport> {
        link.expect_method(HttpMethod::Put)?;
        let url = link.url()?;
        let progress: SharedProgress = Arc::new(progress);

        let mut offset = 0;
        let mut digest = None;
        if resume {
            let d = hasher::digest_with_chunk_size(path, self.config.chunk_size()).await?;
            offset = self.resume_offset(&url, &d).await;
            tracing::debug!(url = %url, offset, size = d.size, "resume check finished");
            digest = Some(d);
        }

        let mut file = File::open(path)
            .await
            .map_err(|e| Error::local_io(path, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| Error::local_io(path, e))?
            .len();

        if let Some(d) = digest
            && d.size != size
        {
            tracing::warn!(
                path = %path.display(),
                digest_size = d.size,
                size,
                "file changed after digest, uploading from the start"
            );
            offset = 0;
        }

        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(|e| Error::local_io(path, e))?;
        }

        self.put(url, file, path, offset, size, progress).await
    }

    /// Ask the server how many bytes it already holds; never fails
    async fn resume_offset(&self, url: &Url, digest: &ContentDigest) -> u64 {
        match self.uploaded_size(url, digest).await {
            Ok(offset) if offset <= digest.size => offset,
            Ok(offset) => {
                tracing::warn!(
                    offset,
                    size = digest.size,
                    "server holds more bytes than the local file, uploading from the start"
                );
                0
            }
            Err(e) => {
                tracing::warn!(error = %e, "resume check failed, uploading from the start");
                0
            }
        }
    }

    async fn uploaded_size(&self, url: &Url, digest: &ContentDigest) -> Result<u64> {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_ETAG, header_value(&digest.md5_hex())?);
        headers.insert(HEADER_SHA256, header_value(&digest.sha256_hex())?);
        headers.insert(HEADER_SIZE, HeaderValue::from(digest.size));

        let request = TransportRequest::new(Method::HEAD, url.clone()).headers(headers);
        let response = self.transport.execute(request).await?;

        match response.status {
            StatusCode::OK => match response.headers.get(CONTENT_LENGTH) {
                None => Ok(0),
                Some(value) => value
                    .to_str()
                    .ok()
                    .and_then(|s| s.trim().parse::<u64>().ok())
                    .ok_or_else(|| {
                        ProtocolViolation::MalformedHeader {
                            name: CONTENT_LENGTH.to_string(),
                            value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
                        }
                        .into()
                    }),
            },
            // no upload with this digest, or the digest does not match
            StatusCode::NOT_FOUND | StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => Ok(0),
            status => Err(Error::from_status(status, None)),
        }
    }

    async fn put(
        &self,
        url: Url,
        file: File,
        path: &Path,
        offset: u64,
        size: u64,
        progress: SharedProgress,
    ) -> Result<TransferReport> {
        let remaining = size - offset;

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        headers.insert(CONTENT_LENGTH, HeaderValue::from(remaining));
        if offset > 0 {
            headers.insert(CONTENT_RANGE, header_value(&content_range(offset, size))?);
        }

        if remaining == 0 {
            progress.on_progress(size);
        }

        let failure = Arc::new(Mutex::new(None));
        let body = FileBody {
            file,
            path: path.to_path_buf(),
            position: offset,
            end: size,
            chunk_size: self.config.chunk_size(),
            progress,
            failure: failure.clone(),
        };

        let request = TransportRequest::new(Method::PUT, url.clone())
            .headers(headers)
            .body(RequestBody::Stream {
                stream: body.into_stream(),
                length: remaining,
            });

        let result = self.transport.execute(request).await;

        // A body abort surfaces from the transport as a generic failure;
        // report what actually stopped the stream instead.
        if let Some(cause) = take_failure(&failure) {
            return Err(cause);
        }
        let response = result?;

        if !response.status.is_success() {
            let body = read_error_body(response.body, self.config.body_limit).await;
            return Err(Error::from_status(response.status, body));
        }

        tracing::info!(
            url = %url,
            offset,
            size = %humansize::format_size(size, humansize::BINARY),
            status = response.status.as_u16(),
            "upload finished"
        );

        Ok(TransferReport {
            start_offset: offset,
            transferred: remaining,
            total: size,
        })
    }
}

/// `Content-Range` for the bytes from `offset` to the end of the file
fn content_range(offset: u64, size: u64) -> String {
    if offset >= size {
        format!("bytes */{size}")
    } else {
        format!("bytes {}-{}/{}", offset, size - 1, size)
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| {
        ProtocolViolation::MalformedHeader {
            name: "request".into(),
            value: value.to_string(),
        }
        .into()
    })
}

fn take_failure(slot: &Mutex<Option<Error>>) -> Option<Error> {
    slot.lock().ok().and_then(|mut guard| guard.take())
}

/// Request body reading the file chunk by chunk
struct FileBody {
    file: File,
    path: PathBuf,
    position: u64,
    end: u64,
    chunk_size: usize,
    progress: SharedProgress,
    failure: Arc<Mutex<Option<Error>>>,
}

impl FileBody {
    fn into_stream(self) -> ByteStream {
        futures::stream::unfold(Some(self), |state| async move {
            let mut body = state?;
            match body.next_chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(body))),
                Ok(None) => None,
                Err(e) => {
                    let signal = match &e {
                        Error::Cancelled => Error::Cancelled,
                        other => Error::Transport(format!("request body aborted: {other}")),
                    };
                    if let Ok(mut slot) = body.failure.lock() {
                        *slot = Some(e);
                    }
                    Some((Err(signal), None))
                }
            }
        })
        .boxed()
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.position >= self.end {
            return Ok(None);
        }
        if self.progress.should_cancel() {
            tracing::debug!(position = self.position, "upload cancelled by caller");
            return Err(Error::Cancelled);
        }

        let want = (self.end - self.position).min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; want];
        self.file
            .read_exact(&mut buf)
            .await
            .map_err(|e| Error::local_io(&self.path, e))?;

        self.position += want as u64;
        self.progress.on_progress(self.position);
        Ok(Some(Bytes::from(buf)))
    }
}
