//! disk-core: transfer engines for the cloud disk REST client
//!
//! This crate provides the protocol core, including:
//! - Resumable file upload to server-issued links
//! - Streaming download into files or writers
//! - Polling of long-running server operations
//! - HTTP status classification and the error taxonomy
//! - Configuration management
//!
//! The crate never touches the network directly. All requests go through the
//! [`Transport`] trait, so the engines can be driven by any HTTP client or by
//! in-memory doubles in tests.

pub mod config;
pub mod download;
pub mod error;
pub mod hasher;
pub mod link;
pub mod operation;
pub mod progress;
pub mod status;
pub mod transport;
pub mod upload;

pub use config::{ClientConfig, ConfigManager, TimeoutConfig, TransferConfig};
pub use download::{DownloadEngine, DownloadSink};
pub use error::{Error, ProtocolViolation, Result};
pub use hasher::{ContentDigest, ContentHasher};
pub use link::{HttpMethod, TransferLink};
pub use operation::{
    CancellableWait, Deadline, ExponentialBackoff, FixedDelay, NoWait, OperationPoller,
    OperationState, OperationStatus, WaitStrategy,
};
pub use progress::{CancellableProgress, NoProgress, ProgressSink};
pub use status::{ClientErrorKind, HttpError, ServerErrorBody, ServerErrorKind, StatusClass};
pub use transport::{
    ByteStream, RequestBody, Transport, TransportRequest, TransportResponse,
};
pub use upload::{TransferReport, UploadEngine};
