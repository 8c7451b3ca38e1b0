//! Progress reporting and transfer cancellation

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Observer of cumulative bytes transferred
///
/// Called after every chunk with the absolute position in the file, so a
/// resumed upload reports from the start of the file rather than from the
/// resume offset. Returning `true` from [`ProgressSink::should_cancel`] stops
/// the transfer after the current chunk.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, transferred: u64);

    fn should_cancel(&self) -> bool {
        false
    }
}

impl<F> ProgressSink for F
where
    F: Fn(u64) + Send + Sync,
{
    fn on_progress(&self, transferred: u64) {
        self(transferred)
    }
}

/// Sink that ignores progress and never cancels
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _transferred: u64) {}
}

/// Adds token-driven cancellation to any sink
#[derive(Debug, Clone)]
pub struct CancellableProgress<S> {
    inner: S,
    token: CancellationToken,
}

impl<S: ProgressSink> CancellableProgress<S> {
    pub fn new(inner: S, token: CancellationToken) -> Self {
        Self { inner, token }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl<S: ProgressSink> ProgressSink for CancellableProgress<S> {
    fn on_progress(&self, transferred: u64) {
        self.inner.on_progress(transferred)
    }

    fn should_cancel(&self) -> bool {
        self.token.is_cancelled() || self.inner.should_cancel()
    }
}

pub(crate) type SharedProgress = Arc<dyn ProgressSink>;
