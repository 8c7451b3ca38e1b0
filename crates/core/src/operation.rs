//! Long-running operation polling
//!
//! Copy, move and delete of large trees finish asynchronously on the server.
//! The poller queries the operation link until the status is terminal,
//! calling a caller-supplied wait strategy between queries.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use http::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::Deserialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::TransferConfig;
use crate::error::{Error, ProtocolViolation, Result};
use crate::link::{HttpMethod, TransferLink};
use crate::transport::{Transport, TransportRequest, execute_json};

/// State of a long-running operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    InProgress,
    Success,
    Failed,
}

impl OperationState {
    fn parse(status: &str) -> Result<Self> {
        match status {
            "in-progress" => Ok(OperationState::InProgress),
            "success" => Ok(OperationState::Success),
            "failed" => Ok(OperationState::Failed),
            other => Err(ProtocolViolation::UnknownOperationStatus(other.to_string()).into()),
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, OperationState::InProgress)
    }
}

/// Snapshot returned by one status query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationStatus {
    pub id: String,
    pub state: OperationState,
}

impl OperationStatus {
    pub fn is_in_progress(&self) -> bool {
        self.state == OperationState::InProgress
    }

    pub fn is_success(&self) -> bool {
        self.state == OperationState::Success
    }
}

#[derive(Debug, Deserialize)]
struct OperationResponse {
    status: String,
}

/// Called between two status queries
///
/// Returning an error ends polling with that error, which is how deadlines
/// and cancellation are enforced.
#[async_trait]
pub trait WaitStrategy: Send {
    async fn wait(&mut self) -> Result<()>;
}

#[async_trait]
impl<F, Fut> WaitStrategy for F
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn wait(&mut self) -> Result<()> {
        (self)().await
    }
}

/// Poll again immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWait;

#[async_trait]
impl WaitStrategy for NoWait {
    async fn wait(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sleep for the same duration between queries
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

#[async_trait]
impl WaitStrategy for FixedDelay {
    async fn wait(&mut self) -> Result<()> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}

/// Doubling delay capped at `max`
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    next: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial.min(max),
            max,
        }
    }

    fn advance(&mut self) -> Duration {
        let current = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        current
    }
}

#[async_trait]
impl WaitStrategy for ExponentialBackoff {
    async fn wait(&mut self) -> Result<()> {
        let delay = self.advance();
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

/// Fails once the time since the first wait passes a limit
///
/// The clock starts on the first call to `wait`, so time spent before
/// polling begins does not count. Status queries between waits do.
#[derive(Debug, Clone)]
pub struct Deadline<W> {
    inner: W,
    limit: Duration,
    started: Option<Instant>,
}

impl<W: WaitStrategy> Deadline<W> {
    pub fn new(inner: W, limit: Duration) -> Self {
        Self {
            inner,
            limit,
            started: None,
        }
    }
}

#[async_trait]
impl<W: WaitStrategy> WaitStrategy for Deadline<W> {
    async fn wait(&mut self) -> Result<()> {
        let started = *self.started.get_or_insert_with(Instant::now);
        let remaining = self
            .limit
            .checked_sub(started.elapsed())
            .ok_or(Error::DeadlineExceeded(self.limit))?;

        match tokio::time::timeout(remaining, self.inner.wait()).await {
            Ok(result) => result,
            Err(_) => Err(Error::DeadlineExceeded(self.limit)),
        }
    }
}

/// Lets a cancellation token interrupt a pending wait
#[derive(Debug, Clone)]
pub struct CancellableWait<W> {
    inner: W,
    token: CancellationToken,
}

impl<W: WaitStrategy> CancellableWait<W> {
    pub fn new(inner: W, token: CancellationToken) -> Self {
        Self { inner, token }
    }
}

#[async_trait]
impl<W: WaitStrategy> WaitStrategy for CancellableWait<W> {
    async fn wait(&mut self) -> Result<()> {
        tokio::select! {
            _ = self.token.cancelled() => Err(Error::Cancelled),
            result = self.inner.wait() => result,
        }
    }
}

/// Queries operation links until they reach a terminal state
pub struct OperationPoller {
    transport: Arc<dyn Transport>,
    config: TransferConfig,
}

impl OperationPoller {
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

    /// Query the operation once
    pub async fn get_operation(&self, link: &TransferLink) -> Result<OperationStatus> {
        link.expect_method(HttpMethod::Get)?;
        self.query(link).await
    }

    /// Poll until the operation succeeds or fails.
    ///
    /// `FAILED` is a normal return value. There is no built-in limit; bound
    /// the total time with a strategy such as [`Deadline`].
    pub async fn wait_until_done(
        &self,
        link: &TransferLink,
        mut wait: impl WaitStrategy,
    ) -> Result<OperationStatus> {
        link.expect_method(HttpMethod::Get)?;

        let mut polls = 0u32;
        loop {
            let status = self.query(link).await?;
            polls += 1;
            if status.state.is_terminal() {
                tracing::debug!(id = %status.id, state = ?status.state, polls, "operation finished");
                return Ok(status);
            }
            wait.wait().await?;
        }
    }

    async fn query(&self, link: &TransferLink) -> Result<OperationStatus> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let request = TransportRequest::new(Method::GET, link.url()?).headers(headers);

        let response: OperationResponse =
            execute_json(self.transport.as_ref(), request, self.config.body_limit).await?;
        let state = OperationState::parse(&response.status)?;

        Ok(OperationStatus {
            id: link.last_segment().unwrap_or_default(),
            state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, TransportResponse, body_from};
    use http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn link(method: HttpMethod) -> TransferLink {
        TransferLink {
            href: "https://cloud-api.example.net/v1/disk/operations/op-42".into(),
            method,
            templated: false,
        }
    }

    fn status_response(status: &str) -> Result<TransportResponse> {
        Ok(TransportResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: body_from(format!(r#"{{"status":"{status}"}}"#)),
        })
    }

    fn scripted(states: &'static [&'static str]) -> (Arc<dyn Transport>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut transport = MockTransport::new();
        transport.expect_execute().returning(move |request| {
            assert_eq!(request.method, Method::GET);
            let n = counter.fetch_add(1, Ordering::SeqCst);
            status_response(states[n.min(states.len() - 1)])
        });
        (Arc::new(transport), calls)
    }

    #[tokio::test]
    async fn test_first_poll_success() {
        let (transport, calls) = scripted(&["success"]);
        let poller = OperationPoller::new(transport);

        let mut waits = 0;
        let status = poller
            .wait_until_done(&link(HttpMethod::Get), || {
                waits += 1;
                async { Ok(()) }
            })
            .await
            .unwrap();

        assert!(status.is_success());
        assert_eq!(status.id, "op-42");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(waits, 0);
    }

    #[tokio::test]
    async fn test_waits_between_polls_and_returns_failed() {
        let (transport, calls) = scripted(&["in-progress", "in-progress", "failed"]);
        let poller = OperationPoller::new(transport);

        let mut waits = 0;
        let status = poller
            .wait_until_done(&link(HttpMethod::Get), || {
                waits += 1;
                async { Ok(()) }
            })
            .await
            .unwrap();

        assert_eq!(status.state, OperationState::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(waits, 2);
    }

    #[tokio::test]
    async fn test_wrong_method_rejected_before_query() {
        let mut transport = MockTransport::new();
        transport.expect_execute().never();
        let poller = OperationPoller::new(Arc::new(transport));

        let err = poller
            .wait_until_done(&link(HttpMethod::Post), NoWait)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolViolation::WrongMethod { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_status_is_protocol_violation() {
        let (transport, _) = scripted(&["paused"]);
        let poller = OperationPoller::new(transport);

        let err = poller.get_operation(&link(HttpMethod::Get)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolViolation::UnknownOperationStatus(_))
        ));
    }

    #[tokio::test]
    async fn test_http_error_surfaces() {
        let mut transport = MockTransport::new();
        transport.expect_execute().times(1).returning(|_| {
            Ok(TransportResponse {
                status: StatusCode::NOT_FOUND,
                headers: HeaderMap::new(),
                body: body_from(r#"{"error":"DiskNotFoundError"}"#),
            })
        });
        let poller = OperationPoller::new(Arc::new(transport));

        let err = poller
            .wait_until_done(&link(HttpMethod::Get), NoWait)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
    }

    #[tokio::test]
    async fn test_wait_error_stops_polling() {
        let (transport, calls) = scripted(&["in-progress"]);
        let poller = OperationPoller::new(transport);

        let err = poller
            .wait_until_done(&link(HttpMethod::Get), || async {
                Err(Error::DeadlineExceeded(Duration::from_secs(1)))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_wait() {
        let (transport, calls) = scripted(&["in-progress"]);
        let poller = OperationPoller::new(transport);
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel();
        });

        let wait = CancellableWait::new(FixedDelay(Duration::from_secs(3600)), token);
        let err = poller
            .wait_until_done(&link(HttpMethod::Get), wait)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_total_wait() {
        let (transport, calls) = scripted(&["in-progress"]);
        let poller = OperationPoller::new(transport);

        let wait = Deadline::new(FixedDelay(Duration::from_secs(1)), Duration::from_millis(3500));
        let err = poller
            .wait_until_done(&link(HttpMethod::Get), wait)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_clock_starts_on_first_wait() {
        let (transport, calls) = scripted(&["in-progress", "success"]);
        let poller = OperationPoller::new(transport);

        let wait = Deadline::new(FixedDelay(Duration::from_secs(1)), Duration::from_secs(2));
        tokio::time::sleep(Duration::from_secs(10)).await;

        let status = poller
            .wait_until_done(&link(HttpMethod::Get), wait)
            .await
            .unwrap();
        assert!(status.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_exponential_backoff_caps() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(backoff.advance(), Duration::from_millis(100));
        assert_eq!(backoff.advance(), Duration::from_millis(200));
        assert_eq!(backoff.advance(), Duration::from_millis(350));
        assert_eq!(backoff.advance(), Duration::from_millis(350));
    }
}
