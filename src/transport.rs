use std::time::Duration;

use reqwest::{header::HeaderMap, Method, StatusCode};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    pool::{ResourcePool, TOKEN_POOL_CAPACITY},
    ApiError, ClientSettings, ErrorCause, HttpResponse,
};

/// Methods that are safe to send more than once.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE
    )
}

/// Statuses worth another attempt: no response (0), 429 and any 5xx.
pub fn is_retryable_status(status: u16) -> bool {
    status == 0 || status == StatusCode::TOO_MANY_REQUESTS.as_u16() || (500..=599).contains(&status)
}

/// `min(2^attempt * base, max)`, saturating instead of overflowing.
pub fn backoff_delay(attempt: usize, base: Duration, max: Duration) -> Duration {
    let exp = attempt.min(31) as u32;
    base.checked_mul(1u32 << exp).unwrap_or(max).min(max)
}

/// Attempt budget and backoff curve of one transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts for idempotent methods; `0` behaves like `1`.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            max_attempts: settings.max_retries,
            base_delay: Duration::from_millis(settings.retry_backoff_ms),
            max_delay: Duration::from_millis(settings.max_backoff_ms),
        }
    }

    /// Delay slept after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: usize) -> Duration {
        backoff_delay(attempt, self.base_delay, self.max_delay)
    }
}

/// Fully resolved request handed to the transport.
#[derive(Debug)]
pub(crate) struct Outgoing {
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Option<String>,
    pub(crate) timeout: Duration,
}

/// Terminal transport failure: either an HTTP response with a non-success
/// status, or no usable response at all.
#[derive(Debug)]
pub(crate) enum TransportFailure {
    Status(HttpResponse),
    Cause(ErrorCause),
}

/// Cancellation token borrowed from the pool for one attempt.
///
/// Goes back to the pool on drop unless it was cancelled, including when the
/// attempt future is dropped mid-flight.
struct TokenLease<'a> {
    pool: &'a ResourcePool<CancellationToken>,
    token: Option<CancellationToken>,
}

impl<'a> TokenLease<'a> {
    fn acquire(pool: &'a ResourcePool<CancellationToken>) -> Self {
        Self {
            pool,
            token: Some(pool.acquire_or_else(CancellationToken::new)),
        }
    }

    fn cancel(&self) {
        if let Some(token) = &self.token {
            token.cancel();
        }
    }
}

impl Drop for TokenLease<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            if !token.is_cancelled() {
                self.pool.release(token);
            }
        }
    }
}

/// Executes one logical call with per-attempt timeout and idempotency-aware
/// retry.
pub(crate) struct RetryingTransport {
    http: reqwest::Client,
    policy: RetryPolicy,
    tokens: ResourcePool<CancellationToken>,
}

impl RetryingTransport {
    pub(crate) fn new(settings: &ClientSettings) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .cookie_store(settings.with_credentials)
            .build()
            .map_err(|err| ApiError::Config(format!("cannot build HTTP client: {err}")))?;
        Ok(Self {
            http,
            policy: RetryPolicy::from_settings(settings),
            tokens: ResourcePool::new(TOKEN_POOL_CAPACITY, |_| {}),
        })
    }

    pub(crate) fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub(crate) fn idle_tokens(&self) -> usize {
        self.tokens.len()
    }

    pub(crate) async fn execute(&self, request: &Outgoing) -> Result<HttpResponse, TransportFailure> {
        let idempotent = is_idempotent(&request.method);
        let mut attempt = 1usize;
        loop {
            let outcome = self.attempt(request).await;
            let retryable = match &outcome {
                Ok(response) if response.status.is_success() => false,
                Ok(response) => is_retryable_status(response.status.as_u16()),
                Err(_) => true,
            };

            if retryable && idempotent && attempt < self.policy.max_attempts {
                let delay = self.policy.delay_after(attempt);
                tracing::debug!(
                    method = %request.method,
                    url = %request.url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying request"
                );
                sleep(delay).await;
                attempt += 1;
                continue;
            }

            return match outcome {
                Ok(response) if response.status.is_success() => Ok(response),
                Ok(response) => Err(TransportFailure::Status(response)),
                Err(cause) => Err(TransportFailure::Cause(cause)),
            };
        }
    }

    /// One network attempt raced against its timeout.
    async fn attempt(&self, request: &Outgoing) -> Result<HttpResponse, ErrorCause> {
        let lease = TokenLease::acquire(&self.tokens);
        tokio::select! {
            result = self.send(request) => result,
            () = sleep(request.timeout) => {
                lease.cancel();
                Err(ErrorCause::Timeout(request.timeout))
            }
        }
    }

    async fn send(&self, request: &Outgoing) -> Result<HttpResponse, ErrorCause> {
        let mut builder = self
            .http
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(ErrorCause::Transport)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(ErrorCause::Transport)?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
