use std::{
    fmt,
    time::{Duration, SystemTime},
};

use reqwest::{Method, StatusCode};
use serde_json::Value as JsonValue;

use crate::{
    decode::decode_error_payload,
    pool::{ResourcePool, ERROR_POOL_CAPACITY},
    HttpResponse,
};

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Invalid or incomplete instance configuration.
    #[error("configuration error: {0}")]
    Config(String),
    /// `request` was called on an instance that was never configured.
    #[error("client '{name}' must be configured before use")]
    NotConfigured { name: String },
    /// Registry lookup or reset for a name that is not registered.
    #[error("{}", not_initialized_message(.name))]
    NotInitialized { name: Option<String> },
    /// The request failed and no error interceptor recovered it.
    #[error(transparent)]
    Request(Box<NormalizedError>),
}

fn not_initialized_message(name: &Option<String>) -> String {
    match name {
        Some(name) => format!("client '{name}' is not initialized"),
        None => "no client is initialized".to_owned(),
    }
}

impl ApiError {
    /// Returns the normalized request failure, if this is one.
    pub fn as_request(&self) -> Option<&NormalizedError> {
        match self {
            Self::Request(err) => Some(err),
            _ => None,
        }
    }

    /// Consumes the error, returning the normalized request failure if any.
    pub fn into_request(self) -> Option<NormalizedError> {
        match self {
            Self::Request(err) => Some(*err),
            _ => None,
        }
    }
}

impl From<NormalizedError> for ApiError {
    fn from(err: NormalizedError) -> Self {
        Self::Request(Box::new(err))
    }
}

/// Failure class derived from the HTTP status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// No response at all: connectivity failure or timeout.
    Network,
    /// 4xx.
    Client,
    /// 5xx.
    Server,
    Unknown,
}

impl ErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Client => "client",
            Self::Server => "server",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Originating failure behind a [`NormalizedError`].
#[derive(Debug, thiserror::Error)]
pub enum ErrorCause {
    /// The per-attempt timer fired before a response arrived.
    #[error("request timed out after {} ms", .0.as_millis())]
    Timeout(Duration),
    /// Network or request execution error from `reqwest`.
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),
    /// Non-success HTTP status.
    #[error("request failed with status code {0}")]
    Status(u16),
    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
    /// The call could not be turned into an HTTP request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// An error interceptor failed without producing an error value.
    #[error("unknown error: {0}")]
    Hook(String),
}

/// Uniform failure value handed to error interceptors and callers.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct NormalizedError {
    status: Option<u16>,
    status_text: String,
    data: JsonValue,
    message: String,
    url: Option<String>,
    method: Option<Method>,
    #[source]
    cause: Option<ErrorCause>,
    created_at: SystemTime,
}

impl NormalizedError {
    /// Bare error with only a message; no status means `network`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            status_text: String::new(),
            data: JsonValue::Null,
            message: message.into(),
            url: None,
            method: None,
            cause: None,
            created_at: SystemTime::now(),
        }
    }

    /// Sets the status and its canonical reason text.
    pub fn with_status(mut self, status: u16) -> Self {
        self.set_status(status);
        self
    }

    /// Replaces the response payload.
    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = data;
        self
    }

    pub fn with_cause(mut self, cause: ErrorCause) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Records which call failed.
    pub fn with_request(mut self, method: Method, url: impl Into<String>) -> Self {
        self.method = Some(method);
        self.url = Some(url.into());
        self
    }

    fn set_status(&mut self, status: u16) {
        self.status = Some(status);
        self.status_text.clear();
        if let Some(reason) = StatusCode::from_u16(status)
            .ok()
            .and_then(|code| code.canonical_reason())
        {
            self.status_text.push_str(reason);
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// Response payload, `Null` when there was no response.
    pub fn data(&self) -> &JsonValue {
        &self.data
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_ref()
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Classifies by status: none or `0` is `network`, then `4xx`/`5xx`.
    pub fn error_type(&self) -> ErrorType {
        match self.status {
            None | Some(0) => ErrorType::Network,
            Some(400..=499) => ErrorType::Client,
            Some(500..=599) => ErrorType::Server,
            Some(_) => ErrorType::Unknown,
        }
    }

    pub fn has_status(&self, status: u16) -> bool {
        self.status == Some(status)
    }

    /// Network failures, server errors and 429 may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self.error_type(), ErrorType::Network | ErrorType::Server)
            || self.has_status(StatusCode::TOO_MANY_REQUESTS.as_u16())
    }

    /// Whether the attempt timer fired.
    pub fn is_timeout(&self) -> bool {
        matches!(self.cause, Some(ErrorCause::Timeout(_)))
    }

    fn clear(&mut self) {
        self.status = None;
        self.status_text.clear();
        self.data = JsonValue::Null;
        self.message.clear();
        self.url = None;
        self.method = None;
        self.cause = None;
    }
}

/// Turns transport failures and failed responses into [`NormalizedError`]s,
/// drawing the allocations from a bounded pool.
pub(crate) struct ErrorNormalizer {
    pool: ResourcePool<NormalizedError>,
}

impl ErrorNormalizer {
    pub(crate) fn new() -> Self {
        Self {
            pool: ResourcePool::new(ERROR_POOL_CAPACITY, NormalizedError::clear),
        }
    }

    fn fresh(&self, method: &Method, url: &str) -> NormalizedError {
        let mut err = self.pool.acquire_or_else(|| NormalizedError::new(String::new()));
        err.created_at = SystemTime::now();
        err.method = Some(method.clone());
        err.url = Some(url.to_owned());
        err
    }

    pub(crate) fn normalize_cause(
        &self,
        cause: ErrorCause,
        method: &Method,
        url: &str,
    ) -> NormalizedError {
        let mut err = self.fresh(method, url);
        if let ErrorCause::Transport(inner) = &cause {
            if let Some(status) = inner.status() {
                err.set_status(status.as_u16());
            }
        }
        err.message = cause.to_string();
        err.cause = Some(cause);
        err
    }

    pub(crate) fn normalize_response(
        &self,
        response: &HttpResponse,
        method: &Method,
        url: &str,
    ) -> NormalizedError {
        let status = response.status.as_u16();
        let mut err = self.fresh(method, url);
        err.set_status(status);
        err.data = decode_error_payload(response);
        err.message = format!("request failed with status code {status}");
        err.cause = Some(ErrorCause::Status(status));
        err
    }

    pub(crate) fn recycle(&self, err: NormalizedError) -> bool {
        self.pool.release(err)
    }

    pub(crate) fn idle(&self) -> usize {
        self.pool.len()
    }
}
