//! `leavedesk-http` is the resilient HTTP client core of the Leavedesk
//! dashboard.
//!
//! - [`ClientRegistry`] keeps named [`ApiClient`] instances and reconfigures
//!   them in place only when their settings actually change.
//! - Every instance of a registry shares one [`InterceptorPipeline`] of
//!   request, response and error hooks.
//! - Idempotent calls are retried with capped exponential backoff; every
//!   failure surfaces as a [`NormalizedError`].
//!
//! ```no_run
//! use leavedesk_http::{ClientConfig, ClientRegistry, ClientSettings};
//!
//! # async fn demo() -> leavedesk_http::Result<()> {
//! let registry = ClientRegistry::new();
//! let hr = registry.init(
//!     "hr",
//!     &ClientConfig::from_settings(
//!         ClientSettings::new("https://hr.example.com").with_api_version(2),
//!     ),
//! )?;
//! let leaves = hr.get("/leaves").await?;
//! # let _ = leaves;
//! # Ok(())
//! # }
//! ```

mod cache;
mod client;
mod decode;
mod error;
mod interceptor;
mod options;
mod params;
mod pool;
mod registry;
mod resolver;
mod transport;
mod types;
mod value;

pub use client::{resolve_url, ApiClient};
pub use error::{ApiError, ErrorCause, ErrorType, NormalizedError};
pub use interceptor::{
    error_hook, request_hook, success_hook, ErrorFn, ErrorHook, ErrorOutcome, HookError,
    InterceptorPipeline, RequestFn, RequestHook, SuccessFn, SuccessHook,
};
pub use options::{
    ApiVersion, ClientConfig, ClientSettings, Interceptors, DEFAULT_MAX_BACKOFF_MS,
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BACKOFF_MS, DEFAULT_TIMEOUT_MS,
};
pub use params::Params;
pub use pool::{ResourcePool, ERROR_POOL_CAPACITY, TOKEN_POOL_CAPACITY};
pub use registry::ClientRegistry;
pub use resolver::{
    ConfigResolver, ErrorRecord, ERROR_TRACKER_CAPACITY, MAX_REPEATED_ERROR_LOGS,
    URL_CACHE_CAPACITY,
};
pub use transport::{backoff_delay, is_idempotent, is_retryable_status, RetryPolicy};
pub use types::{HttpResponse, PendingCall, ResponseBody};
pub use value::RequestBody;

pub type Result<T> = std::result::Result<T, ApiError>;
