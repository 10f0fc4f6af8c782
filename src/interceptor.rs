//! Shared request/response/error interceptor pipeline.
//!
//! Hooks run in registration order, one call at a time per request. A
//! request or success hook that fails (returns `Err` or panics) is skipped
//! and the value accumulated so far is carried forward. Error hooks may
//! recover a failed call into a successful body.

use std::{
    future::Future,
    panic::AssertUnwindSafe,
    sync::Arc,
};

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;

use crate::{
    options::Interceptors, ErrorCause, HttpResponse, NormalizedError, PendingCall, ResponseBody,
};

/// Failure raised by a hook itself.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

pub type RequestFn =
    dyn Fn(PendingCall) -> BoxFuture<'static, Result<PendingCall, HookError>> + Send + Sync;
pub type SuccessFn =
    dyn Fn(HttpResponse) -> BoxFuture<'static, Result<HttpResponse, HookError>> + Send + Sync;
pub type ErrorFn =
    dyn Fn(NormalizedError) -> BoxFuture<'static, Result<ErrorOutcome, HookError>> + Send + Sync;

/// Transforms an outgoing call.
pub type RequestHook = Arc<RequestFn>;
/// Transforms a successful response before it is parsed.
pub type SuccessHook = Arc<SuccessFn>;
/// Transforms or recovers a failed call.
pub type ErrorHook = Arc<ErrorFn>;

/// Result of an error hook.
#[derive(Debug)]
pub enum ErrorOutcome {
    /// Keep failing, possibly with a rewritten error.
    Reject(NormalizedError),
    /// Stop the fold and hand this body to the caller as a success.
    Recover(ResponseBody),
}

pub fn request_hook<F, Fut>(hook: F) -> RequestHook
where
    F: Fn(PendingCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<PendingCall, HookError>> + Send + 'static,
{
    Arc::new(move |call| hook(call).boxed())
}

pub fn success_hook<F, Fut>(hook: F) -> SuccessHook
where
    F: Fn(HttpResponse) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HttpResponse, HookError>> + Send + 'static,
{
    Arc::new(move |response| hook(response).boxed())
}

pub fn error_hook<F, Fut>(hook: F) -> ErrorHook
where
    F: Fn(NormalizedError) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ErrorOutcome, HookError>> + Send + 'static,
{
    Arc::new(move |err| hook(err).boxed())
}

/// Identity-deduplicated hooks plus a lazily rebuilt ordered snapshot.
struct HookSet<F: ?Sized> {
    hooks: Vec<Arc<F>>,
    ordered: Option<Arc<[Arc<F>]>>,
}

impl<F: ?Sized> HookSet<F> {
    fn new() -> Self {
        Self {
            hooks: Vec::new(),
            ordered: None,
        }
    }

    fn insert(&mut self, hook: &Arc<F>) -> bool {
        let id = Arc::as_ptr(hook).cast::<()>();
        if self
            .hooks
            .iter()
            .any(|existing| Arc::as_ptr(existing).cast::<()>() == id)
        {
            return false;
        }
        self.hooks.push(Arc::clone(hook));
        self.ordered = None;
        true
    }

    /// `None` when empty, so callers skip the fold without allocating.
    fn ordered(&mut self) -> Option<Arc<[Arc<F>]>> {
        if self.hooks.is_empty() {
            return None;
        }
        let hooks = &self.hooks;
        Some(Arc::clone(
            self.ordered
                .get_or_insert_with(|| hooks.iter().cloned().collect()),
        ))
    }

    fn clear(&mut self) {
        self.hooks.clear();
        self.ordered = None;
    }
}

/// Registry-wide interceptor pipeline shared by every instance.
pub struct InterceptorPipeline {
    request: Mutex<HookSet<RequestFn>>,
    success: Mutex<HookSet<SuccessFn>>,
    error: Mutex<HookSet<ErrorFn>>,
}

impl Default for InterceptorPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InterceptorPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (request, success, error) = self.counts();
        f.debug_struct("InterceptorPipeline")
            .field("request", &request)
            .field("success", &success)
            .field("error", &error)
            .finish()
    }
}

impl InterceptorPipeline {
    pub fn new() -> Self {
        Self {
            request: Mutex::new(HookSet::new()),
            success: Mutex::new(HookSet::new()),
            error: Mutex::new(HookSet::new()),
        }
    }

    /// Adds every hook not already present. Registering the same `Arc`
    /// twice is a no-op.
    pub fn register(&self, interceptors: &Interceptors) {
        if interceptors.is_empty() {
            return;
        }
        let mut added = 0usize;
        {
            let mut set = self.request.lock();
            added += interceptors.request.iter().filter(|hook| set.insert(hook)).count();
        }
        {
            let mut set = self.success.lock();
            added += interceptors.success.iter().filter(|hook| set.insert(hook)).count();
        }
        {
            let mut set = self.error.lock();
            added += interceptors.error.iter().filter(|hook| set.insert(hook)).count();
        }
        tracing::debug!(added, "registered interceptors");
    }

    pub async fn apply_request(&self, call: PendingCall) -> PendingCall {
        let Some(hooks) = self.request.lock().ordered() else {
            return call;
        };
        let mut call = call;
        for (index, hook) in hooks.iter().enumerate() {
            match isolate(|| hook(call.clone())).await {
                Ok(next) => call = next,
                Err(err) => {
                    tracing::warn!(hook = index, error = %err, "request interceptor failed, skipping");
                }
            }
        }
        call
    }

    pub async fn apply_success(&self, response: HttpResponse) -> HttpResponse {
        let Some(hooks) = self.success.lock().ordered() else {
            return response;
        };
        let mut response = response;
        for (index, hook) in hooks.iter().enumerate() {
            match isolate(|| hook(response.clone())).await {
                Ok(next) => response = next,
                Err(err) => {
                    tracing::warn!(hook = index, error = %err, "response interceptor failed, skipping");
                }
            }
        }
        response
    }

    /// Folds `err` through the error hooks. The first hook that recovers
    /// ends the fold.
    pub async fn apply_error(&self, err: NormalizedError) -> ErrorOutcome {
        let Some(hooks) = self.error.lock().ordered() else {
            return ErrorOutcome::Reject(err);
        };
        let mut current = err;
        for (index, hook) in hooks.iter().enumerate() {
            let method = current.method().cloned();
            let url = current.url().map(str::to_owned);
            match isolate(|| hook(current)).await {
                Ok(ErrorOutcome::Reject(next)) => current = next,
                Ok(ErrorOutcome::Recover(body)) => return ErrorOutcome::Recover(body),
                Err(hook_err) => {
                    tracing::warn!(hook = index, error = %hook_err, "error interceptor failed");
                    let cause = ErrorCause::Hook(hook_err.to_string());
                    let mut wrapped = NormalizedError::new(cause.to_string()).with_cause(cause);
                    if let (Some(method), Some(url)) = (method, url) {
                        wrapped = wrapped.with_request(method, url);
                    }
                    current = wrapped;
                }
            }
        }
        ErrorOutcome::Reject(current)
    }

    /// Drops every hook. Affects all instances sharing this pipeline.
    pub fn reset_all(&self) {
        self.request.lock().clear();
        self.success.lock().clear();
        self.error.lock().clear();
    }

    /// Registered `(request, success, error)` hook counts.
    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.request.lock().hooks.len(),
            self.success.lock().hooks.len(),
            self.error.lock().hooks.len(),
        )
    }
}

/// Runs one hook, turning a panic into a hook failure.
async fn isolate<T>(
    invoke: impl FnOnce() -> BoxFuture<'static, Result<T, HookError>>,
) -> Result<T, HookError> {
    let future = std::panic::catch_unwind(AssertUnwindSafe(invoke))
        .map_err(|_| HookError::from("interceptor panicked"))?;
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(HookError::from("interceptor panicked")))
}
