use std::{fmt, sync::Arc, time::Duration};

use parking_lot::RwLock;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::{
    decode::decode_body,
    error::ErrorNormalizer,
    interceptor::{ErrorOutcome, InterceptorPipeline},
    resolver::ConfigResolver,
    transport::{Outgoing, RetryingTransport, TransportFailure},
    ApiError, ClientConfig, ClientSettings, ErrorCause, NormalizedError, PendingCall, RequestBody,
    ResponseBody, Result,
};

/// Joins a call URL onto the instance base URL.
///
/// URLs carrying a scheme (`https://...`) pass through untouched; relative
/// ones are joined with exactly one `/`.
pub fn resolve_url(base_url: &str, url: &str) -> String {
    if has_scheme(url) {
        return url.to_owned();
    }
    let path = url.trim_start_matches('/');
    let base = base_url.trim_end_matches('/');
    if path.is_empty() {
        base.to_owned()
    } else {
        format!("{base}/{path}")
    }
}

fn has_scheme(url: &str) -> bool {
    let Some((scheme, _)) = url.split_once("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|first| first.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Configuration applied to an instance, resolved once per `configure`.
struct ClientState {
    settings: ClientSettings,
    base_url: String,
    headers: HeaderMap,
    timeout: Duration,
    transport: RetryingTransport,
}

struct ClientInner {
    name: String,
    pipeline: Arc<InterceptorPipeline>,
    resolver: Arc<ConfigResolver>,
    errors: ErrorNormalizer,
    state: RwLock<Option<Arc<ClientState>>>,
}

/// Named HTTP client instance.
///
/// Cloning is cheap and every clone refers to the same instance, so a
/// reconfiguration is visible through all of them. Requests already in
/// flight finish with the configuration they started with.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        let mut debug = f.debug_struct("ApiClient");
        debug.field("name", &self.inner.name);
        match state.as_deref() {
            Some(state) => {
                let headers: Vec<(&str, &str)> = state
                    .headers
                    .iter()
                    .map(|(name, value)| {
                        let shown = if *name == header::AUTHORIZATION {
                            "<redacted>"
                        } else {
                            value.to_str().unwrap_or("<binary>")
                        };
                        (name.as_str(), shown)
                    })
                    .collect();
                debug
                    .field("base_url", &state.base_url)
                    .field("timeout", &state.timeout)
                    .field("headers", &headers)
                    .field("retry", &state.transport.policy())
            }
            None => debug.field("configured", &false),
        };
        debug.finish()
    }
}

impl ApiClient {
    /// Creates an unconfigured instance with its own interceptor pipeline
    /// and resolver. Instances created through a
    /// [`ClientRegistry`](crate::ClientRegistry) share the registry's.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_shared(
            name,
            Arc::new(InterceptorPipeline::new()),
            Arc::new(ConfigResolver::new()),
        )
    }

    pub(crate) fn with_shared(
        name: impl Into<String>,
        pipeline: Arc<InterceptorPipeline>,
        resolver: Arc<ConfigResolver>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                name: name.into(),
                pipeline,
                resolver,
                errors: ErrorNormalizer::new(),
                state: RwLock::new(None),
            }),
        }
    }

    /// Applies `config` in place.
    ///
    /// Returns `Ok(false)` without side effects when the normalized
    /// settings equal the ones already applied.
    pub fn configure(&self, config: &ClientConfig) -> Result<bool> {
        let settings = config.settings.normalized();
        if self
            .state()
            .is_some_and(|state| state.settings == settings)
        {
            tracing::debug!(client = %self.inner.name, "configuration unchanged");
            return Ok(false);
        }

        let base_url = self.inner.resolver.compose_base_url(&config.settings)?;
        let headers = default_headers(&settings)?;
        let transport = RetryingTransport::new(&settings)?;
        self.inner.pipeline.register(&config.interceptors);

        tracing::debug!(client = %self.inner.name, base_url = %base_url, "client configured");
        let state = ClientState {
            timeout: Duration::from_millis(settings.timeout_ms),
            settings,
            base_url,
            headers,
            transport,
        };
        *self.inner.state.write() = Some(Arc::new(state));
        Ok(true)
    }

    /// Sends `call` through the interceptor pipeline and the retrying
    /// transport, returning the parsed body.
    ///
    /// Failures are normalized, logged, and passed to the error hooks; an
    /// error hook may recover the call into a successful body.
    pub async fn request(&self, call: PendingCall) -> Result<ResponseBody> {
        let state = self.state().ok_or_else(|| ApiError::NotConfigured {
            name: self.inner.name.clone(),
        })?;

        let call = merge_defaults(&state, call);
        let call = self.inner.pipeline.apply_request(call).await;

        let err = match self.dispatch(&state, call).await {
            Ok(body) => return Ok(body),
            Err(err) => err,
        };
        self.inner.resolver.log_error(&err);
        match self.inner.pipeline.apply_error(err).await {
            ErrorOutcome::Recover(body) => Ok(body),
            ErrorOutcome::Reject(err) => Err(ApiError::Request(Box::new(err))),
        }
    }

    /// Sends a `GET` to `url`.
    pub async fn get(&self, url: impl Into<String>) -> Result<ResponseBody> {
        self.request(PendingCall::get(url)).await
    }

    /// Sends a `DELETE` to `url`.
    pub async fn delete(&self, url: impl Into<String>) -> Result<ResponseBody> {
        self.request(PendingCall::delete(url)).await
    }

    /// Sends a `POST` with `data` as the body. Never retried.
    pub async fn post(
        &self,
        url: impl Into<String>,
        data: impl Into<RequestBody>,
    ) -> Result<ResponseBody> {
        self.request(PendingCall::post(url).with_data(data)).await
    }

    /// Sends a `PUT` with `data` as the body.
    pub async fn put(
        &self,
        url: impl Into<String>,
        data: impl Into<RequestBody>,
    ) -> Result<ResponseBody> {
        self.request(PendingCall::put(url).with_data(data)).await
    }

    /// Sends a `PATCH` with `data` as the body. Never retried.
    pub async fn patch(
        &self,
        url: impl Into<String>,
        data: impl Into<RequestBody>,
    ) -> Result<ResponseBody> {
        self.request(PendingCall::patch(url).with_data(data)).await
    }

    async fn dispatch(
        &self,
        state: &ClientState,
        call: PendingCall,
    ) -> std::result::Result<ResponseBody, NormalizedError> {
        let method = call.method.clone();
        let url = resolve_url(&state.base_url, &call.url);
        let normalize = |cause: ErrorCause| self.inner.errors.normalize_cause(cause, &method, &url);

        let outgoing = build_outgoing(state, call, &url).map_err(normalize)?;
        match state.transport.execute(&outgoing).await {
            Ok(response) => {
                let response = self.inner.pipeline.apply_success(response).await;
                decode_body(&response).map_err(normalize)
            }
            Err(TransportFailure::Status(response)) => Err(self
                .inner
                .errors
                .normalize_response(&response, &method, &url)),
            Err(TransportFailure::Cause(cause)) => Err(normalize(cause)),
        }
    }

    /// Hands a finished-with error back for reuse by later failures.
    /// Returns `false` when the error pool is full.
    pub fn recycle_error(&self, err: NormalizedError) -> bool {
        self.inner.errors.recycle(err)
    }

    /// Name this instance was created with.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether `configure` has succeeded at least once.
    pub fn is_configured(&self) -> bool {
        self.inner.state.read().is_some()
    }

    /// Composed base URL, once configured.
    pub fn base_url(&self) -> Option<String> {
        self.state().map(|state| state.base_url.clone())
    }

    /// Normalized settings currently applied.
    pub fn settings(&self) -> Option<ClientSettings> {
        self.state().map(|state| state.settings.clone())
    }

    /// Idle cancellation tokens in the transport pool.
    pub fn idle_tokens(&self) -> usize {
        self.state()
            .map_or(0, |state| state.transport.idle_tokens())
    }

    /// Idle error values in the error pool.
    pub fn idle_errors(&self) -> usize {
        self.inner.errors.idle()
    }

    /// Interceptor pipeline this instance runs.
    pub fn pipeline(&self) -> &Arc<InterceptorPipeline> {
        &self.inner.pipeline
    }

    /// Whether both handles refer to the same instance.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    fn state(&self) -> Option<Arc<ClientState>> {
        self.inner.state.read().clone()
    }
}

fn default_headers(settings: &ClientSettings) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
    for (name, value) in &settings.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| ApiError::Config(format!("invalid header name '{name}': {err}")))?;
        let value = HeaderValue::from_str(value).map_err(|err| {
            ApiError::Config(format!("invalid value for header '{name}': {err}"))
        })?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Lays call-level overrides over the instance defaults.
fn merge_defaults(state: &ClientState, mut call: PendingCall) -> PendingCall {
    let mut headers = state.headers.clone();
    for name in call.headers.keys() {
        headers.remove(name);
        for value in call.headers.get_all(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    call.headers = headers;
    call.timeout = Some(call.timeout.unwrap_or(state.timeout));
    call.url = resolve_url(&state.base_url, &call.url);
    call
}

fn build_outgoing(
    state: &ClientState,
    call: PendingCall,
    url: &str,
) -> std::result::Result<Outgoing, ErrorCause> {
    let mut parsed = Url::parse(url)
        .map_err(|err| ErrorCause::InvalidRequest(format!("invalid URL '{url}': {err}")))?;
    if !call.params.is_empty() {
        parsed.query_pairs_mut().extend_pairs(call.params.iter());
    }
    let body = call
        .data
        .as_ref()
        .map(RequestBody::to_payload)
        .transpose()
        .map_err(|err| ErrorCause::InvalidRequest(format!("cannot encode body: {err}")))?;

    Ok(Outgoing {
        method: call.method,
        url: parsed,
        headers: call.headers,
        body,
        timeout: call.timeout.unwrap_or(state.timeout),
    })
}

#[cfg(test)]
mod tests {
    use super::{has_scheme, resolve_url, ApiClient};
    use crate::{ApiError, ClientConfig, ClientSettings, PendingCall};

    #[test]
    fn absolute_urls_pass_through() {
        assert_eq!(
            resolve_url("https://hr.example.com/api", "https://files.example.com/a?b=1"),
            "https://files.example.com/a?b=1"
        );
    }

    #[test]
    fn relative_urls_join_with_one_slash() {
        let base = "https://hr.example.com/api";
        assert_eq!(resolve_url(base, "leaves"), "https://hr.example.com/api/leaves");
        assert_eq!(resolve_url(base, "/leaves"), "https://hr.example.com/api/leaves");
        assert_eq!(
            resolve_url("https://hr.example.com/api/", "//leaves"),
            "https://hr.example.com/api/leaves"
        );
        assert_eq!(resolve_url(base, ""), base);
    }

    #[test]
    fn scheme_detection() {
        assert!(has_scheme("http://x"));
        assert!(has_scheme("git+ssh://x"));
        assert!(!has_scheme("/path://odd"));
        assert!(!has_scheme("leaves"));
        assert!(!has_scheme("1http://x"));
    }

    #[tokio::test]
    async fn request_before_configure_is_fatal() {
        let client = ApiClient::new("hr");
        let err = client
            .request(PendingCall::get("/leaves"))
            .await
            .expect_err("must refuse");
        assert!(matches!(err, ApiError::NotConfigured { ref name } if name == "hr"));
    }

    #[test]
    fn configure_is_noop_for_equal_settings() {
        let client = ApiClient::new("hr");
        let config = ClientConfig::new("https://hr.example.com").with(|s| s.with_api_version(1));
        assert!(client.configure(&config).expect("must configure"));
        assert!(!client.configure(&config).expect("must configure"));
        assert_eq!(client.base_url().as_deref(), Some("https://hr.example.com/v1"));

        let changed = config.clone().with(|s| s.with_api_version(2));
        assert!(client.configure(&changed).expect("must reconfigure"));
        assert_eq!(client.base_url().as_deref(), Some("https://hr.example.com/v2"));
    }

    #[test]
    fn invalid_header_is_config_error() {
        let client = ApiClient::new("hr");
        let config = ClientConfig::from_settings(
            ClientSettings::new("https://x").with_header("bad header", "v"),
        );
        let err = client.configure(&config).expect_err("must fail");
        assert!(matches!(err, ApiError::Config(_)));
        assert!(!client.is_configured());
    }

    #[test]
    fn debug_redacts_authorization_value() {
        let client = ApiClient::new("hr");
        client
            .configure(&ClientConfig::from_settings(
                ClientSettings::new("https://x").with_header("Authorization", "Bearer secret-token"),
            ))
            .expect("must configure");
        let debug = format!("{client:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret-token"));
    }
}
