use std::{collections::BTreeMap, fmt};

use serde::Deserialize;

use crate::{
    interceptor::{ErrorHook, RequestHook, SuccessHook},
    ApiError,
};

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_RETRIES: usize = 3;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 5_000;

/// API version segment, appended as `/v{version}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
pub enum ApiVersion {
    Number(u32),
    Label(String),
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Label(value) => f.write_str(value),
        }
    }
}

impl From<u32> for ApiVersion {
    fn from(value: u32) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for ApiVersion {
    fn from(value: &str) -> Self {
        Self::Label(value.to_owned())
    }
}

impl From<String> for ApiVersion {
    fn from(value: String) -> Self {
        Self::Label(value)
    }
}

/// Value-typed part of an instance configuration.
///
/// Two settings that compare equal after [`ClientSettings::normalized`]
/// describe the same instance, so re-registering with them is a no-op.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSettings {
    #[serde(rename = "baseURL")]
    pub base_url: String,
    #[serde(default)]
    pub api_prefix: Option<String>,
    #[serde(default)]
    pub api_version: Option<ApiVersion>,
    /// Default per-call timeout in milliseconds.
    #[serde(default = "default_timeout_ms", rename = "timeout")]
    pub timeout_ms: u64,
    /// Merged over the JSON `Content-Type`/`Accept` defaults.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Keeps a cookie store so session credentials persist across calls.
    #[serde(default)]
    pub with_credentials: bool,
    /// Total attempt ceiling for idempotent methods.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Base delay of the exponential backoff.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Cap applied to every backoff delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_max_retries() -> usize {
    DEFAULT_MAX_RETRIES
}

fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}

fn default_max_backoff_ms() -> u64 {
    DEFAULT_MAX_BACKOFF_MS
}

impl ClientSettings {
    /// Settings for `base_url` with every other option at its default.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_prefix: None,
            api_version: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            headers: BTreeMap::new(),
            with_credentials: false,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
        }
    }

    /// Reads settings from `{PREFIX}_*` environment variables.
    ///
    /// Reads:
    /// - `{PREFIX}_BASE_URL` (required)
    /// - `{PREFIX}_API_PREFIX`
    /// - `{PREFIX}_API_VERSION`; numeric values become [`ApiVersion::Number`]
    /// - `{PREFIX}_TIMEOUT_MS`
    /// - `{PREFIX}_MAX_RETRIES`
    pub fn from_env(prefix: &str) -> Result<Self, ApiError> {
        let var = |suffix: &str| {
            std::env::var(format!("{prefix}_{suffix}"))
                .ok()
                .filter(|value| !value.trim().is_empty())
        };

        let base_url = var("BASE_URL").ok_or_else(|| {
            ApiError::Config(format!("missing {prefix}_BASE_URL environment variable"))
        })?;
        let mut settings = Self::new(base_url);

        settings.api_prefix = var("API_PREFIX");
        settings.api_version = var("API_VERSION").map(|value| match value.trim().parse::<u32>() {
            Ok(number) => ApiVersion::Number(number),
            Err(_) => ApiVersion::Label(value),
        });
        if let Some(value) = var("TIMEOUT_MS") {
            settings.timeout_ms = value.trim().parse().map_err(|err| {
                ApiError::Config(format!("invalid {prefix}_TIMEOUT_MS '{value}': {err}"))
            })?;
        }
        if let Some(value) = var("MAX_RETRIES") {
            settings.max_retries = value.trim().parse().map_err(|err| {
                ApiError::Config(format!("invalid {prefix}_MAX_RETRIES '{value}': {err}"))
            })?;
        }
        Ok(settings)
    }

    /// Path segment appended to the base URL; wins over the version.
    pub fn with_api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.api_prefix = Some(prefix.into());
        self
    }

    /// Appends `/v{version}` when no prefix is set.
    pub fn with_api_version(mut self, version: impl Into<ApiVersion>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Default per-attempt timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Adds a default header, replacing any earlier value for `name`.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Keeps cookies set by the server for later calls.
    pub fn with_credentials(mut self, enabled: bool) -> Self {
        self.with_credentials = enabled;
        self
    }

    /// Total attempt ceiling for idempotent methods.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Base and maximum backoff delay, in milliseconds.
    pub fn with_backoff(mut self, retry_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        self.retry_backoff_ms = retry_backoff_ms;
        self.max_backoff_ms = max_backoff_ms;
        self
    }

    /// Canonical form used for change detection: surrounding whitespace is
    /// dropped and blank optional strings count as absent.
    pub fn normalized(&self) -> Self {
        let blank_to_none = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_owned)
        };
        Self {
            base_url: self.base_url.trim().to_owned(),
            api_prefix: blank_to_none(&self.api_prefix),
            ..self.clone()
        }
    }
}

/// Hooks contributed by one instance configuration.
///
/// They are registered into the registry-wide pipeline, so every instance
/// of the same registry runs them.
#[derive(Clone, Default)]
pub struct Interceptors {
    pub request: Vec<RequestHook>,
    pub success: Vec<SuccessHook>,
    pub error: Vec<ErrorHook>,
}

impl Interceptors {
    /// Whether no hook of any kind is set.
    pub fn is_empty(&self) -> bool {
        self.request.is_empty() && self.success.is_empty() && self.error.is_empty()
    }
}

impl fmt::Debug for Interceptors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptors")
            .field("request", &self.request.len())
            .field("success", &self.success.len())
            .field("error", &self.error.len())
            .finish()
    }
}

/// Full configuration of a named instance.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub settings: ClientSettings,
    pub interceptors: Interceptors,
}

impl ClientConfig {
    /// Default settings for `base_url`, no interceptors.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::from_settings(ClientSettings::new(base_url))
    }

    /// Configuration without interceptors.
    pub fn from_settings(settings: ClientSettings) -> Self {
        Self {
            settings,
            interceptors: Interceptors::default(),
        }
    }

    /// Applies a settings transform, as in `config.with(|s| s.with_max_retries(1))`.
    pub fn with(mut self, update: impl FnOnce(ClientSettings) -> ClientSettings) -> Self {
        self.settings = update(self.settings);
        self
    }

    /// Appends a request hook.
    pub fn with_request_hook(mut self, hook: RequestHook) -> Self {
        self.interceptors.request.push(hook);
        self
    }

    /// Appends a response hook.
    pub fn with_success_hook(mut self, hook: SuccessHook) -> Self {
        self.interceptors.success.push(hook);
        self
    }

    /// Appends an error hook.
    pub fn with_error_hook(mut self, hook: ErrorHook) -> Self {
        self.interceptors.error.push(hook);
        self
    }
}

impl From<ClientSettings> for ClientConfig {
    fn from(settings: ClientSettings) -> Self {
        Self::from_settings(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::{ApiVersion, ClientSettings, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_MS};

    #[test]
    fn defaults_match_documented_values() {
        let settings = ClientSettings::new("https://api.example.com");
        assert_eq!(settings.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(settings.max_retries, DEFAULT_MAX_RETRIES);
        assert!(!settings.with_credentials);
    }

    #[test]
    fn deserializes_camel_case_options() {
        let settings: ClientSettings = serde_json::from_str(
            r#"{
                "baseURL": "https://api.example.com",
                "apiVersion": 2,
                "timeout": 2500,
                "withCredentials": true,
                "headers": { "X-Tenant": "acme" }
            }"#,
        )
        .expect("must deserialize");

        assert_eq!(settings.api_version, Some(ApiVersion::Number(2)));
        assert_eq!(settings.timeout_ms, 2500);
        assert!(settings.with_credentials);
        assert_eq!(settings.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(settings.headers.get("X-Tenant").map(String::as_str), Some("acme"));
    }

    #[test]
    fn label_version_deserializes() {
        let settings: ClientSettings =
            serde_json::from_str(r#"{ "baseURL": "https://x", "apiVersion": "beta" }"#)
                .expect("must deserialize");
        assert_eq!(settings.api_version, Some(ApiVersion::Label("beta".to_owned())));
    }

    #[test]
    fn normalized_ignores_whitespace_and_blank_prefix() {
        let a = ClientSettings::new("  https://api.example.com ").with_api_prefix("  ");
        let b = ClientSettings::new("https://api.example.com");
        assert_eq!(a.normalized(), b.normalized());
    }

    #[test]
    fn normalized_detects_real_changes() {
        let a = ClientSettings::new("https://api.example.com");
        let b = a.clone().with_max_retries(5);
        assert_ne!(a.normalized(), b.normalized());
    }

    #[test]
    fn from_env_reads_prefixed_variables() {
        std::env::set_var("LDH_OPTIONS_TEST_BASE_URL", "https://hr.example.com");
        std::env::set_var("LDH_OPTIONS_TEST_API_VERSION", "3");
        std::env::set_var("LDH_OPTIONS_TEST_TIMEOUT_MS", "2500");

        let settings = ClientSettings::from_env("LDH_OPTIONS_TEST").expect("must read env");
        assert_eq!(settings.base_url, "https://hr.example.com");
        assert_eq!(settings.api_version, Some(ApiVersion::Number(3)));
        assert_eq!(settings.timeout_ms, 2500);
        assert_eq!(settings.max_retries, DEFAULT_MAX_RETRIES);

        std::env::set_var("LDH_OPTIONS_TEST_MAX_RETRIES", "many");
        assert!(ClientSettings::from_env("LDH_OPTIONS_TEST").is_err());
        assert!(ClientSettings::from_env("LDH_OPTIONS_MISSING").is_err());
    }
}
