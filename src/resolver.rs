use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::UNIX_EPOCH,
};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::{cache::BoundedCache, options::ApiVersion, ApiError, ClientSettings, NormalizedError};

pub const URL_CACHE_CAPACITY: usize = 100;
pub const ERROR_TRACKER_CAPACITY: usize = 50;
/// Occurrences of one `(url, status)` pair that are logged before the
/// pair goes quiet.
pub const MAX_REPEATED_ERROR_LOGS: u32 = 3;

type UrlKey = (String, Option<String>, Option<ApiVersion>);
type ErrorKey = (String, Option<u16>);

/// Structured failure record emitted by [`ConfigResolver::log_error`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub url: Option<String>,
    pub method: Option<String>,
    pub status: Option<u16>,
    pub payload: JsonValue,
    pub message: String,
    /// Milliseconds since the Unix epoch at which the error was created.
    pub timestamp: u64,
}

/// Composes instance base URLs and rate-limits failure logging.
#[derive(Debug)]
pub struct ConfigResolver {
    urls: Mutex<BoundedCache<UrlKey, String>>,
    errors: Mutex<BoundedCache<ErrorKey, u32>>,
    compositions: AtomicUsize,
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigResolver {
    pub fn new() -> Self {
        Self {
            urls: Mutex::new(BoundedCache::new(URL_CACHE_CAPACITY)),
            errors: Mutex::new(BoundedCache::new(ERROR_TRACKER_CAPACITY)),
            compositions: AtomicUsize::new(0),
        }
    }

    /// Builds `{baseURL}{apiPrefix}` or `{baseURL}/v{apiVersion}`.
    ///
    /// The prefix wins when both are set. Results are memoized per
    /// `(baseURL, apiPrefix, apiVersion)`.
    pub fn compose_base_url(&self, settings: &ClientSettings) -> Result<String, ApiError> {
        if settings.base_url.trim().is_empty() {
            return Err(ApiError::Config("baseURL is required".to_owned()));
        }

        let key = (
            settings.base_url.clone(),
            settings.api_prefix.clone(),
            settings.api_version.clone(),
        );
        if let Some(url) = self.urls.lock().get(&key) {
            return Ok(url.clone());
        }

        let url = compose(
            &settings.base_url,
            settings.api_prefix.as_deref(),
            settings.api_version.as_ref(),
        );
        self.compositions.fetch_add(1, Ordering::Relaxed);
        self.urls.lock().insert(key, url.clone());
        Ok(url)
    }

    /// Emits a structured record for `err` unless its `(url, status)` pair
    /// has already been logged [`MAX_REPEATED_ERROR_LOGS`] times. The
    /// occurrence counter advances either way.
    pub fn log_error(&self, err: &NormalizedError) -> Option<ErrorRecord> {
        let key = (err.url().unwrap_or_default().to_owned(), err.status());
        let seen = {
            let mut errors = self.errors.lock();
            match errors.get_or_insert_with(key, || 0) {
                Some(count) => {
                    let seen = *count;
                    *count = count.saturating_add(1);
                    seen
                }
                None => 0,
            }
        };
        if seen >= MAX_REPEATED_ERROR_LOGS {
            return None;
        }

        let record = ErrorRecord {
            url: err.url().map(str::to_owned),
            method: err.method().map(ToString::to_string),
            status: err.status(),
            payload: err.data().clone(),
            message: err.message().to_owned(),
            timestamp: err
                .created_at()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_millis() as u64)
                .unwrap_or_default(),
        };
        tracing::error!(
            url = record.url.as_deref().unwrap_or_default(),
            method = record.method.as_deref().unwrap_or_default(),
            status = ?record.status,
            payload = %record.payload,
            timestamp = record.timestamp,
            error_type = %err.error_type(),
            "{}",
            record.message
        );
        Some(record)
    }

    /// Number of URL compositions that missed the cache.
    pub fn compositions(&self) -> usize {
        self.compositions.load(Ordering::Relaxed)
    }

    /// Entries currently held in the URL cache.
    pub fn cached_urls(&self) -> usize {
        self.urls.lock().len()
    }

    /// Forgets cached URLs and error counters.
    pub fn clear(&self) {
        self.urls.lock().clear();
        self.errors.lock().clear();
    }
}

fn compose(base_url: &str, api_prefix: Option<&str>, api_version: Option<&ApiVersion>) -> String {
    let base = base_url.trim().trim_end_matches('/');

    if let Some(prefix) = api_prefix.map(str::trim).filter(|prefix| !prefix.is_empty()) {
        let prefix = prefix.trim_end_matches('/');
        return if prefix.is_empty() {
            base.to_owned()
        } else if prefix.starts_with('/') {
            format!("{base}{prefix}")
        } else {
            format!("{base}/{prefix}")
        };
    }

    match api_version {
        Some(version) => format!("{base}/v{version}"),
        None => base.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use reqwest::Method;
    use serde_json::json;

    use super::{ConfigResolver, ERROR_TRACKER_CAPACITY, URL_CACHE_CAPACITY};
    use crate::{ApiError, ClientSettings, NormalizedError};

    #[test]
    fn prefix_is_normalized_and_trailing_slashes_dropped() {
        let resolver = ConfigResolver::new();
        for base in [
            "https://hr.example.com",
            "https://hr.example.com/",
            "  https://hr.example.com///  ",
        ] {
            let url = resolver
                .compose_base_url(&ClientSettings::new(base).with_api_prefix("/api/"))
                .expect("must compose");
            assert_eq!(url, "https://hr.example.com/api");
        }
    }

    #[test]
    fn prefix_gets_leading_slash() {
        let resolver = ConfigResolver::new();
        let url = resolver
            .compose_base_url(&ClientSettings::new("https://x").with_api_prefix("api/internal"))
            .expect("must compose");
        assert_eq!(url, "https://x/api/internal");
    }

    #[test]
    fn prefix_takes_precedence_over_version() {
        let resolver = ConfigResolver::new();
        let url = resolver
            .compose_base_url(
                &ClientSettings::new("https://x")
                    .with_api_prefix("/api/")
                    .with_api_version(2),
            )
            .expect("must compose");
        assert_eq!(url, "https://x/api");
    }

    #[test]
    fn version_accepts_numbers_and_labels() {
        let resolver = ConfigResolver::new();
        let numeric = resolver
            .compose_base_url(&ClientSettings::new("https://x/").with_api_version(3))
            .expect("must compose");
        let label = resolver
            .compose_base_url(&ClientSettings::new("https://x").with_api_version("2-beta"))
            .expect("must compose");
        assert_eq!(numeric, "https://x/v3");
        assert_eq!(label, "https://x/v2-beta");
    }

    #[test]
    fn bare_base_url() {
        let resolver = ConfigResolver::new();
        let url = resolver
            .compose_base_url(&ClientSettings::new(" https://x/ "))
            .expect("must compose");
        assert_eq!(url, "https://x");
    }

    #[test]
    fn missing_base_url_is_config_error() {
        let resolver = ConfigResolver::new();
        let err = resolver
            .compose_base_url(&ClientSettings::new("   "))
            .expect_err("must fail");
        assert!(matches!(err, ApiError::Config(_)));
    }

    #[test]
    fn repeated_composition_hits_cache() {
        let resolver = ConfigResolver::new();
        let settings = ClientSettings::new("https://x").with_api_version(1);
        resolver.compose_base_url(&settings).expect("must compose");
        resolver.compose_base_url(&settings).expect("must compose");
        assert_eq!(resolver.compositions(), 1);
    }

    #[test]
    fn url_cache_is_bounded() {
        let resolver = ConfigResolver::new();
        for index in 0..(URL_CACHE_CAPACITY + 25) {
            resolver
                .compose_base_url(&ClientSettings::new(format!("https://host-{index}")))
                .expect("must compose");
        }
        assert_eq!(resolver.cached_urls(), URL_CACHE_CAPACITY);
    }

    fn failure(url: &str, status: u16) -> NormalizedError {
        NormalizedError::new("request failed")
            .with_status(status)
            .with_request(Method::GET, url)
            .with_data(json!({"error": "boom"}))
    }

    #[test]
    fn log_error_goes_quiet_after_three_repeats() {
        let resolver = ConfigResolver::new();
        let err = failure("https://x/leaves", 500);
        let emitted = (0..6).filter(|_| resolver.log_error(&err).is_some()).count();
        assert_eq!(emitted, 3);

        let other_status = failure("https://x/leaves", 502);
        assert!(resolver.log_error(&other_status).is_some());
    }

    #[test]
    fn log_record_carries_request_details() {
        let resolver = ConfigResolver::new();
        let record = resolver
            .log_error(&failure("https://x/leaves", 404))
            .expect("first occurrence must log");
        assert_eq!(record.url.as_deref(), Some("https://x/leaves"));
        assert_eq!(record.method.as_deref(), Some("GET"));
        assert_eq!(record.status, Some(404));
        assert_eq!(record.payload, json!({"error": "boom"}));
        assert!(record.timestamp > 0);
    }

    #[test]
    fn evicted_pairs_log_again() {
        let resolver = ConfigResolver::new();
        let err = failure("https://x/first", 500);
        for _ in 0..3 {
            resolver.log_error(&err);
        }
        assert!(resolver.log_error(&err).is_none());

        for index in 0..ERROR_TRACKER_CAPACITY {
            resolver.log_error(&failure(&format!("https://x/{index}"), 500));
        }
        assert!(resolver.log_error(&err).is_some());
    }

    #[test]
    fn clear_resets_trackers() {
        let resolver = ConfigResolver::new();
        let err = failure("https://x/a", 500);
        for _ in 0..3 {
            resolver.log_error(&err);
        }
        resolver.clear();
        assert!(resolver.log_error(&err).is_some());
        assert_eq!(resolver.cached_urls(), 0);
    }
}
