use std::time::Duration;

use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, HeaderValue, IntoHeaderName, CONTENT_TYPE},
    Method, StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::{Params, RequestBody};

/// One outgoing call, as seen by request interceptors.
///
/// `url` may be absolute or relative to the instance base URL. Unset
/// `timeout` falls back to the instance default.
#[derive(Clone, Debug)]
pub struct PendingCall {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub params: Params,
    pub data: Option<RequestBody>,
    pub timeout: Option<Duration>,
}

impl PendingCall {
    /// Call with no headers, params, body or timeout override.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            params: Params::default(),
            data: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Sets a header, overriding the instance default of the same name.
    pub fn with_header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Query parameters, appended in order.
    pub fn with_params(mut self, params: impl Into<Params>) -> Self {
        self.params = params.into();
        self
    }

    /// Request body. JSON values are serialized; strings are sent verbatim.
    pub fn with_data(mut self, data: impl Into<RequestBody>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Per-attempt timeout for this call only.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Buffered HTTP response. Cloning shares the body buffer.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    /// Whether `Content-Type` names `application/json`.
    pub fn is_json(&self) -> bool {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.to_ascii_lowercase().contains("application/json"))
    }
}

/// Parsed response body returned to callers.
#[derive(Clone, Debug, PartialEq)]
pub enum ResponseBody {
    Json(JsonValue),
    Text(String),
}

impl ResponseBody {
    /// Decodes into a typed value. Text bodies are parsed as JSON.
    pub fn json<T: DeserializeOwned>(self) -> serde_json::Result<T> {
        match self {
            Self::Json(value) => serde_json::from_value(value),
            Self::Text(text) => serde_json::from_str(&text),
        }
    }

    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    /// Text body, if the response was not JSON.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Json(_) => None,
        }
    }

    /// Lossless conversion to a JSON value; text becomes a JSON string.
    pub fn into_json_value(self) -> JsonValue {
        match self {
            Self::Json(value) => value,
            Self::Text(text) => JsonValue::String(text),
        }
    }
}
