use serde::Serialize;
use serde_json::Value as JsonValue;

/// Request payload.
///
/// JSON values are stringified on send; text (including a JSON string
/// value) goes out unchanged.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    Json(JsonValue),
    Text(String),
}

impl RequestBody {
    /// Serializes any value into a JSON body.
    pub fn json<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        serde_json::to_value(value).map(Self::Json)
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub(crate) fn to_payload(&self) -> serde_json::Result<String> {
        match self {
            Self::Json(JsonValue::String(text)) | Self::Text(text) => Ok(text.clone()),
            Self::Json(value) => serde_json::to_string(value),
        }
    }
}

impl From<JsonValue> for RequestBody {
    fn from(value: JsonValue) -> Self {
        Self::Json(value)
    }
}

impl From<String> for RequestBody {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for RequestBody {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}
