use serde_json::Value as JsonValue;

use crate::{ErrorCause, HttpResponse, ResponseBody};

/// Parses a response body: JSON when the content type says so, text
/// otherwise. An empty JSON body decodes to `null`.
pub(crate) fn decode_body(response: &HttpResponse) -> Result<ResponseBody, ErrorCause> {
    if response.is_json() {
        if response.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(ResponseBody::Json(JsonValue::Null));
        }
        return serde_json::from_slice(&response.body)
            .map(ResponseBody::Json)
            .map_err(|err| ErrorCause::Decode(format!("invalid JSON response body: {err}")));
    }

    String::from_utf8(response.body.to_vec())
        .map(ResponseBody::Text)
        .map_err(|err| ErrorCause::Decode(format!("response body is not valid UTF-8: {err}")))
}

/// Best-effort payload for an error value; never fails.
pub(crate) fn decode_error_payload(response: &HttpResponse) -> JsonValue {
    if response.body.is_empty() {
        return JsonValue::Null;
    }
    match decode_body(response) {
        Ok(body) => body.into_json_value(),
        Err(_) => JsonValue::String(String::from_utf8_lossy(&response.body).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use reqwest::{
        header::{HeaderMap, HeaderValue, CONTENT_TYPE},
        StatusCode,
    };
    use serde_json::json;

    use crate::{decode, ErrorCause, HttpResponse, ResponseBody};

    fn response(content_type: Option<&'static str>, body: &'static str) -> HttpResponse {
        let mut headers = HeaderMap::new();
        if let Some(content_type) = content_type {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        HttpResponse {
            status: StatusCode::OK,
            headers,
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[test]
    fn json_body_is_decoded() {
        let body = decode::decode_body(&response(Some("application/json"), r#"{"a":1}"#))
            .expect("must decode");
        assert_eq!(body, ResponseBody::Json(json!({"a": 1})));
    }

    #[test]
    fn non_json_body_is_text() {
        let body = decode::decode_body(&response(Some("text/plain"), r#"{"a":1}"#))
            .expect("must decode");
        assert_eq!(body, ResponseBody::Text(r#"{"a":1}"#.to_owned()));
    }

    #[test]
    fn malformed_json_is_an_error() {
        let err = decode::decode_body(&response(Some("application/json"), "{nope"))
            .expect_err("must fail");
        assert!(matches!(err, ErrorCause::Decode(_)));
    }

    #[test]
    fn empty_json_body_is_null() {
        let body =
            decode::decode_body(&response(Some("application/json"), "")).expect("must decode");
        assert_eq!(body, ResponseBody::Json(serde_json::Value::Null));
    }

    #[test]
    fn error_payload_falls_back_to_raw_text() {
        let payload = decode::decode_error_payload(&response(Some("application/json"), "<html>"));
        assert_eq!(payload, json!("<html>"));
    }
}
