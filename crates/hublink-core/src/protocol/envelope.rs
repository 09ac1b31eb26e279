//! JSON request/response envelopes.
//!
//! Requests go out as `{"m":method,"p":params,"i":id}`. Replies carry the
//! same id plus either `r` (result) or `e` (base64 of a JSON error object).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

use crate::utils::decode_base64;

/// Error reported by the hub itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DeviceError {
    pub message: String,
}

impl DeviceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Serialize)]
struct Request<'a> {
    m: &'a str,
    p: &'a Value,
    i: &'a str,
}

#[derive(Deserialize)]
struct ErrorPayload {
    message: String,
}

/// Serialize a request envelope as compact JSON (no terminator).
pub fn encode_request(method: &str, params: &Value, id: &str) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Request {
        m: method,
        p: params,
        i: id,
    })
}

/// Decode the `e` field of a reply into the hub's error message.
///
/// A payload that is not base64 JSON with a `message` still fails the
/// request; the raw field is kept so nothing is lost.
pub fn decode_device_error(encoded: &str) -> DeviceError {
    decode_base64(encoded)
        .ok()
        .and_then(|json| serde_json::from_str::<ErrorPayload>(&json).ok())
        .map(|payload| DeviceError::new(payload.message))
        .unwrap_or_else(|| DeviceError::new(format!("Undecodable device error: {encoded}")))
}

/// What a single inbound line means for a request with a given id.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// Reply to this request; holds `r` (`null` when absent).
    Reply(Value),
    /// The hub reported an error.
    Error(DeviceError),
    /// Noise, partial output, or traffic for someone else.
    Unrelated,
}

/// Classify one complete inbound line against correlation id `id`.
pub fn classify_line(line: &str, id: &str) -> LineOutcome {
    let Ok(parsed) = serde_json::from_str::<Value>(line) else {
        trace!(line = %line, "Skipping non-JSON line");
        return LineOutcome::Unrelated;
    };

    match parsed.get("e") {
        None | Some(Value::Null) | Some(Value::Bool(false)) => {}
        Some(Value::String(e)) if e.is_empty() => {}
        Some(Value::String(e)) => return LineOutcome::Error(decode_device_error(e)),
        Some(other) => return LineOutcome::Error(DeviceError::new(other.to_string())),
    }

    if parsed.get("i").and_then(Value::as_str) == Some(id) {
        let result = parsed.get("r").cloned().unwrap_or(Value::Null);
        return LineOutcome::Reply(result);
    }

    LineOutcome::Unrelated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::encode_base64;
    use serde_json::json;

    #[test]
    fn test_encode_request_is_compact_and_ordered() {
        let params = json!({"param1": "1", "param2": 2});
        let msg = encode_request("request", &params, "1234").unwrap();
        assert_eq!(msg, r#"{"m":"request","p":{"param1":"1","param2":2},"i":"1234"}"#);
    }

    #[test]
    fn test_classify_reply() {
        let outcome = classify_line(r#"{"m":0,"r":"response","i":"1234"}"#, "1234");
        assert_eq!(outcome, LineOutcome::Reply(json!("response")));
    }

    #[test]
    fn test_classify_reply_without_result() {
        let outcome = classify_line(r#"{"i":"abcd"}"#, "abcd");
        assert_eq!(outcome, LineOutcome::Reply(Value::Null));
    }

    #[test]
    fn test_classify_other_id_is_unrelated() {
        let outcome = classify_line(r#"{"i":"zzzz","r":1}"#, "abcd");
        assert_eq!(outcome, LineOutcome::Unrelated);
    }

    #[test]
    fn test_classify_error() {
        let line = r#"{"m":0,"e":"eyJtZXNzYWdlIjogImVycm9yIn0=","i":"1234"}"#;
        assert_eq!(
            classify_line(line, "1234"),
            LineOutcome::Error(DeviceError::new("error"))
        );
    }

    #[test]
    fn test_classify_empty_error_field_is_ignored() {
        let line = r#"{"e":"","i":"1234","r":5}"#;
        assert_eq!(classify_line(line, "1234"), LineOutcome::Reply(json!(5)));
    }

    #[test]
    fn test_classify_garbage() {
        assert_eq!(classify_line("Traceback (most", "1234"), LineOutcome::Unrelated);
        assert_eq!(classify_line("", "1234"), LineOutcome::Unrelated);
    }

    #[test]
    fn test_decode_device_error_fallback() {
        let not_json = encode_base64("boom");
        let err = decode_device_error(&not_json);
        assert!(err.message.starts_with("Undecodable device error"));
    }
}
