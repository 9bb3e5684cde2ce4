//! HTTP transport port used by the `HTTP_REQUEST` executor.

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::executor::NodeError;

/// A fully resolved outgoing request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequestSpec {
    /// Upper-case method name.
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    /// JSON body. Strings are sent as-is, anything else as `application/json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// `(username, password)` for basic auth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<(String, Option<String>)>,
    pub timeout: Duration,
}

/// What the transport got back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponseData {
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Parsed JSON when the body is JSON, otherwise the raw text.
    pub body: Value,
}

impl HttpResponseData {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends HTTP requests. Object-safe so it can be shared as `Arc<dyn HttpTransport>`.
pub trait HttpTransport: Send + Sync {
    fn send(&self, request: HttpRequestSpec) -> BoxFuture<'_, Result<HttpResponseData, NodeError>>;
}

/// Parse a response body as JSON, falling back to a string.
pub fn parse_body(text: String) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(_) => Value::String(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body("{\"a\":1}".into()), json!({ "a": 1 }));
        assert_eq!(parse_body("plain text".into()), json!("plain text"));
        assert_eq!(parse_body("  ".into()), Value::Null);
    }

    #[test]
    fn test_success_range() {
        let mut resp = HttpResponseData {
            status: 204,
            headers: BTreeMap::new(),
            body: Value::Null,
        };
        assert!(resp.is_success());
        resp.status = 404;
        assert!(!resp.is_success());
    }
}
