//! reqwest-backed [`HttpTransport`].
//!
//! The `HTTP_REQUEST` executor in graphflow-core builds an
//! [`HttpRequestSpec`]; this transport turns it into a real request. Same
//! dependency-inversion split as the persistence traits: the port lives in
//! core, the IO lives here.

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::future::BoxFuture;
use graphflow_core::executor::NodeError;
use graphflow_core::repository::http::parse_body;
use graphflow_core::repository::{HttpRequestSpec, HttpResponseData, HttpTransport};
use serde_json::Value;

/// Shared reqwest client. Per-request timeouts come from the spec.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport with a connection-level timeout and user agent.
    pub fn new(user_agent: &str, connect_timeout: Duration) -> Result<Self, NodeError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| NodeError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn build(&self, spec: &HttpRequestSpec) -> Result<reqwest::Request, NodeError> {
        let method = reqwest::Method::from_bytes(spec.method.as_bytes())
            .map_err(|_| NodeError::InvalidConfig(format!("invalid HTTP method: {}", spec.method)))?;

        let mut request = self
            .client
            .request(method, &spec.url)
            .timeout(spec.timeout);

        if !spec.query.is_empty() {
            request = request.query(&spec.query);
        }
        for (key, value) in &spec.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Some((username, password)) = &spec.basic_auth {
            request = request.basic_auth(username, password.as_deref());
        }
        request = match &spec.body {
            None | Some(Value::Null) => request,
            Some(Value::String(text)) => request.body(text.clone()),
            Some(other) => request.json(other),
        };

        request
            .build()
            .map_err(|e| NodeError::InvalidConfig(format!("invalid request to '{}': {e}", spec.url)))
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, spec: HttpRequestSpec) -> BoxFuture<'_, Result<HttpResponseData, NodeError>> {
        Box::pin(async move {
            let request = self.build(&spec)?;
            let response = self.client.execute(request).await.map_err(|e| {
                if e.is_timeout() {
                    NodeError::Http(format!("HTTP request to '{}' timed out", spec.url))
                } else {
                    NodeError::Http(format!("HTTP request to '{}' failed: {e}", spec.url))
                }
            })?;

            let status = response.status().as_u16();
            let headers: BTreeMap<String, String> = response
                .headers()
                .iter()
                .map(|(k, v)| {
                    (
                        k.as_str().to_string(),
                        v.to_str().unwrap_or("<binary>").to_string(),
                    )
                })
                .collect();
            let text = response.text().await.map_err(|e| {
                NodeError::Http(format!("failed to read HTTP response body: {e}"))
            })?;

            tracing::info!(
                url = spec.url.as_str(),
                status,
                body_len = text.len(),
                "HTTP request completed"
            );

            Ok(HttpResponseData {
                status,
                headers,
                body: parse_body(text),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(method: &str, body: Option<Value>) -> HttpRequestSpec {
        HttpRequestSpec {
            method: method.into(),
            url: "https://api.example.com/orders".into(),
            headers: BTreeMap::from([("X-Trace".to_string(), "42".to_string())]),
            query: BTreeMap::from([("page".to_string(), "2".to_string())]),
            body,
            basic_auth: None,
            timeout: Duration::from_secs(5),
        }
    }

    fn transport() -> ReqwestTransport {
        ReqwestTransport::new("graphflow/0.1", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn build_applies_query_headers_and_timeout() {
        let request = transport().build(&spec("GET", None)).unwrap();
        assert_eq!(request.method(), reqwest::Method::GET);
        assert_eq!(request.url().as_str(), "https://api.example.com/orders?page=2");
        assert_eq!(request.headers()["X-Trace"], "42");
        assert_eq!(request.timeout(), Some(&Duration::from_secs(5)));
        assert!(request.body().is_none());
    }

    #[test]
    fn build_json_and_text_bodies() {
        let request = transport()
            .build(&spec("POST", Some(json!({ "name": "John" }))))
            .unwrap();
        assert_eq!(request.headers()["content-type"], "application/json");
        let bytes = request.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(serde_json::from_slice::<Value>(bytes).unwrap(), json!({ "name": "John" }));

        let request = transport()
            .build(&spec("PUT", Some(json!("raw payload"))))
            .unwrap();
        assert_eq!(request.body().and_then(|b| b.as_bytes()), Some(&b"raw payload"[..]));
    }

    #[test]
    fn build_basic_auth() {
        let mut s = spec("GET", None);
        s.basic_auth = Some(("svc".into(), Some("pw".into())));
        let request = transport().build(&s).unwrap();
        let auth = request.headers()["authorization"].to_str().unwrap();
        assert!(auth.starts_with("Basic "));
    }

    #[test]
    fn build_rejects_bad_url() {
        let mut s = spec("GET", None);
        s.url = "not a url".into();
        assert!(matches!(transport().build(&s), Err(NodeError::InvalidConfig(_))));
    }
}
