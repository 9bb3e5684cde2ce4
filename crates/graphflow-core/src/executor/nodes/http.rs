//! `HTTP_REQUEST`: builds a request from resolved configuration and hands it
//! to the [`HttpTransport`](crate::repository::HttpTransport) collaborator.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::{Value, json};

use super::ensure_resolved;
use crate::executor::{NodeContext, NodeError, NodeExecutor, NodeOutput};
use crate::expression::eval::stringify;
use crate::repository::HttpRequestSpec;

const METHODS: [&str; 7] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// `{method, url, headers?, query?, body?, credentialId?, timeoutSecs?, ignoreErrors?}`
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpRequestExecutor;

fn string_map(ctx: &NodeContext<'_>, key: &str) -> Result<BTreeMap<String, String>, NodeError> {
    match ctx.field(key) {
        None => Ok(BTreeMap::new()),
        Some(Value::Object(map)) => Ok(map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), stringify(v)))
            .collect()),
        Some(other) => Err(NodeError::InvalidConfig(format!(
            "'{key}' must be an object, got {other}"
        ))),
    }
}

/// Fold credential fields into the request.
///
/// `token` becomes a bearer header, `username`/`password` basic auth, and
/// `headerName`/`headerValue` a custom header.
fn apply_credential(
    fields: &HashMap<String, String>,
    headers: &mut BTreeMap<String, String>,
    basic_auth: &mut Option<(String, Option<String>)>,
) {
    if let Some(token) = fields.get("token") {
        headers.insert("Authorization".into(), format!("Bearer {token}"));
    }
    if let Some(username) = fields.get("username") {
        *basic_auth = Some((username.clone(), fields.get("password").cloned()));
    }
    if let (Some(name), Some(value)) = (fields.get("headerName"), fields.get("headerValue")) {
        headers.insert(name.clone(), value.clone());
    }
}

impl NodeExecutor for HttpRequestExecutor {
    fn execute<'a>(&'a self, ctx: NodeContext<'a>) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move {
            let method = ctx
                .field("method")
                .and_then(Value::as_str)
                .unwrap_or("GET")
                .to_uppercase();
            if !METHODS.contains(&method.as_str()) {
                return Err(NodeError::InvalidConfig(format!(
                    "unsupported HTTP method '{method}'"
                )));
            }

            let url = ctx.require_str("url")?.to_string();
            ensure_resolved("url", &Value::String(url.clone()))?;

            let mut headers = string_map(&ctx, "headers")?;
            let query = string_map(&ctx, "query")?;
            let body = ctx.field("body").cloned();
            let timeout_secs = ctx
                .field("timeoutSecs")
                .and_then(Value::as_f64)
                .filter(|secs| *secs > 0.0)
                .unwrap_or(ctx.services.config.http_timeout_secs as f64);

            let mut basic_auth = None;
            if let Some(credential_id) = ctx.field("credentialId").and_then(Value::as_str) {
                let fields = ctx
                    .services
                    .credentials
                    .resolve(ctx.workflow_id, credential_id)
                    .await?;
                apply_credential(&fields, &mut headers, &mut basic_auth);
            }
            headers
                .entry("User-Agent".into())
                .or_insert_with(|| ctx.services.config.user_agent.clone());

            tracing::debug!(
                node_id = ctx.node.id.as_str(),
                method = method.as_str(),
                url = url.as_str(),
                "sending http request"
            );

            let response = ctx
                .services
                .http
                .send(HttpRequestSpec {
                    method: method.clone(),
                    url: url.clone(),
                    headers,
                    query,
                    body,
                    basic_auth,
                    timeout: Duration::from_secs_f64(timeout_secs),
                })
                .await?;

            if !response.is_success() && !ctx.bool_field("ignoreErrors") {
                return Err(NodeError::Http(format!(
                    "{method} {url} returned status {}",
                    response.status
                )));
            }

            Ok(NodeOutput::value(json!({
                "status": response.status,
                "headers": response.headers,
                "body": response.body,
            })))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::executor::nodes::testing::{StubTransport, run, services_with};
    use crate::repository::InMemoryCredentialStore;
    use graphflow_types::error::CredentialError;
    use graphflow_types::results::NodeResults;
    use graphflow_types::workflow::Node;

    fn node() -> Node {
        Node::new("h1", "HTTP_REQUEST", "Fetch")
    }

    #[tokio::test]
    async fn test_builds_request_and_returns_response() {
        let transport = Arc::new(StubTransport::new(200, json!({ "items": [1, 2] })));
        let store = InMemoryCredentialStore::new();
        store.insert("api", [("token", "secret")]);
        let svc = services_with(transport.clone(), Arc::new(store));

        let out = run(
            &HttpRequestExecutor,
            &node(),
            json!({
                "method": "post",
                "url": "https://api.example.com/orders",
                "headers": { "X-Trace": 42 },
                "query": { "page": 2 },
                "body": { "name": "John" },
                "credentialId": "api",
                "timeoutSecs": 5
            }),
            &NodeResults::new(),
            &svc,
        )
        .await
        .unwrap();

        assert_eq!(out.value["status"], 200);
        assert_eq!(out.value["body"], json!({ "items": [1, 2] }));

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        let req = &sent[0];
        assert_eq!(req.method, "POST");
        assert_eq!(req.headers["Authorization"], "Bearer secret");
        assert_eq!(req.headers["X-Trace"], "42");
        assert_eq!(req.headers["User-Agent"], "graphflow/0.1");
        assert_eq!(req.query["page"], "2");
        assert_eq!(req.body, Some(json!({ "name": "John" })));
        assert_eq!(req.timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_basic_auth_and_custom_header() {
        let transport = Arc::new(StubTransport::new(200, Value::Null));
        let store = InMemoryCredentialStore::new();
        store.insert(
            "db",
            [("username", "svc"), ("password", "pw"), ("headerName", "X-Key"), ("headerValue", "k")],
        );
        let svc = services_with(transport.clone(), Arc::new(store));

        run(
            &HttpRequestExecutor,
            &node(),
            json!({ "url": "https://x.test", "credentialId": "db" }),
            &NodeResults::new(),
            &svc,
        )
        .await
        .unwrap();

        let req = &transport.sent()[0];
        assert_eq!(req.method, "GET");
        assert_eq!(req.basic_auth, Some(("svc".to_string(), Some("pw".to_string()))));
        assert_eq!(req.headers["X-Key"], "k");
    }

    #[tokio::test]
    async fn test_credential_error_passes_through() {
        let transport = Arc::new(StubTransport::new(200, Value::Null));
        let svc = services_with(transport.clone(), Arc::new(InMemoryCredentialStore::new()));

        let err = run(
            &HttpRequestExecutor,
            &node(),
            json!({ "url": "https://x.test", "credentialId": "missing" }),
            &NodeResults::new(),
            &svc,
        )
        .await
        .unwrap_err();

        assert_eq!(
            err,
            NodeError::Credential(CredentialError::NotFound("missing".into()))
        );
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_non_success_status() {
        let transport = Arc::new(StubTransport::new(503, json!("down")));
        let svc = services_with(transport, Arc::new(InMemoryCredentialStore::new()));

        let err = run(
            &HttpRequestExecutor,
            &node(),
            json!({ "url": "https://x.test" }),
            &NodeResults::new(),
            &svc,
        )
        .await
        .unwrap_err();
        assert_eq!(
            err,
            NodeError::Http("GET https://x.test returned status 503".into())
        );

        let out = run(
            &HttpRequestExecutor,
            &node(),
            json!({ "url": "https://x.test", "ignoreErrors": true }),
            &NodeResults::new(),
            &svc,
        )
        .await
        .unwrap();
        assert_eq!(out.value["status"], 503);
    }

    #[tokio::test]
    async fn test_invalid_config() {
        let transport = Arc::new(StubTransport::new(200, Value::Null));
        let svc = services_with(transport, Arc::new(InMemoryCredentialStore::new()));
        for config in [
            json!({}),
            json!({ "url": "https://x.test", "method": "BREW" }),
            json!({ "url": "https://x.test", "headers": [1] }),
            json!({ "url": "https://x.test/{{ broken( }}" }),
        ] {
            let err = run(&HttpRequestExecutor, &node(), config, &NodeResults::new(), &svc)
                .await
                .unwrap_err();
            assert!(matches!(err, NodeError::InvalidConfig(_)), "{err}");
        }
    }
}
