//! Built-in node executors.

pub mod control;
pub mod data;
pub mod http;
pub mod trigger;

use serde_json::Value;

use super::NodeError;
use crate::expression::is_expression;

/// Reject a field whose expression failed to resolve in lenient mode, so a
/// leftover `{{ … }}` string is never mistaken for data.
pub(crate) fn ensure_resolved(key: &str, value: &Value) -> Result<(), NodeError> {
    if is_expression(value) {
        return Err(NodeError::InvalidConfig(format!(
            "'{key}' still contains an unresolved expression: {value}"
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    use chrono::{DateTime, Utc};
    use futures_util::future::BoxFuture;
    use graphflow_types::config::EngineConfig;
    use graphflow_types::results::NodeResults;
    use graphflow_types::workflow::{Node, NodeMetadata};
    use serde_json::{Value, json};
    use uuid::Uuid;

    use crate::executor::durable::InlineStepRunner;
    use crate::executor::{ExecutionServices, NodeContext, NodeError, NodeExecutor, NodeOutput};
    use crate::expression::{ContextParams, ExpressionContext};
    use crate::repository::{
        CredentialResolver, HttpRequestSpec, HttpResponseData, HttpTransport,
        InMemoryCredentialStore,
    };

    /// Records requests and answers every one with the same response.
    pub struct StubTransport {
        pub requests: Mutex<Vec<HttpRequestSpec>>,
        pub response: HttpResponseData,
    }

    impl StubTransport {
        pub fn new(status: u16, body: Value) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                response: HttpResponseData {
                    status,
                    headers: BTreeMap::from([(
                        "content-type".to_string(),
                        "application/json".to_string(),
                    )]),
                    body,
                },
            }
        }

        pub fn sent(&self) -> Vec<HttpRequestSpec> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl HttpTransport for StubTransport {
        fn send(
            &self,
            request: HttpRequestSpec,
        ) -> BoxFuture<'_, Result<HttpResponseData, NodeError>> {
            self.requests.lock().unwrap().push(request);
            let response = self.response.clone();
            Box::pin(async move { Ok(response) })
        }
    }

    pub fn services_with(
        http: Arc<dyn HttpTransport>,
        credentials: Arc<dyn CredentialResolver>,
    ) -> ExecutionServices {
        ExecutionServices {
            http,
            credentials,
            durable: Arc::new(InlineStepRunner),
            config: EngineConfig::default(),
        }
    }

    pub fn services() -> ExecutionServices {
        services_with(
            Arc::new(StubTransport::new(200, json!({}))),
            Arc::new(InMemoryCredentialStore::new()),
        )
    }

    pub fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T09:30:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    /// Invoke `executor` for `node` with an already-resolved `config`.
    pub async fn run(
        executor: &dyn NodeExecutor,
        node: &Node,
        config: Value,
        results: &NodeResults,
        services: &ExecutionServices,
    ) -> Result<NodeOutput, NodeError> {
        let nodes: Vec<NodeMetadata> = vec![node.metadata()];
        let expressions = ExpressionContext::new(ContextParams {
            results: results.clone(),
            nodes,
            current_node_id: Some(node.id.clone()),
            now: Some(fixed_now()),
            ..ContextParams::default()
        });
        let step_name = format!("{}:{}:{}", Uuid::nil(), node.id, node.result_key());
        executor
            .execute(NodeContext {
                node,
                config: &config,
                results,
                expressions: &expressions,
                services,
                workflow_id: Uuid::nil(),
                run_id: Uuid::nil(),
                step_name: &step_name,
            })
            .await
    }
}
