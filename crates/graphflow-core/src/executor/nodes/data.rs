//! `SET` and `MERGE`: shape data without leaving the process.

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use super::ensure_resolved;
use crate::executor::{NodeContext, NodeError, NodeExecutor, NodeOutput};

// ---------------------------------------------------------------------------
// SET
// ---------------------------------------------------------------------------

/// `{values: {...}, keepInput?: bool}`
#[derive(Debug, Clone, Copy, Default)]
pub struct SetExecutor;

impl NodeExecutor for SetExecutor {
    fn execute<'a>(&'a self, ctx: NodeContext<'a>) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move {
            let values = match ctx.field("values") {
                None => Map::new(),
                Some(Value::Object(map)) => map.clone(),
                Some(other) => {
                    return Err(NodeError::InvalidConfig(format!(
                        "'values' must be an object, got {other}"
                    )));
                }
            };

            let mut out = if ctx.bool_field("keepInput") {
                ctx.expressions
                    .input()
                    .as_object()
                    .cloned()
                    .unwrap_or_default()
            } else {
                Map::new()
            };
            out.extend(values);
            Ok(NodeOutput::value(Value::Object(out)))
        })
    }
}

// ---------------------------------------------------------------------------
// MERGE
// ---------------------------------------------------------------------------

/// `{inputs: [...], mode: "append" | "object"}`
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeExecutor;

impl NodeExecutor for MergeExecutor {
    fn execute<'a>(&'a self, ctx: NodeContext<'a>) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move {
            let inputs = match ctx.field("inputs") {
                Some(Value::Array(items)) => items,
                Some(other) => {
                    ensure_resolved("inputs", other)?;
                    return Err(NodeError::InvalidConfig(format!(
                        "'inputs' must be an array, got {other}"
                    )));
                }
                None => return Err(NodeError::InvalidConfig("'inputs' is required".into())),
            };

            let mode = ctx.field("mode").and_then(Value::as_str).unwrap_or("append");
            let merged = match mode {
                "append" => {
                    let mut out = Vec::new();
                    for input in inputs {
                        match input {
                            Value::Array(items) => out.extend(items.iter().cloned()),
                            Value::Null => {}
                            other => out.push(other.clone()),
                        }
                    }
                    Value::Array(out)
                }
                "object" => {
                    let mut out = Map::new();
                    for input in inputs {
                        match input {
                            Value::Object(map) => {
                                out.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())))
                            }
                            Value::Null => {}
                            other => {
                                return Err(NodeError::InvalidConfig(format!(
                                    "object merge expects objects, got {other}"
                                )));
                            }
                        }
                    }
                    Value::Object(out)
                }
                other => {
                    return Err(NodeError::InvalidConfig(format!(
                        "unknown merge mode '{other}'"
                    )));
                }
            };
            Ok(NodeOutput::value(merged))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::nodes::testing::{run, services};
    use graphflow_types::results::NodeResults;
    use graphflow_types::workflow::Node;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_values() {
        let node = Node::new("s", "SET", "Shape");
        let out = run(
            &SetExecutor,
            &node,
            json!({ "values": { "greeting": "Hello John", "n": 42 } }),
            &NodeResults::new(),
            &services(),
        )
        .await
        .unwrap();
        assert_eq!(out.value, json!({ "greeting": "Hello John", "n": 42 }));
    }

    #[tokio::test]
    async fn test_set_keep_input_merges_over_input() {
        let node = Node::new("s", "SET", "Shape");
        let mut results = NodeResults::new();
        results.insert("Fetch", json!({ "id": 7, "n": 1 }));
        let out = run(
            &SetExecutor,
            &node,
            json!({ "values": { "n": 2 }, "keepInput": true }),
            &results,
            &services(),
        )
        .await
        .unwrap();
        assert_eq!(out.value, json!({ "id": 7, "n": 2 }));
    }

    #[tokio::test]
    async fn test_set_rejects_non_object_values() {
        let node = Node::new("s", "SET", "Shape");
        let err = run(&SetExecutor, &node, json!({ "values": [1] }), &NodeResults::new(), &services())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_merge_append() {
        let node = Node::new("m", "MERGE", "Merge");
        let out = run(
            &MergeExecutor,
            &node,
            json!({ "inputs": [[1, 2], null, 3, [4]] }),
            &NodeResults::new(),
            &services(),
        )
        .await
        .unwrap();
        assert_eq!(out.value, json!([1, 2, 3, 4]));
    }

    #[tokio::test]
    async fn test_merge_object() {
        let node = Node::new("m", "MERGE", "Merge");
        let out = run(
            &MergeExecutor,
            &node,
            json!({ "mode": "object", "inputs": [{ "a": 1 }, { "a": 2, "b": 3 }] }),
            &NodeResults::new(),
            &services(),
        )
        .await
        .unwrap();
        assert_eq!(out.value, json!({ "a": 2, "b": 3 }));
    }

    #[tokio::test]
    async fn test_merge_invalid_config() {
        let node = Node::new("m", "MERGE", "Merge");
        let svc = services();
        let empty = NodeResults::new();
        for config in [
            json!({}),
            json!({ "inputs": "nope" }),
            json!({ "inputs": "{{ broken( }}" }),
            json!({ "inputs": [], "mode": "zip" }),
            json!({ "inputs": [1], "mode": "object" }),
        ] {
            let err = run(&MergeExecutor, &node, config, &empty, &svc).await.unwrap_err();
            assert!(matches!(err, NodeError::InvalidConfig(_)));
        }
    }
}
