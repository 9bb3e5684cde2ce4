//! Control-flow kinds. Each returns a [`BranchDecision`] alongside its output.

use std::time::Duration;

use chrono::Utc;
use futures_util::future::BoxFuture;
use graphflow_types::branch::{BranchDecision, IterationInfo};
use serde_json::{Value, json};

use super::ensure_resolved;
use crate::executor::{NodeContext, NodeError, NodeExecutor, NodeOutput};
use crate::expression::context::format_timestamp;
use crate::expression::eval::{deep_eq, truthy_value};

// ---------------------------------------------------------------------------
// IF
// ---------------------------------------------------------------------------

/// `{condition}`: branch `"true"` or `"false"` by truthiness.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionExecutor;

impl NodeExecutor for ConditionExecutor {
    fn execute<'a>(&'a self, ctx: NodeContext<'a>) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move {
            let condition = ctx
                .config
                .get("condition")
                .ok_or_else(|| NodeError::InvalidConfig("'condition' is required".into()))?;
            ensure_resolved("condition", condition)?;

            let result = truthy_value(condition);
            let branch = if result { "true" } else { "false" };
            Ok(NodeOutput::branch(
                json!({ "result": result, "branch": branch }),
                BranchDecision::new(branch).with_data(Value::Bool(result)),
            ))
        })
    }
}

// ---------------------------------------------------------------------------
// SWITCH
// ---------------------------------------------------------------------------

/// `{value, cases: [{value, branch?}], fallback?}`
#[derive(Debug, Clone, Copy, Default)]
pub struct SwitchExecutor;

impl NodeExecutor for SwitchExecutor {
    fn execute<'a>(&'a self, ctx: NodeContext<'a>) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move {
            let value = ctx.config.get("value").cloned().unwrap_or(Value::Null);
            ensure_resolved("value", &value)?;

            let cases = match ctx.field("cases") {
                None => &[][..],
                Some(Value::Array(cases)) => cases.as_slice(),
                Some(other) => {
                    return Err(NodeError::InvalidConfig(format!(
                        "'cases' must be an array, got {other}"
                    )));
                }
            };

            let matched = cases.iter().enumerate().find(|(_, case)| {
                deep_eq(case.get("value").unwrap_or(&Value::Null), &value)
            });

            let (branch, case_index) = match matched {
                Some((i, case)) => {
                    let branch = case
                        .get("branch")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("case_{i}"));
                    (branch, Some(i))
                }
                None => {
                    let fallback = ctx
                        .field("fallback")
                        .and_then(Value::as_str)
                        .unwrap_or("default");
                    (fallback.to_string(), None)
                }
            };

            Ok(NodeOutput::branch(
                json!({ "value": value, "branch": branch, "matchedCase": case_index }),
                BranchDecision::new(branch).with_data(value),
            ))
        })
    }
}

// ---------------------------------------------------------------------------
// LOOP
// ---------------------------------------------------------------------------

/// `{items, maxItems?}`: emits the item list and positions on the first item.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopExecutor;

impl NodeExecutor for LoopExecutor {
    fn execute<'a>(&'a self, ctx: NodeContext<'a>) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move {
            let mut items = match ctx.field("items") {
                None => Vec::new(),
                Some(Value::Array(items)) => items.clone(),
                Some(other) => {
                    ensure_resolved("items", other)?;
                    vec![other.clone()]
                }
            };

            let configured_cap = ctx.services.config.max_loop_items;
            let cap = ctx
                .field("maxItems")
                .and_then(Value::as_u64)
                .map(|n| (n as usize).min(configured_cap))
                .unwrap_or(configured_cap);
            if items.len() > cap {
                tracing::warn!(
                    node_id = ctx.node.id.as_str(),
                    total = items.len(),
                    cap,
                    "truncating loop items"
                );
                items.truncate(cap);
            }

            let total = items.len();
            let decision = match items.first() {
                Some(first) => BranchDecision::new("loop").with_iteration(IterationInfo {
                    index: 0,
                    total,
                    item: Some(first.clone()),
                }),
                None => BranchDecision::new("done").with_iteration(IterationInfo {
                    index: 0,
                    total: 0,
                    item: None,
                }),
            };

            Ok(NodeOutput::branch(
                json!({ "items": items, "count": total }),
                decision,
            ))
        })
    }
}

// ---------------------------------------------------------------------------
// WAIT
// ---------------------------------------------------------------------------

/// `{amount, unit: "seconds" | "minutes" | "hours"}`: a durable sleep.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitExecutor;

fn unit_seconds(unit: &str) -> Option<f64> {
    match unit {
        "second" | "seconds" => Some(1.0),
        "minute" | "minutes" => Some(60.0),
        "hour" | "hours" => Some(3600.0),
        _ => None,
    }
}

impl NodeExecutor for WaitExecutor {
    fn execute<'a>(&'a self, ctx: NodeContext<'a>) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move {
            let amount = ctx
                .field("amount")
                .and_then(Value::as_f64)
                .ok_or_else(|| NodeError::InvalidConfig("'amount' must be a number".into()))?;
            if amount < 0.0 {
                return Err(NodeError::InvalidConfig(format!(
                    "'amount' must not be negative, got {amount}"
                )));
            }

            let unit = ctx.field("unit").and_then(Value::as_str).unwrap_or("seconds");
            let factor = unit_seconds(unit)
                .ok_or_else(|| NodeError::InvalidConfig(format!("unknown wait unit '{unit}'")))?;

            let max = ctx.services.config.max_wait_secs as f64;
            let mut secs = amount * factor;
            if secs > max {
                tracing::warn!(
                    node_id = ctx.node.id.as_str(),
                    requested = secs,
                    max,
                    "capping wait duration"
                );
                secs = max;
            }

            ctx.services
                .durable
                .sleep(ctx.step_name, Duration::from_secs_f64(secs))
                .await;

            Ok(NodeOutput::branch(
                json!({
                    "waitedSeconds": secs,
                    "resumedAt": format_timestamp(Utc::now()),
                }),
                BranchDecision::new("resumed").with_data(json!(secs)),
            ))
        })
    }
}
