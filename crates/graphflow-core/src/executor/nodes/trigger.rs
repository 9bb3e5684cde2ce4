//! Trigger nodes: surface the run's trigger payload as the first output.

use futures_util::future::BoxFuture;
use graphflow_types::results::TRIGGER_KEY;
use graphflow_types::workflow::NodeKind;
use serde_json::{Map, Value};

use crate::executor::{NodeContext, NodeError, NodeExecutor, NodeOutput};
use crate::expression::context::format_timestamp;

/// Shared by the manual, webhook and schedule trigger kinds.
#[derive(Debug, Clone, Copy)]
pub struct TriggerExecutor {
    kind: NodeKind,
}

impl TriggerExecutor {
    pub fn new(kind: NodeKind) -> Self {
        Self { kind }
    }

    fn mode(&self) -> &'static str {
        match self.kind {
            NodeKind::WebhookTrigger => "webhook",
            NodeKind::ScheduleTrigger => "schedule",
            _ => "manual",
        }
    }
}

impl NodeExecutor for TriggerExecutor {
    fn execute<'a>(&'a self, ctx: NodeContext<'a>) -> BoxFuture<'a, Result<NodeOutput, NodeError>> {
        Box::pin(async move {
            let payload = ctx
                .results
                .get(TRIGGER_KEY)
                .cloned()
                .unwrap_or_else(|| Value::Object(Map::new()));

            // Payload keys win over the metadata.
            let value = match payload {
                Value::Object(mut map) => {
                    map.entry("triggeredAt").or_insert_with(|| {
                        Value::String(format_timestamp(ctx.expressions.now()))
                    });
                    map.entry("mode")
                        .or_insert_with(|| Value::String(self.mode().to_string()));
                    Value::Object(map)
                }
                other => other,
            };

            tracing::debug!(node_id = ctx.node.id.as_str(), mode = self.mode(), "trigger fired");
            Ok(NodeOutput::value(value))
        })
    }
}
