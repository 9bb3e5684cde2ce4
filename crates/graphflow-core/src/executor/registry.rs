//! Type tag -> executor lookup.

use std::collections::HashMap;
use std::sync::Arc;

use graphflow_types::workflow::NodeKind;

use super::NodeExecutor;
use super::nodes::control::{ConditionExecutor, LoopExecutor, SwitchExecutor, WaitExecutor};
use super::nodes::data::{MergeExecutor, SetExecutor};
use super::nodes::http::HttpRequestExecutor;
use super::nodes::trigger::TriggerExecutor;

/// Executors keyed by type tag.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut tags: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        tags.sort_unstable();
        f.debug_struct("ExecutorRegistry").field("tags", &tags).finish()
    }
}

/// The built-in executor for a kind. Editor-only kinds have none.
fn builtin(kind: NodeKind) -> Option<Arc<dyn NodeExecutor>> {
    let executor: Arc<dyn NodeExecutor> = match kind {
        NodeKind::ManualTrigger | NodeKind::WebhookTrigger | NodeKind::ScheduleTrigger => {
            Arc::new(TriggerExecutor::new(kind))
        }
        NodeKind::HttpRequest => Arc::new(HttpRequestExecutor),
        NodeKind::SetData => Arc::new(SetExecutor),
        NodeKind::Merge => Arc::new(MergeExecutor),
        NodeKind::Condition => Arc::new(ConditionExecutor),
        NodeKind::Switch => Arc::new(SwitchExecutor),
        NodeKind::Loop => Arc::new(LoopExecutor),
        NodeKind::Wait => Arc::new(WaitExecutor),
        NodeKind::Note | NodeKind::Group => return None,
    };
    Some(executor)
}

impl ExecutorRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// One executor for every executable [`NodeKind`].
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        for kind in NodeKind::ALL {
            if let Some(executor) = builtin(kind) {
                registry.executors.insert(kind.tag().to_string(), executor);
            }
        }
        registry
    }

    /// Add or replace the executor for a tag.
    pub fn register(&mut self, type_tag: impl Into<String>, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(type_tag.into(), executor);
    }

    pub fn resolve(&self, type_tag: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(type_tag).cloned()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_covers_executable_kinds() {
        let registry = ExecutorRegistry::standard();
        for kind in NodeKind::ALL {
            assert_eq!(
                registry.resolve(kind.tag()).is_some(),
                kind.is_executable(),
                "{kind}"
            );
        }
        assert_eq!(registry.len(), 10);
    }

    #[test]
    fn test_unknown_tag_unresolved() {
        let registry = ExecutorRegistry::standard();
        assert!(registry.resolve("FAX").is_none());
        assert!(registry.resolve("set").is_none());
        assert!(ExecutorRegistry::empty().is_empty());
    }
}
