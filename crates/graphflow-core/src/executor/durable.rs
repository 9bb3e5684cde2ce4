//! The durable-step boundary.
//!
//! Every executor invocation goes through [`DurableStep::run_step`] under a
//! step name of the form `"{run_id}:{node_id}:{node_name}"`. The dispatcher
//! never retries or checkpoints on its own; whatever durability a host wants
//! lives behind this trait.

use std::collections::BTreeMap;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde_json::Value;
use uuid::Uuid;

use super::NodeError;

/// Runs named units of work and durable sleeps.
///
/// `work` is a lazy future: an implementation that already holds a result
/// for `name` may return it without polling `work` at all.
pub trait DurableStep: Send + Sync {
    fn run_step<'a>(
        &'a self,
        name: &'a str,
        work: BoxFuture<'a, Result<Value, NodeError>>,
    ) -> BoxFuture<'a, Result<Value, NodeError>>;

    fn sleep<'a>(&'a self, name: &'a str, duration: Duration) -> BoxFuture<'a, ()>;

    /// Called once a run completes; it will not be resumed again.
    fn release_run(&self, _run_id: Uuid) {}
}

// ---------------------------------------------------------------------------
// InlineStepRunner
// ---------------------------------------------------------------------------

/// Awaits work directly; sleeps with `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineStepRunner;

impl DurableStep for InlineStepRunner {
    fn run_step<'a>(
        &'a self,
        _name: &'a str,
        work: BoxFuture<'a, Result<Value, NodeError>>,
    ) -> BoxFuture<'a, Result<Value, NodeError>> {
        work
    }

    fn sleep<'a>(&'a self, _name: &'a str, duration: Duration) -> BoxFuture<'a, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

// ---------------------------------------------------------------------------
// CheckpointStepRunner
// ---------------------------------------------------------------------------

/// Memoises completed step results by name.
///
/// Step names carry the run id, so only a resumed run replays; a new run of
/// the same workflow starts from scratch. Failed steps are not recorded.
/// Sleeps whose step already completed are skipped along with the step
/// itself. A completed run's checkpoints are dropped in
/// [`DurableStep::release_run`].
#[derive(Debug, Default)]
pub struct CheckpointStepRunner {
    completed: DashMap<String, Value>,
}

impl CheckpointStepRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every recorded step result, keyed by step name.
    pub fn checkpoints(&self) -> BTreeMap<String, Value> {
        self.completed
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Drop one checkpoint so the step runs again. Returns whether it existed.
    pub fn forget(&self, name: &str) -> bool {
        self.completed.remove(name).is_some()
    }
}

impl DurableStep for CheckpointStepRunner {
    fn run_step<'a>(
        &'a self,
        name: &'a str,
        work: BoxFuture<'a, Result<Value, NodeError>>,
    ) -> BoxFuture<'a, Result<Value, NodeError>> {
        Box::pin(async move {
            if let Some(hit) = self.completed.get(name) {
                tracing::debug!(step = name, "replaying checkpointed step");
                return Ok(hit.value().clone());
            }

            let value = work.await?;
            self.completed.insert(name.to_string(), value.clone());
            tracing::debug!(step = name, "checkpointed step result");
            Ok(value)
        })
    }

    fn sleep<'a>(&'a self, name: &'a str, duration: Duration) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            tracing::debug!(step = name, secs = duration.as_secs_f64(), "durable sleep");
            tokio::time::sleep(duration).await;
        })
    }

    fn release_run(&self, run_id: Uuid) {
        let prefix = format!("{run_id}:");
        self.completed.retain(|name, _| !name.starts_with(&prefix));
        tracing::debug!(run_id = %run_id, "released run checkpoints");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted(calls: &Arc<AtomicUsize>, value: Value) -> BoxFuture<'static, Result<Value, NodeError>> {
        let calls = Arc::clone(calls);
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        })
    }

    #[tokio::test]
    async fn test_inline_runs_every_time() {
        let runner = InlineStepRunner;
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let out = runner.run_step("r1:n1:A", counted(&calls, json!(1))).await.unwrap();
            assert_eq!(out, json!(1));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_checkpoint_replays_completed_steps() {
        let runner = CheckpointStepRunner::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = runner.run_step("r1:n1:A", counted(&calls, json!("first"))).await.unwrap();
        let second = runner.run_step("r1:n1:A", counted(&calls, json!("second"))).await.unwrap();

        assert_eq!(first, json!("first"));
        assert_eq!(second, json!("first"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(runner.checkpoints().get("r1:n1:A"), Some(&json!("first")));
    }

    #[tokio::test]
    async fn test_checkpoint_skips_failures_and_forget() {
        let runner = CheckpointStepRunner::new();
        let failing: BoxFuture<'static, Result<Value, NodeError>> =
            Box::pin(async { Err(NodeError::Execution("boom".into())) });
        assert!(runner.run_step("r1:n2:B", failing).await.is_err());
        assert!(runner.checkpoints().is_empty());

        let calls = Arc::new(AtomicUsize::new(0));
        runner.run_step("r1:n2:B", counted(&calls, json!(2))).await.unwrap();
        assert!(runner.forget("r1:n2:B"));
        assert!(!runner.forget("r1:n2:B"));
        runner.run_step("r1:n2:B", counted(&calls, json!(3))).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_release_run_drops_only_that_run() {
        let runner = CheckpointStepRunner::new();
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let calls = Arc::new(AtomicUsize::new(0));
        runner
            .run_step(&format!("{a}:n1:A"), counted(&calls, json!(1)))
            .await
            .unwrap();
        runner
            .run_step(&format!("{b}:n1:A"), counted(&calls, json!(2)))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        runner.release_run(a);
        let left: Vec<String> = runner.checkpoints().into_keys().collect();
        assert_eq!(left, vec![format!("{b}:n1:A")]);

        InlineStepRunner.release_run(a);
    }

    #[tokio::test]
    async fn test_sleep_completes() {
        let runner = InlineStepRunner;
        runner.sleep("r1:n3:Wait", Duration::from_millis(1)).await;
        CheckpointStepRunner::new()
            .sleep("r1:n3:Wait", Duration::from_millis(1))
            .await;
    }
}
