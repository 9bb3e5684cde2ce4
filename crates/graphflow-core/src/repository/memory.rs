//! In-memory `WorkflowRepository`.
//!
//! Backs the CLI `run` command and the dispatcher tests. Cloning shares the
//! same storage, so a test can hand one clone to the dispatcher and inspect
//! the other.

use std::sync::Arc;

use dashmap::DashMap;
use graphflow_types::error::RepositoryError;
use graphflow_types::execution::{ExecutionStep, WorkflowRun};
use graphflow_types::workflow::WorkflowGraph;
use uuid::Uuid;

use super::workflow::WorkflowRepository;

#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkflowRepository {
    workflows: Arc<DashMap<Uuid, WorkflowGraph>>,
    runs: Arc<DashMap<Uuid, WorkflowRun>>,
    steps: Arc<DashMap<Uuid, Vec<ExecutionStep>>>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style seeding with one graph.
    pub fn with_workflow(self, graph: WorkflowGraph) -> Self {
        self.workflows.insert(graph.id, graph);
        self
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }
}

impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn save_workflow(&self, graph: &WorkflowGraph) -> Result<(), RepositoryError> {
        self.workflows.insert(graph.id, graph.clone());
        Ok(())
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<WorkflowGraph>, RepositoryError> {
        Ok(self.workflows.get(id).map(|g| g.value().clone()))
    }

    async fn create_run(&self, run: &WorkflowRun) -> Result<(), RepositoryError> {
        if self.runs.contains_key(&run.id) {
            return Err(RepositoryError::Storage(format!(
                "run {} already exists",
                run.id
            )));
        }
        self.runs.insert(run.id, run.clone());
        self.steps.entry(run.id).or_default();
        Ok(())
    }

    async fn update_run(&self, run: &WorkflowRun) -> Result<(), RepositoryError> {
        match self.runs.get_mut(&run.id) {
            Some(mut stored) => {
                *stored = run.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("run {}", run.id))),
        }
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<WorkflowRun>, RepositoryError> {
        Ok(self.runs.get(run_id).map(|r| r.value().clone()))
    }

    async fn append_step(&self, step: &ExecutionStep) -> Result<(), RepositoryError> {
        if !self.runs.contains_key(&step.run_id) {
            return Err(RepositoryError::NotFound(format!("run {}", step.run_id)));
        }
        self.steps.entry(step.run_id).or_default().push(step.clone());
        Ok(())
    }

    async fn list_steps(&self, run_id: &Uuid) -> Result<Vec<ExecutionStep>, RepositoryError> {
        Ok(self
            .steps
            .get(run_id)
            .map(|s| s.value().clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use graphflow_types::execution::RunStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_workflow_roundtrip() {
        let repo = InMemoryWorkflowRepository::new();
        let graph = WorkflowGraph::new("Digest");
        repo.save_workflow(&graph).await.unwrap();

        let loaded = repo.get_workflow(&graph.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Digest");
        assert!(repo.get_workflow(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        let repo = InMemoryWorkflowRepository::new();
        let mut run = WorkflowRun::pending(Uuid::now_v7());
        repo.create_run(&run).await.unwrap();
        assert!(repo.create_run(&run).await.is_err());

        run.complete(Some(json!({ "ok": true })));
        repo.update_run(&run).await.unwrap();

        let stored = repo.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Completed);
        assert_eq!(stored.result, Some(json!({ "ok": true })));
        assert_eq!(repo.run_count(), 1);
    }

    #[tokio::test]
    async fn test_update_unknown_run_fails() {
        let repo = InMemoryWorkflowRepository::new();
        let run = WorkflowRun::pending(Uuid::now_v7());
        let err = repo.update_run(&run).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_steps_append_in_order() {
        let repo = InMemoryWorkflowRepository::new();
        let run = WorkflowRun::pending(Uuid::now_v7());
        repo.create_run(&run).await.unwrap();

        for name in ["A", "B", "C"] {
            let step = ExecutionStep::completed(
                run.id,
                &name.to_lowercase(),
                name,
                "SET",
                Utc::now(),
                json!({}),
                json!(name),
            );
            repo.append_step(&step).await.unwrap();
        }

        let steps = repo.list_steps(&run.id).await.unwrap();
        let names: Vec<&str> = steps.iter().map(|s| s.node_name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert!(repo.list_steps(&Uuid::now_v7()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clones_share_storage() {
        let repo = InMemoryWorkflowRepository::new();
        let other = repo.clone();
        let run = WorkflowRun::pending(Uuid::now_v7());
        repo.create_run(&run).await.unwrap();
        assert!(other.get_run(&run.id).await.unwrap().is_some());
    }
}
