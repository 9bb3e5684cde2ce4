//! Workflow repository trait definition.

use graphflow_types::error::RepositoryError;
use graphflow_types::execution::{ExecutionStep, WorkflowRun};
use graphflow_types::workflow::WorkflowGraph;
use uuid::Uuid;

/// Storage for workflow graphs, runs and their step history.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
/// Steps are append-only: once written they are never updated.
pub trait WorkflowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Graphs
    // -----------------------------------------------------------------------

    /// Upsert a workflow graph by ID.
    fn save_workflow(
        &self,
        graph: &WorkflowGraph,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_workflow(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowGraph>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    fn create_run(
        &self,
        run: &WorkflowRun,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Replace the stored run with `run`. Fails with `NotFound` for unknown IDs.
    fn update_run(
        &self,
        run: &WorkflowRun,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_run(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowRun>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    fn append_step(
        &self,
        step: &ExecutionStep,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Steps of a run in the order they were appended.
    fn list_steps(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionStep>, RepositoryError>> + Send;
}
