//! Run and step records produced by the dispatcher.
//!
//! A [`WorkflowRun`] owns an append-only sequence of [`ExecutionStep`]s. Both
//! are persisted through the repository collaborator; step records are never
//! rewritten once appended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Overall status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Status of a single recorded step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
}

// ---------------------------------------------------------------------------
// Workflow run
// ---------------------------------------------------------------------------

/// One instantiated, time-bounded traversal of a workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    /// UUIDv7 run ID.
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Output of the final executed node (set on completion).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowRun {
    /// A fresh `Pending` run for the given workflow.
    pub fn pending(workflow_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            status: RunStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// Mark the run `Completed` with the final node's output.
    pub fn complete(&mut self, result: Option<Value>) {
        self.status = RunStatus::Completed;
        self.result = result;
        self.completed_at = Some(Utc::now());
    }

    /// Mark the run `Failed` with a message.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    pub fn cancel(&mut self) {
        self.status = RunStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    /// Put a failed or cancelled run back to `Pending` so it can be driven
    /// again under the same id.
    pub fn reopen(&mut self) {
        self.status = RunStatus::Pending;
        self.completed_at = None;
        self.result = None;
        self.error = None;
    }
}

// ---------------------------------------------------------------------------
// Execution step
// ---------------------------------------------------------------------------

/// The recorded input/output/status of one node's execution within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
    pub id: Uuid,
    pub run_id: Uuid,
    pub node_id: String,
    pub node_name: String,
    pub type_tag: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Resolved configuration the executor received.
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionStep {
    /// Build a completed step record.
    pub fn completed(
        run_id: Uuid,
        node_id: &str,
        node_name: &str,
        type_tag: &str,
        started_at: DateTime<Utc>,
        input: Value,
        output: Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            run_id,
            node_id: node_id.to_string(),
            node_name: node_name.to_string(),
            type_tag: type_tag.to_string(),
            status: StepStatus::Completed,
            started_at,
            completed_at: Some(Utc::now()),
            input,
            output: Some(output),
            error: None,
        }
    }

    /// Build a failed step record.
    pub fn failed(
        run_id: Uuid,
        node_id: &str,
        node_name: &str,
        type_tag: &str,
        started_at: DateTime<Utc>,
        input: Value,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            run_id,
            node_id: node_id.to_string(),
            node_name: node_name.to_string(),
            type_tag: type_tag.to_string(),
            status: StepStatus::Failed,
            started_at,
            completed_at: Some(Utc::now()),
            input,
            output: None,
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
