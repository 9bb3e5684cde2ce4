//! Run dispatcher: drives one workflow graph from `Pending` to a terminal
//! status.
//!
//! # Execution flow
//!
//! 1. Load the graph and create a `Pending` run record (or reopen a stored
//!    one for [`WorkflowDispatcher::resume`]).
//! 2. Validate the graph and compute the execution order over executable
//!    nodes. A cycle fails the run before any step exists.
//! 3. Seed the expression context from the [`RunSeed`].
//! 4. For each node: check cancellation, resolve configuration, invoke the
//!    executor through the durable-step boundary, record the step.
//! 5. Persist the terminal status. A completed run releases its checkpoints.

use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::BoxFuture;
use graphflow_types::branch::BranchHistory;
use graphflow_types::config::EngineConfig;
use graphflow_types::execution::{ExecutionStep, RunStatus, WorkflowRun};
use graphflow_types::results::{NodeResults, TRIGGER_KEY};
use graphflow_types::workflow::{Node, WorkflowGraph};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{
    DispatchError, ExecutionServices, ExecutorRegistry, NodeContext, NodeError, NodeOutput,
    RunFailure,
};
use crate::expression::{ContextParams, ExpressionContext, ExpressionEngine, process_env};
use crate::graph::{IssueKind, execution_order, validate_workflow_graph};
use crate::repository::WorkflowRepository;

// ---------------------------------------------------------------------------
// Seed / outcome
// ---------------------------------------------------------------------------

/// Initial contents of a run's result map.
#[derive(Debug, Clone, Default)]
pub struct RunSeed {
    /// Stored under `$trigger`; trigger nodes surface it as their output.
    pub trigger: Option<Value>,
    /// Extra entries inserted after the trigger payload, in order.
    pub entries: Vec<(String, Value)>,
}

impl RunSeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trigger(mut self, payload: Value) -> Self {
        self.trigger = Some(payload);
        self
    }

    pub fn with_entry(mut self, name: impl Into<String>, value: Value) -> Self {
        self.entries.push((name.into(), value));
        self
    }
}

/// Everything a finished run leaves behind.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run: WorkflowRun,
    /// Step records of this pass in execution order, including the failed one.
    pub steps: Vec<ExecutionStep>,
    pub results: NodeResults,
    pub branches: BranchHistory,
    /// Set iff `run.status` is `Failed`.
    pub failure: Option<RunFailure>,
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        self.run.status
    }

    pub fn is_completed(&self) -> bool {
        self.run.status == RunStatus::Completed
    }
}

/// Mutable per-run state accumulated while walking the graph.
struct Progress {
    steps: Vec<ExecutionStep>,
    expressions: ExpressionContext,
    failure: Option<RunFailure>,
    cancelled: bool,
    last_output: Option<Value>,
}

/// Result of dispatching one node.
enum NodeRun {
    Completed { input: Value, output: NodeOutput },
    Failed { input: Value, failure: RunFailure },
}

struct RunScope<'g> {
    graph: &'g WorkflowGraph,
    run_id: Uuid,
    engine: ExpressionEngine,
}

// ---------------------------------------------------------------------------
// WorkflowDispatcher
// ---------------------------------------------------------------------------

/// Sequential topological dispatcher.
///
/// Generic over `R: WorkflowRepository` for storage flexibility. One
/// dispatcher can drive many runs concurrently; runs share no mutable state
/// beyond the cancellation-token map.
pub struct WorkflowDispatcher<R: WorkflowRepository> {
    repo: R,
    registry: ExecutorRegistry,
    services: ExecutionServices,
    /// Cancellation tokens keyed by run_id, present while the run is active.
    cancellation_tokens: DashMap<Uuid, CancellationToken>,
}

impl<R: WorkflowRepository> WorkflowDispatcher<R> {
    /// Create a dispatcher with the standard executor registry.
    pub fn new(repo: R, services: ExecutionServices) -> Self {
        Self {
            repo,
            registry: ExecutorRegistry::standard(),
            services,
            cancellation_tokens: DashMap::new(),
        }
    }

    /// Replace the executor registry.
    pub fn with_registry(mut self, registry: ExecutorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn config(&self) -> &EngineConfig {
        &self.services.config
    }

    /// Ids of the runs currently being driven.
    pub fn active_runs(&self) -> Vec<Uuid> {
        self.cancellation_tokens.iter().map(|e| *e.key()).collect()
    }

    /// Request cooperative cancellation of an active run.
    ///
    /// The in-flight node finishes; the next node is not started.
    pub fn cancel(&self, run_id: Uuid) -> Result<(), DispatchError> {
        let token = self
            .cancellation_tokens
            .get(&run_id)
            .ok_or(DispatchError::RunNotActive(run_id))?;
        token.cancel();
        tracing::info!(run_id = %run_id, "workflow run cancellation requested");
        Ok(())
    }

    /// Execute a stored workflow to completion.
    ///
    /// Node failures, unknown node types and cycles end the run `Failed` and
    /// come back as `Ok` with [`RunOutcome::failure`] set. `Err` is reserved
    /// for collaborator failures.
    pub async fn execute(
        &self,
        workflow_id: Uuid,
        seed: RunSeed,
    ) -> Result<RunOutcome, DispatchError> {
        let graph = self
            .repo
            .get_workflow(&workflow_id)
            .await?
            .ok_or(DispatchError::WorkflowNotFound(workflow_id))?;

        let run = WorkflowRun::pending(graph.id);
        self.repo.create_run(&run).await?;

        let token = CancellationToken::new();
        self.cancellation_tokens.insert(run.id, token.clone());
        let run_id = run.id;
        let outcome = self.run_graph(&graph, run, seed, &token).await;
        self.cancellation_tokens.remove(&run_id);
        outcome
    }

    /// Drive a stored failed or cancelled run again under the same run id.
    ///
    /// The seed is not stored with the run, so the caller passes it again.
    /// Steps go through the durable-step boundary under the same names as
    /// before, so a checkpointing runner replays the ones that completed.
    pub async fn resume(&self, run_id: Uuid, seed: RunSeed) -> Result<RunOutcome, DispatchError> {
        let mut run = self
            .repo
            .get_run(&run_id)
            .await?
            .ok_or(DispatchError::RunNotFound(run_id))?;
        if run.status == RunStatus::Completed {
            return Err(DispatchError::RunNotResumable {
                run_id,
                status: run.status,
            });
        }

        let token = CancellationToken::new();
        match self.cancellation_tokens.entry(run_id) {
            Entry::Occupied(_) => {
                return Err(DispatchError::RunNotResumable {
                    run_id,
                    status: RunStatus::Running,
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
            }
        }

        let resumed = async {
            let graph = self
                .repo
                .get_workflow(&run.workflow_id)
                .await?
                .ok_or(DispatchError::WorkflowNotFound(run.workflow_id))?;
            tracing::info!(run_id = %run_id, previous = %run.status, "resuming workflow run");
            run.reopen();
            self.repo.update_run(&run).await?;
            self.run_graph(&graph, run, seed, &token).await
        }
        .await;
        self.cancellation_tokens.remove(&run_id);
        resumed
    }

    async fn run_graph(
        &self,
        graph: &WorkflowGraph,
        mut run: WorkflowRun,
        seed: RunSeed,
        token: &CancellationToken,
    ) -> Result<RunOutcome, DispatchError> {
        let run_id = run.id;

        let report = validate_workflow_graph(&graph.nodes, &graph.edges);
        for issue in &report.warnings {
            tracing::warn!(
                run_id = %run_id,
                kind = ?issue.kind,
                "workflow validation warning: {}",
                issue.message
            );
        }
        for issue in report.errors.iter().filter(|i| i.kind != IssueKind::Cycle) {
            tracing::warn!(
                run_id = %run_id,
                kind = ?issue.kind,
                "workflow validation error: {}",
                issue.message
            );
        }

        let order = match execution_order(&graph.nodes, &graph.edges) {
            Ok(order) => order,
            Err(err) => {
                tracing::warn!(
                    run_id = %run_id,
                    workflow = graph.name.as_str(),
                    error = %err,
                    "workflow graph rejected"
                );
                run.fail(err.to_string());
                self.repo.update_run(&run).await?;
                return Ok(RunOutcome {
                    run,
                    steps: Vec::new(),
                    results: NodeResults::new(),
                    branches: BranchHistory::new(),
                    failure: Some(RunFailure::GraphCycle(err)),
                });
            }
        };

        let timer = Instant::now();
        let progress = match self.drive(graph, &order, &mut run, seed, token).await {
            Ok(progress) => progress,
            Err(e) => {
                // Best-effort failure update; the collaborator error wins.
                run.fail(e.to_string());
                let _ = self.repo.update_run(&run).await;
                return Err(e);
            }
        };

        let duration_ms = timer.elapsed().as_millis() as u64;
        if let Some(failure) = &progress.failure {
            run.fail(failure.to_string());
            tracing::warn!(run_id = %run_id, duration_ms, error = %failure, "workflow run failed");
        } else if progress.cancelled {
            run.cancel();
            tracing::info!(run_id = %run_id, duration_ms, "workflow run cancelled");
        } else {
            run.complete(progress.last_output.clone());
            self.services.durable.release_run(run_id);
            tracing::info!(
                run_id = %run_id,
                duration_ms,
                steps = progress.steps.len(),
                "workflow run completed"
            );
        }
        self.repo.update_run(&run).await?;

        let (results, branches) = progress.expressions.into_parts();
        Ok(RunOutcome {
            run,
            steps: progress.steps,
            results,
            branches,
            failure: progress.failure,
        })
    }

    /// Walk `order`, stopping at the first failure or observed cancellation.
    async fn drive(
        &self,
        graph: &WorkflowGraph,
        order: &[&Node],
        run: &mut WorkflowRun,
        seed: RunSeed,
        token: &CancellationToken,
    ) -> Result<Progress, DispatchError> {
        let run_id = run.id;
        run.status = RunStatus::Running;
        self.repo.update_run(run).await?;

        tracing::info!(
            run_id = %run_id,
            workflow = graph.name.as_str(),
            nodes = order.len(),
            "starting workflow execution"
        );

        let mut results = NodeResults::new();
        if let Some(payload) = seed.trigger {
            results.insert(TRIGGER_KEY, payload);
        }
        for (name, value) in seed.entries {
            results.insert(name, value);
        }

        let mut progress = Progress {
            steps: Vec::new(),
            expressions: ExpressionContext::new(ContextParams {
                results,
                nodes: graph.node_metadata(),
                workflow_id: Some(graph.id),
                workflow_name: graph.name.clone(),
                run_id: Some(run_id),
                run_started_at: Some(run.started_at),
                env: self.services.config.expose_env.then(process_env),
                now: None,
                current_node_id: None,
                branches: BranchHistory::new(),
            }),
            failure: None,
            cancelled: false,
            last_output: None,
        };
        let scope = RunScope {
            graph,
            run_id,
            engine: ExpressionEngine::new(),
        };

        for &node in order {
            if token.is_cancelled() {
                progress.cancelled = true;
                break;
            }

            let name = node.result_key().to_string();
            let started_at = Utc::now();
            let step_timer = Instant::now();
            progress.expressions.enter_node(&node.id, started_at);
            tracing::debug!(
                run_id = %run_id,
                node_id = node.id.as_str(),
                node_type = node.type_tag.as_str(),
                "dispatching node"
            );

            match self.dispatch_node(&scope, node, &progress.expressions).await? {
                NodeRun::Completed { input, output } => {
                    let step = ExecutionStep::completed(
                        run_id,
                        &node.id,
                        &name,
                        &node.type_tag,
                        started_at,
                        input,
                        output.value.clone(),
                    );
                    self.repo.append_step(&step).await?;
                    progress.steps.push(step);
                    progress.expressions.insert_result(name, output.value.clone());

                    if let Some(decision) = output.decision {
                        if node.kind().is_some_and(|k| k.is_control_flow()) {
                            progress.expressions.record_branch(node.id.clone(), decision);
                        } else {
                            tracing::debug!(
                                node_id = node.id.as_str(),
                                "ignoring branch decision from non-control-flow node"
                            );
                        }
                    }

                    tracing::debug!(
                        run_id = %run_id,
                        node_id = node.id.as_str(),
                        duration_ms = step_timer.elapsed().as_millis() as u64,
                        "node completed"
                    );
                    progress.last_output = Some(output.value);
                }
                NodeRun::Failed { input, failure } => {
                    let message = match &failure {
                        RunFailure::Node { error, .. } => error.to_string(),
                        RunFailure::Expression { error, .. } => error.to_string(),
                        other => other.to_string(),
                    };
                    let step = ExecutionStep::failed(
                        run_id,
                        &node.id,
                        &name,
                        &node.type_tag,
                        started_at,
                        input,
                        message.clone(),
                    );
                    self.repo.append_step(&step).await?;
                    progress.steps.push(step);

                    tracing::warn!(
                        run_id = %run_id,
                        node_id = node.id.as_str(),
                        error = message.as_str(),
                        "node failed"
                    );
                    progress.failure = Some(failure);
                    break;
                }
            }
        }

        Ok(progress)
    }

    /// Resolve, look up and invoke a single node.
    async fn dispatch_node(
        &self,
        scope: &RunScope<'_>,
        node: &Node,
        expressions: &ExpressionContext,
    ) -> Result<NodeRun, DispatchError> {
        let config = if self.services.config.strict_expressions {
            match scope
                .engine
                .evaluate_object_strict(&node.configuration, expressions)
            {
                Ok(config) => config,
                Err(error) => {
                    return Ok(NodeRun::Failed {
                        input: node.configuration.clone(),
                        failure: RunFailure::Expression {
                            node_id: node.id.clone(),
                            error,
                        },
                    });
                }
            }
        } else {
            let resolution = scope.engine.evaluate_object(&node.configuration, expressions);
            for error in &resolution.errors {
                tracing::warn!(
                    run_id = %scope.run_id,
                    node_id = node.id.as_str(),
                    error = %error,
                    "expression left unresolved"
                );
            }
            resolution.value
        };

        let Some(executor) = self.registry.resolve(&node.type_tag) else {
            return Ok(NodeRun::Failed {
                input: config,
                failure: RunFailure::UnknownNodeType {
                    node_id: node.id.clone(),
                    type_tag: node.type_tag.clone(),
                },
            });
        };

        let step_name = format!("{}:{}:{}", scope.run_id, node.id, node.result_key());
        let work: BoxFuture<'_, Result<Value, NodeError>> = Box::pin(async {
            let output = executor
                .execute(NodeContext {
                    node,
                    config: &config,
                    results: expressions.results(),
                    expressions,
                    services: &self.services,
                    workflow_id: scope.graph.id,
                    run_id: scope.run_id,
                    step_name: &step_name,
                })
                .await?;
            serde_json::to_value(output)
                .map_err(|e| NodeError::Execution(format!("node output is not serializable: {e}")))
        });

        let result = self.services.durable.run_step(&step_name, work).await;
        match result {
            Ok(raw) => {
                let output: NodeOutput = serde_json::from_value(raw)?;
                Ok(NodeRun::Completed {
                    input: config,
                    output,
                })
            }
            Err(error) => Ok(NodeRun::Failed {
                input: config,
                failure: RunFailure::Node {
                    node_id: node.id.clone(),
                    error,
                },
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
