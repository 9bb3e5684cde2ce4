//! `graphflow run`: execute a workflow document in-process.
//!
//! Persistence is in-memory for the lifetime of the command; HTTP goes through
//! reqwest and credentials come from `GRAPHFLOW_CRED_*` variables.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use graphflow_core::executor::{
    ExecutionServices, InlineStepRunner, RunOutcome, RunSeed, WorkflowDispatcher,
};
use graphflow_core::repository::InMemoryWorkflowRepository;
use graphflow_infra::config::load_engine_config;
use graphflow_infra::credential::EnvCredentialResolver;
use graphflow_infra::http::ReqwestTransport;
use graphflow_types::execution::{ExecutionStep, RunStatus, StepStatus};
use serde_json::{Value, json};

use super::{RunArgs, read_workflow};

pub async fn handle_run(args: RunArgs, json: bool) -> Result<()> {
    let mut config = load_engine_config(&args.config).await;
    if args.strict {
        config.strict_expressions = true;
    }

    let payload: Option<Value> = args
        .payload
        .as_deref()
        .map(serde_json::from_str::<Value>)
        .transpose()
        .context("--payload must be valid JSON")?;

    let graph = read_workflow(&args.file).await?;
    let workflow_id = graph.id;
    let workflow_name = graph.name.clone();

    let transport = ReqwestTransport::new(
        &config.user_agent,
        Duration::from_secs(config.http_timeout_secs),
    )?;
    let services = ExecutionServices {
        http: Arc::new(transport),
        credentials: Arc::new(EnvCredentialResolver::new()),
        durable: Arc::new(InlineStepRunner),
        config,
    };
    let repo = InMemoryWorkflowRepository::new().with_workflow(graph);
    let dispatcher = WorkflowDispatcher::new(repo, services);

    let mut seed = RunSeed::new();
    if let Some(payload) = payload {
        seed = seed.with_trigger(payload);
    }

    let execution = dispatcher.execute(workflow_id, seed);
    tokio::pin!(execution);

    // Ctrl+C cancels the run between nodes.
    let mut cancel_requested = false;
    let outcome = loop {
        tokio::select! {
            outcome = &mut execution => break outcome,
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                cancel_requested = true;
                if !json {
                    eprintln!("  {} Cancelling after the current node...", style("⏹").yellow());
                }
                for run_id in dispatcher.active_runs() {
                    let _ = dispatcher.cancel(run_id);
                }
            }
        }
    };
    let outcome =
        outcome.with_context(|| format!("Failed to execute workflow '{workflow_name}'"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome_json(&outcome))?);
    } else {
        print_outcome(&workflow_name, &outcome);
    }

    if let Some(failure) = &outcome.failure {
        bail!("workflow '{workflow_name}' failed: {failure}");
    }
    Ok(())
}

fn outcome_json(outcome: &RunOutcome) -> Value {
    json!({
        "run": outcome.run,
        "steps": outcome.steps,
        "results": outcome.results,
        "branches": outcome.branches,
        "failure": outcome.failure.as_ref().map(|f| f.to_string()),
    })
}

fn step_duration(step: &ExecutionStep) -> String {
    step.completed_at
        .map(|end| format!("{}ms", (end - step.started_at).num_milliseconds()))
        .unwrap_or_else(|| "-".to_string())
}

fn summary(step: &ExecutionStep) -> String {
    let text = match (&step.error, &step.output) {
        (Some(error), _) => error.clone(),
        (None, Some(output)) => output.to_string(),
        (None, None) => "-".to_string(),
    };
    if text.chars().count() > 60 {
        format!("{}…", text.chars().take(59).collect::<String>())
    } else {
        text
    }
}

fn print_outcome(workflow_name: &str, outcome: &RunOutcome) {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Node").fg(Color::Cyan),
            Cell::new("Type"),
            Cell::new("Status"),
            Cell::new("Duration"),
            Cell::new("Output / Error"),
        ]);

    for step in &outcome.steps {
        let status = match step.status {
            StepStatus::Completed => Cell::new("completed").fg(Color::Green),
            StepStatus::Failed => Cell::new("failed").fg(Color::Red),
        };
        table.add_row(vec![
            Cell::new(&step.node_name),
            Cell::new(&step.type_tag),
            status,
            Cell::new(step_duration(step)),
            Cell::new(summary(step)),
        ]);
    }

    let status = match outcome.run.status {
        RunStatus::Completed => style(outcome.run.status.to_string()).green(),
        RunStatus::Failed => style(outcome.run.status.to_string()).red(),
        _ => style(outcome.run.status.to_string()).yellow(),
    };

    println!();
    println!(
        "  {} Run {} of '{}': {}",
        style("⚡").bold(),
        style(outcome.run.id).dim(),
        style(workflow_name).cyan(),
        status
    );
    println!();
    if !outcome.steps.is_empty() {
        println!("{table}");
        println!();
    }
    if let Some(error) = &outcome.run.error {
        println!("  {} {}", style("✗").red(), error);
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphflow_core::executor::RunFailure;
    use graphflow_types::branch::BranchHistory;
    use graphflow_types::execution::WorkflowRun;
    use graphflow_types::results::NodeResults;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[test]
    fn summary_truncates_long_output() {
        let step = ExecutionStep::completed(
            Uuid::nil(),
            "s",
            "Shape",
            "SET",
            chrono::Utc::now(),
            json!({}),
            json!({ "text": "x".repeat(200) }),
        );
        let text = summary(&step);
        assert_eq!(text.chars().count(), 60);
        assert!(text.ends_with('…'));
    }

    #[test]
    fn outcome_json_includes_failure_message() {
        let mut run = WorkflowRun::pending(Uuid::nil());
        run.fail("boom");
        let outcome = RunOutcome {
            run,
            steps: Vec::new(),
            results: NodeResults::new(),
            branches: BranchHistory::new(),
            failure: Some(RunFailure::UnknownNodeType {
                node_id: "f".into(),
                type_tag: "FAX".into(),
            }),
        };
        let v = outcome_json(&outcome);
        assert_eq!(v["failure"], "unknown node type 'FAX' on node 'f'");
        assert_eq!(v["run"]["status"], "failed");
    }

    #[tokio::test]
    async fn runs_workflow_document() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("greet.json");
        tokio::fs::write(
            &path,
            r#"{
                "nodes": [
                    { "id": "t", "type": "MANUAL_TRIGGER", "name": "Start" },
                    { "id": "s", "type": "SET", "name": "Greet",
                      "configuration": { "values": { "msg": "Hello {{ input.name }}" } } }
                ],
                "edges": [ { "source": "t", "target": "s" } ]
            }"#,
        )
        .await
        .unwrap();

        let args = RunArgs {
            file: path,
            payload: Some(r#"{"name":"John"}"#.into()),
            strict: true,
            config: tmp.path().join("missing.toml"),
        };
        handle_run(args, true).await.unwrap();
    }
}
