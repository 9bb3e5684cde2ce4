//! CLI command definitions for the `graphflow` binary.

pub mod run;
pub mod validate;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use graphflow_types::workflow::WorkflowGraph;
use serde_json::Value;
use uuid::Uuid;

/// Validate and run node-graph workflows.
#[derive(Parser, Debug)]
#[command(name = "graphflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed logs on stderr (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "GRAPHFLOW_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check a workflow document for cycles and structural problems.
    Validate {
        /// Path to the workflow JSON document.
        file: PathBuf,
    },

    /// Execute a workflow document in-process.
    Run(RunArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the workflow JSON document.
    pub file: PathBuf,

    /// JSON trigger payload.
    #[arg(long)]
    pub payload: Option<String>,

    /// Fail a node on its first expression error.
    #[arg(long)]
    pub strict: bool,

    /// Engine configuration file.
    #[arg(long, default_value = graphflow_infra::config::DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,
}

/// Read an editor-exported workflow document. A missing `id` gets a fresh
/// UUIDv7 and a missing `name` falls back to the file stem.
pub async fn read_workflow(path: &Path) -> Result<WorkflowGraph> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut doc: Value = serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;

    if let Value::Object(map) = &mut doc {
        map.entry("id")
            .or_insert_with(|| Value::String(Uuid::now_v7().to_string()));
        map.entry("name").or_insert_with(|| {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "workflow".to_string());
            Value::String(stem)
        });
    }

    serde_json::from_value(doc)
        .with_context(|| format!("Invalid workflow document {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_with_flags() {
        let cli = Cli::try_parse_from([
            "graphflow",
            "-vv",
            "--json",
            "run",
            "flow.json",
            "--payload",
            r#"{"name":"John"}"#,
            "--strict",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        assert!(cli.json);
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.file, PathBuf::from("flow.json"));
        assert_eq!(args.payload.as_deref(), Some(r#"{"name":"John"}"#));
        assert!(args.strict);
        assert_eq!(args.config, PathBuf::from("graphflow.toml"));
    }

    #[test]
    fn validate_requires_file() {
        assert!(Cli::try_parse_from(["graphflow", "validate"]).is_err());
    }

    #[tokio::test]
    async fn read_workflow_fills_id_and_name() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("orders.json");
        tokio::fs::write(
            &path,
            r#"{
                "nodes": [ { "id": "t", "type": "MANUAL_TRIGGER", "name": "Start" } ],
                "edges": []
            }"#,
        )
        .await
        .unwrap();

        let graph = read_workflow(&path).await.unwrap();
        assert_eq!(graph.name, "orders");
        assert_eq!(graph.nodes.len(), 1);
        assert!(!graph.id.is_nil());
    }

    #[tokio::test]
    async fn read_workflow_reports_the_path() {
        let tmp = tempfile::TempDir::new().unwrap();
        let missing = tmp.path().join("nope.json");
        let err = read_workflow(&missing).await.unwrap_err();
        assert!(err.to_string().contains("nope.json"));

        let bad = tmp.path().join("bad.json");
        tokio::fs::write(&bad, r#"{ "id": "not-a-uuid" }"#).await.unwrap();
        let err = read_workflow(&bad).await.unwrap_err();
        assert!(err.to_string().contains("Invalid workflow document"));
    }
}
