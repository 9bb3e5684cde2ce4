//! `graphflow validate`: structural report for a workflow document.

use std::path::Path;

use anyhow::{Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use graphflow_core::graph::{GraphIssue, validate_workflow_graph};

use super::read_workflow;

pub async fn handle_validate(file: &Path, json: bool) -> Result<()> {
    let graph = read_workflow(file).await?;
    let report = validate_workflow_graph(&graph.nodes, &graph.edges);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        println!(
            "  {} Workflow '{}' ({} nodes, {} edges)",
            style("🔍").bold(),
            style(&graph.name).cyan(),
            graph.nodes.len(),
            graph.edges.len()
        );
        println!();

        if report.errors.is_empty() && report.warnings.is_empty() {
            println!("  {} No issues found", style("✓").green());
        } else {
            println!("{}", issue_table(&report.errors, &report.warnings));
        }
        println!();
    }

    if !report.is_valid {
        bail!(
            "workflow '{}' has {} error(s)",
            graph.name,
            report.errors.len()
        );
    }
    Ok(())
}

fn issue_table(errors: &[GraphIssue], warnings: &[GraphIssue]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Severity").fg(Color::Cyan),
            Cell::new("Kind"),
            Cell::new("Nodes"),
            Cell::new("Message"),
        ]);

    let rows = errors
        .iter()
        .map(|i| (Cell::new("error").fg(Color::Red), i))
        .chain(
            warnings
                .iter()
                .map(|i| (Cell::new("warning").fg(Color::Yellow), i)),
        );
    for (severity, issue) in rows {
        let nodes = if issue.node_ids.is_empty() {
            "-".to_string()
        } else {
            issue.node_ids.join(", ")
        };
        table.add_row(vec![
            severity,
            Cell::new(format!("{:?}", issue.kind)),
            Cell::new(nodes),
            Cell::new(&issue.message),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn write(dir: &TempDir, body: &str) -> std::path::PathBuf {
        let path = dir.path().join("flow.json");
        tokio::fs::write(&path, body).await.unwrap();
        path
    }

    #[tokio::test]
    async fn valid_workflow_passes() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            &tmp,
            r#"{
                "nodes": [
                    { "id": "t", "type": "MANUAL_TRIGGER", "name": "Start" },
                    { "id": "s", "type": "SET", "name": "Shape" }
                ],
                "edges": [ { "source": "t", "target": "s" } ]
            }"#,
        )
        .await;
        handle_validate(&path, true).await.unwrap();
    }

    #[tokio::test]
    async fn cyclic_workflow_fails() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            &tmp,
            r#"{
                "nodes": [
                    { "id": "t", "type": "MANUAL_TRIGGER", "name": "Start" },
                    { "id": "a", "type": "SET", "name": "A" },
                    { "id": "b", "type": "SET", "name": "B" }
                ],
                "edges": [
                    { "source": "t", "target": "a" },
                    { "source": "a", "target": "b" },
                    { "source": "b", "target": "a" }
                ]
            }"#,
        )
        .await;
        let err = handle_validate(&path, true).await.unwrap_err();
        assert!(err.to_string().contains("error(s)"));
    }
}
