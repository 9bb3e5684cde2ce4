//! Evaluation context: the bindings an expression can see.
//!
//! The dispatcher builds one context per run from the seeded results, node
//! metadata, workflow/run identifiers and an optional environment map, then
//! updates it in place: [`ExpressionContext::enter_node`] before each node,
//! [`ExpressionContext::insert_result`] and
//! [`ExpressionContext::record_branch`] after it. Each update touches only the
//! bindings that changed.

use std::collections::HashMap;
use std::ffi::OsString;

use chrono::{DateTime, SecondsFormat, Utc};
use graphflow_types::branch::{BranchDecision, BranchHistory};
use graphflow_types::results::{NodeResults, is_reserved_key};
use graphflow_types::workflow::NodeMetadata;
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// Root names that always resolve to engine bindings, even when a node
/// shares the name. Such nodes remain reachable as `nodes["name"]` or
/// `$node("name")`.
pub const RESERVED_ROOTS: [&str; 8] = [
    "workflow",
    "execution",
    "env",
    "branch",
    "nodes",
    "input",
    "now",
    "today",
];

/// Inputs for [`ExpressionContext::new`].
#[derive(Debug, Clone, Default)]
pub struct ContextParams {
    pub results: NodeResults,
    /// Every node in declared order; drives `$input` resolution.
    pub nodes: Vec<NodeMetadata>,
    pub workflow_id: Option<Uuid>,
    pub workflow_name: String,
    pub run_id: Option<Uuid>,
    pub run_started_at: Option<DateTime<Utc>>,
    pub env: Option<HashMap<String, String>>,
    /// Clock snapshot; defaults to `Utc::now()`.
    pub now: Option<DateTime<Utc>>,
    pub current_node_id: Option<String>,
    pub branches: BranchHistory,
}

/// Binding set for resolution passes.
#[derive(Debug, Clone)]
pub struct ExpressionContext {
    /// Node results reachable as bare names (reserved roots excluded).
    bindings: Map<String, Value>,
    /// One entry per [`RESERVED_ROOTS`] name.
    reserved: Map<String, Value>,
    results: NodeResults,
    branches: BranchHistory,
    nodes: Vec<NodeMetadata>,
    now: DateTime<Utc>,
}

impl ExpressionContext {
    pub fn new(params: ContextParams) -> Self {
        let now = params.now.unwrap_or_else(Utc::now);

        let env: Map<String, Value> = params
            .env
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();

        let mut reserved = Map::new();
        reserved.insert(
            "workflow".into(),
            json!({
                "id": params.workflow_id.map(|id| id.to_string()),
                "name": params.workflow_name,
            }),
        );
        reserved.insert(
            "execution".into(),
            json!({
                "id": params.run_id.map(|id| id.to_string()),
                "startedAt": params.run_started_at.map(format_timestamp),
            }),
        );
        reserved.insert("env".into(), Value::Object(env));
        reserved.insert(
            "branch".into(),
            json!({
                "last": params.branches.last_value(),
                "all": params.branches.all_value(),
            }),
        );
        reserved.insert("nodes".into(), params.results.to_value());

        let bindings = params
            .results
            .iter()
            .filter(|(k, _)| !RESERVED_ROOTS.contains(k))
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();

        let mut ctx = Self {
            bindings,
            reserved,
            results: params.results,
            branches: params.branches,
            nodes: params.nodes,
            now,
        };
        ctx.set_clock(now);
        ctx.set_input(params.current_node_id.as_deref());
        ctx
    }

    /// Point `input` at the node about to run and refresh the clock.
    pub fn enter_node(&mut self, node_id: &str, now: DateTime<Utc>) {
        self.set_clock(now);
        self.set_input(Some(node_id));
    }

    /// Add or replace one node result.
    pub fn insert_result(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(Value::Object(nodes)) = self.reserved.get_mut("nodes") {
            nodes.insert(name.clone(), value.clone());
        }
        if !RESERVED_ROOTS.contains(&name.as_str()) {
            self.bindings.insert(name.clone(), value.clone());
        }
        self.results.insert(name, value);
    }

    /// Record a control-flow decision; it becomes `branch.last`.
    pub fn record_branch(&mut self, node_id: impl Into<String>, decision: BranchDecision) {
        let node_id = node_id.into();
        if let (Some(Value::Object(branch)), Ok(value)) =
            (self.reserved.get_mut("branch"), serde_json::to_value(&decision))
        {
            if let Some(Value::Object(all)) = branch.get_mut("all") {
                all.insert(node_id.clone(), value.clone());
            }
            branch.insert("last".into(), value);
        }
        self.branches.record(node_id, decision);
    }

    fn set_clock(&mut self, now: DateTime<Utc>) {
        self.now = now;
        self.reserved
            .insert("now".into(), Value::String(format_timestamp(now)));
        self.reserved.insert(
            "today".into(),
            Value::String(now.format("%Y-%m-%d").to_string()),
        );
    }

    fn set_input(&mut self, current_node_id: Option<&str>) {
        let input = resolve_input(&self.results, &self.nodes, current_node_id);
        self.reserved.insert("input".into(), input);
    }

    /// Value of a bare identifier. Reserved roots win over node names.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.reserved.get(name).or_else(|| self.bindings.get(name))
    }

    /// The whole root as a value, for `$`.
    pub fn root_value(&self) -> Value {
        let mut root = self.bindings.clone();
        for (k, v) in &self.reserved {
            root.insert(k.clone(), v.clone());
        }
        Value::Object(root)
    }

    /// `$name` variables: the reserved roots under a `$` prefix.
    pub fn variable(&self, name: &str) -> Option<Value> {
        self.reserved.get(name).cloned()
    }

    /// `$node("name")`: a node's output by name.
    pub fn node(&self, name: &str) -> Option<&Value> {
        self.results.get(name)
    }

    /// Id of the node with the given name, if known.
    pub fn node_id(&self, name: &str) -> Option<&str> {
        self.nodes
            .iter()
            .find(|n| n.name == name)
            .map(|n| n.id.as_str())
    }

    pub fn input(&self) -> &Value {
        self.reserved.get("input").unwrap_or(&Value::Null)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn results(&self) -> &NodeResults {
        &self.results
    }

    pub fn branches(&self) -> &BranchHistory {
        &self.branches
    }

    /// Hand back the accumulated results and branch history.
    pub fn into_parts(self) -> (NodeResults, BranchHistory) {
        (self.results, self.branches)
    }
}

/// Output of the closest preceding node with a result, else the most recent
/// non-reserved entry, else `{}`.
fn resolve_input(results: &NodeResults, nodes: &[NodeMetadata], current: Option<&str>) -> Value {
    if let Some(position) = current.and_then(|id| nodes.iter().position(|n| n.id == id)) {
        let preceding = nodes[..position]
            .iter()
            .rev()
            .filter(|n| !is_reserved_key(&n.name))
            .find_map(|n| results.get(&n.name));
        if let Some(value) = preceding {
            return value.clone();
        }
    }

    results
        .latest_public()
        .map(|(_, v)| v.clone())
        .unwrap_or_else(|| Value::Object(Map::new()))
}

/// Snapshot of the process environment for the `env` root.
///
/// Variables whose name or value is not valid UTF-8 are left out.
pub fn process_env() -> HashMap<String, String> {
    utf8_vars(std::env::vars_os())
}

pub fn utf8_vars(vars: impl IntoIterator<Item = (OsString, OsString)>) -> HashMap<String, String> {
    vars.into_iter()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}

pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphflow_types::branch::BranchDecision;
    use graphflow_types::results::TRIGGER_KEY;

    fn meta(id: &str, name: &str) -> NodeMetadata {
        NodeMetadata {
            id: id.to_string(),
            name: name.to_string(),
            type_tag: "SET".to_string(),
        }
    }

    fn results(entries: &[(&str, Value)]) -> NodeResults {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_input_is_closest_preceding_result() {
        let ctx = ExpressionContext::new(ContextParams {
            results: results(&[("A", json!(1)), ("B", json!(2))]),
            nodes: vec![meta("a", "A"), meta("b", "B"), meta("c", "C")],
            current_node_id: Some("c".into()),
            ..ContextParams::default()
        });
        assert_eq!(ctx.input(), &json!(2));
        assert_eq!(ctx.variable("input"), Some(json!(2)));
    }

    #[test]
    fn test_input_skips_nodes_without_results() {
        // B sits between A and C but has not produced output (e.g. skipped).
        let ctx = ExpressionContext::new(ContextParams {
            results: results(&[("A", json!("a-out"))]),
            nodes: vec![meta("a", "A"), meta("b", "B"), meta("c", "C")],
            current_node_id: Some("c".into()),
            ..ContextParams::default()
        });
        assert_eq!(ctx.input(), &json!("a-out"));
    }

    #[test]
    fn test_input_falls_back_to_latest_public_entry() {
        let ctx = ExpressionContext::new(ContextParams {
            results: results(&[("X", json!(1)), ("Y", json!(2)), (TRIGGER_KEY, json!(3))]),
            ..ContextParams::default()
        });
        assert_eq!(ctx.input(), &json!(2));
    }

    #[test]
    fn test_input_empty_object_without_results() {
        let ctx = ExpressionContext::new(ContextParams::default());
        assert_eq!(ctx.input(), &json!({}));
    }

    #[test]
    fn test_reserved_roots_win_over_node_names() {
        let ctx = ExpressionContext::new(ContextParams {
            results: results(&[("input", json!("node named input")), ("Fetch", json!(5))]),
            ..ContextParams::default()
        });
        assert_eq!(ctx.lookup("Fetch"), Some(&json!(5)));
        assert_ne!(ctx.lookup("input"), Some(&json!("node named input")));
        assert_eq!(ctx.lookup("nodes").unwrap()["input"], json!("node named input"));
        assert_eq!(ctx.node("input"), Some(&json!("node named input")));
        assert_eq!(ctx.root_value()["Fetch"], json!(5));
    }

    #[test]
    fn test_metadata_bindings() {
        let wf = Uuid::now_v7();
        let run = Uuid::now_v7();
        let now = DateTime::parse_from_rfc3339("2024-03-05T10:20:30Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut branches = BranchHistory::new();
        branches.record("if-1", BranchDecision::new("true"));

        let ctx = ExpressionContext::new(ContextParams {
            workflow_id: Some(wf),
            workflow_name: "Digest".into(),
            run_id: Some(run),
            run_started_at: Some(now),
            env: Some(HashMap::from([("REGION".to_string(), "eu".to_string())])),
            now: Some(now),
            branches,
            nodes: vec![meta("n1", "Fetch")],
            ..ContextParams::default()
        });

        let root = ctx.root_value();
        assert_eq!(root["workflow"]["name"], "Digest");
        assert_eq!(root["workflow"]["id"], wf.to_string());
        assert_eq!(root["execution"]["id"], run.to_string());
        assert_eq!(root["execution"]["startedAt"], "2024-03-05T10:20:30.000Z");
        assert_eq!(root["env"]["REGION"], "eu");
        assert_eq!(root["today"], "2024-03-05");
        assert_eq!(root["branch"]["last"]["branch"], "true");
        assert_eq!(root["branch"]["all"]["if-1"]["branch"], "true");
        assert_eq!(ctx.node_id("Fetch"), Some("n1"));
        assert!(ctx.node("Missing").is_none());
    }

    #[test]
    fn test_env_empty_unless_given() {
        let ctx = ExpressionContext::new(ContextParams::default());
        for name in RESERVED_ROOTS {
            assert!(ctx.variable(name).is_some(), "${name} should be bound");
        }
        assert_eq!(ctx.variable("env"), Some(json!({})));
        assert_eq!(ctx.lookup("branch").unwrap()["last"], Value::Null);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_variables_are_skipped() {
        use std::os::unix::ffi::OsStringExt;

        let bad = || OsString::from_vec(vec![b'x', 0xff]);
        let vars = utf8_vars([
            (OsString::from("HOME"), OsString::from("/root")),
            (bad(), OsString::from("name is bad")),
            (OsString::from("VALUE_IS_BAD"), bad()),
        ]);
        assert_eq!(vars.len(), 1);
        assert_eq!(vars["HOME"], "/root");
    }

    #[test]
    fn test_process_env_snapshot() {
        let vars = process_env();
        assert_eq!(vars.get("PATH"), std::env::var("PATH").ok().as_ref());
    }

    #[test]
    fn test_updates_in_place_match_a_fresh_build() {
        let nodes = vec![meta("a", "A"), meta("i", "Gate"), meta("c", "C")];
        let start = DateTime::parse_from_rfc3339("2024-03-05T10:20:30Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut ctx = ExpressionContext::new(ContextParams {
            results: results(&[(TRIGGER_KEY, json!({ "id": 7 }))]),
            nodes: nodes.clone(),
            now: Some(start),
            ..ContextParams::default()
        });

        ctx.enter_node("a", start);
        assert_eq!(ctx.input(), &json!({}));
        ctx.insert_result("A", json!({ "n": 1 }));
        ctx.insert_result("nodes", json!("shadowed"));

        let later = start + chrono::TimeDelta::days(1);
        ctx.enter_node("i", later);
        assert_eq!(ctx.input(), &json!({ "n": 1 }));
        ctx.insert_result("Gate", json!(true));
        ctx.record_branch("i", BranchDecision::new("true"));
        ctx.enter_node("c", later);

        let mut branches = BranchHistory::new();
        branches.record("i", BranchDecision::new("true"));
        let fresh = ExpressionContext::new(ContextParams {
            results: ctx.results().clone(),
            nodes,
            now: Some(later),
            current_node_id: Some("c".into()),
            branches,
            ..ContextParams::default()
        });

        assert_eq!(ctx.root_value(), fresh.root_value());
        assert_eq!(ctx.input(), &json!(true));
        assert_eq!(ctx.lookup("A"), Some(&json!({ "n": 1 })));
        assert_eq!(ctx.lookup("nodes").unwrap()["nodes"], json!("shadowed"));
        assert_eq!(ctx.lookup("today"), Some(&json!("2024-03-06")));
        assert_eq!(ctx.lookup("branch").unwrap()["last"]["branch"], "true");
        assert_eq!(ctx.now(), later);

        let (results, history) = ctx.into_parts();
        assert_eq!(results.len(), 4);
        assert_eq!(history.get("i").map(|d| d.branch.as_str()), Some("true"));
    }
}
