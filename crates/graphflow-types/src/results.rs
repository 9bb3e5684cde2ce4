//! The run-scoped node-result map.
//!
//! `NodeResults` maps node name to that node's last output, in insertion
//! order. Re-inserting a name replaces its value and moves it to the most
//! recent position, so "the latest entry" always means the node that wrote
//! last.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key under which the dispatcher seeds the trigger payload.
pub const TRIGGER_KEY: &str = "$trigger";

/// Whether `key` is reserved for engine-internal entries.
///
/// Reserved entries are readable by expressions but skipped by `$input`
/// resolution.
pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with('$') || key.starts_with('_')
}

/// Insertion-ordered `node name -> last output` map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct NodeResults {
    entries: Vec<(String, Value)>,
}

impl NodeResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `name`, moving it to the most recent position.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        self.entries.retain(|(k, _)| *k != name);
        self.entries.push((name, value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The most recently written entry whose key is not reserved.
    pub fn latest_public(&self) -> Option<(&str, &Value)> {
        self.iter().rev().find(|(k, _)| !is_reserved_key(k))
    }

    /// All entries as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(self.clone().into())
    }
}

impl From<Map<String, Value>> for NodeResults {
    fn from(map: Map<String, Value>) -> Self {
        let mut results = NodeResults::new();
        for (k, v) in map {
            results.insert(k, v);
        }
        results
    }
}

impl From<NodeResults> for Map<String, Value> {
    fn from(results: NodeResults) -> Self {
        results.entries.into_iter().collect()
    }
}

impl FromIterator<(String, Value)> for NodeResults {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut results = NodeResults::new();
        for (k, v) in iter {
            results.insert(k, v);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_last_write_wins_and_moves_to_end() {
        let mut results = NodeResults::new();
        results.insert("A", json!(1));
        results.insert("B", json!(2));
        results.insert("A", json!(3));

        assert_eq!(results.len(), 2);
        assert_eq!(results.get("A"), Some(&json!(3)));
        let keys: Vec<&str> = results.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["B", "A"]);
    }

    #[test]
    fn test_latest_public_skips_reserved() {
        let mut results = NodeResults::new();
        assert!(results.latest_public().is_none());

        results.insert("Fetch", json!({ "ok": true }));
        results.insert(TRIGGER_KEY, json!({ "id": 7 }));
        results.insert("_internal", json!(null));

        let (name, value) = results.latest_public().unwrap();
        assert_eq!(name, "Fetch");
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn test_reserved_keys() {
        assert!(is_reserved_key("$trigger"));
        assert!(is_reserved_key("_meta"));
        assert!(!is_reserved_key("Set Fields"));
    }

    #[test]
    fn test_to_value_object() {
        let results: NodeResults = vec![
            ("A".to_string(), json!(1)),
            ("B".to_string(), json!("x")),
        ]
        .into_iter()
        .collect();
        assert_eq!(results.to_value(), json!({ "A": 1, "B": "x" }));
    }
}
