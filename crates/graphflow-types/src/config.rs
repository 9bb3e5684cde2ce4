//! Engine configuration for graphflow.
//!
//! `EngineConfig` maps the top level of `graphflow.toml`. Every
//! field has a default so an empty file (or no file) is valid.

use serde::{Deserialize, Serialize};

/// Runtime knobs for the dispatcher and its built-in executors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Turn the first expression error in a node's configuration into a
    /// node failure instead of keeping the raw string.
    #[serde(default)]
    pub strict_expressions: bool,

    /// Expose the process environment to expressions as `env` / `$env`.
    #[serde(default)]
    pub expose_env: bool,

    /// Upper bound on items a LOOP node will accept.
    #[serde(default = "default_max_loop_items")]
    pub max_loop_items: usize,

    /// Upper bound on a single WAIT node's delay, in seconds.
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,

    /// Default HTTP_REQUEST timeout when the node does not set one.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_max_loop_items() -> usize {
    10_000
}

fn default_max_wait_secs() -> u64 {
    3600
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    "graphflow/0.1".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strict_expressions: false,
            expose_env: false,
            max_loop_items: default_max_loop_items(),
            max_wait_secs: default_max_wait_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}
