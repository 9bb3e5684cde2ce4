//! Workflow execution engine for graphflow.
//!
//! - [`graph`]: cycle detection, topological scheduling and structural
//!   validation over a node/edge set.
//! - [`expression`]: the `{{ }}` expression language, its evaluation context
//!   and the deep configuration resolver.
//! - [`executor`]: the closed node-executor registry and the run dispatcher.
//! - [`repository`]: collaborator traits (persistence, credentials, HTTP)
//!   plus in-memory implementations.
//!
//! This crate depends only on `graphflow-types`, never on `graphflow-infra`
//! or any IO crate.

pub mod executor;
pub mod expression;
pub mod graph;
pub mod repository;
