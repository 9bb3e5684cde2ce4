//! Shared domain types for graphflow.
//!
//! This crate contains the types exchanged between the engine and its
//! collaborators: workflow graphs, runs and steps, branch decisions, engine
//! configuration and the shared error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod branch;
pub mod config;
pub mod error;
pub mod execution;
pub mod results;
pub mod workflow;
