//! Infrastructure layer for graphflow.
//!
//! Implementations of the collaborator traits defined in `graphflow-core`:
//! the reqwest-backed HTTP transport and the environment credential
//! resolver, plus the engine configuration file loader.

pub mod config;
pub mod credential;
pub mod http;
