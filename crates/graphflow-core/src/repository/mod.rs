//! Collaborator traits (ports).
//!
//! The dispatcher reaches persistence, credentials and the network only
//! through these traits. `graphflow-infra` provides the production
//! implementations; the in-memory ones here back tests and the CLI.

pub mod credential;
pub mod http;
pub mod memory;
pub mod workflow;

pub use credential::{CredentialResolver, InMemoryCredentialStore};
pub use http::{HttpRequestSpec, HttpResponseData, HttpTransport};
pub use memory::InMemoryWorkflowRepository;
pub use workflow::WorkflowRepository;
