use thiserror::Error;

/// Errors returned by a credential collaborator.
///
/// Passed through unchanged as the failing node's error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("credential '{0}' not found")]
    NotFound(String),

    #[error("access denied to credential '{0}'")]
    AccessDenied(String),

    #[error("credential backend error: {0}")]
    Backend(String),
}

/// Errors returned by a persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}
