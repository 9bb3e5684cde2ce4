//! Credential resolution for nodes that reference stored secrets.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use graphflow_types::error::CredentialError;
use uuid::Uuid;

/// Resolves a credential ID to its key/value fields (`token`, `username`,
/// `password`, `headerName`, `headerValue`, ...).
///
/// Object-safe so executors can hold it as `Arc<dyn CredentialResolver>`.
pub trait CredentialResolver: Send + Sync {
    fn resolve<'a>(
        &'a self,
        workflow_id: Uuid,
        credential_id: &'a str,
    ) -> BoxFuture<'a, Result<HashMap<String, String>, CredentialError>>;
}

#[derive(Debug, Clone)]
struct StoredCredential {
    /// Restricts the credential to one workflow when set.
    workflow_id: Option<Uuid>,
    fields: HashMap<String, String>,
}

/// Credential store held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCredentialStore {
    entries: Arc<DashMap<String, StoredCredential>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a credential usable from any workflow.
    pub fn insert<K, V>(&self, credential_id: impl Into<String>, fields: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.store(credential_id.into(), None, fields);
    }

    /// Store a credential usable only from `workflow_id`.
    pub fn insert_scoped<K, V>(
        &self,
        workflow_id: Uuid,
        credential_id: impl Into<String>,
        fields: impl IntoIterator<Item = (K, V)>,
    ) where
        K: Into<String>,
        V: Into<String>,
    {
        self.store(credential_id.into(), Some(workflow_id), fields);
    }

    fn store<K, V>(
        &self,
        credential_id: String,
        workflow_id: Option<Uuid>,
        fields: impl IntoIterator<Item = (K, V)>,
    ) where
        K: Into<String>,
        V: Into<String>,
    {
        let fields = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.entries.insert(
            credential_id,
            StoredCredential {
                workflow_id,
                fields,
            },
        );
    }
}

impl CredentialResolver for InMemoryCredentialStore {
    fn resolve<'a>(
        &'a self,
        workflow_id: Uuid,
        credential_id: &'a str,
    ) -> BoxFuture<'a, Result<HashMap<String, String>, CredentialError>> {
        Box::pin(async move {
            let entry = self
                .entries
                .get(credential_id)
                .ok_or_else(|| CredentialError::NotFound(credential_id.to_string()))?;
            match entry.workflow_id {
                Some(owner) if owner != workflow_id => {
                    Err(CredentialError::AccessDenied(credential_id.to_string()))
                }
                _ => Ok(entry.fields.clone()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_global_credential() {
        let store = InMemoryCredentialStore::new();
        store.insert("api", [("token", "abc")]);

        let fields = store.resolve(Uuid::now_v7(), "api").await.unwrap();
        assert_eq!(fields.get("token").map(String::as_str), Some("abc"));
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let store = InMemoryCredentialStore::new();
        let err = store.resolve(Uuid::now_v7(), "nope").await.unwrap_err();
        assert_eq!(err, CredentialError::NotFound("nope".into()));
    }

    #[tokio::test]
    async fn test_scoped_credential_denied_elsewhere() {
        let store = InMemoryCredentialStore::new();
        let owner = Uuid::now_v7();
        store.insert_scoped(owner, "db", [("username", "svc"), ("password", "pw")]);

        assert!(store.resolve(owner, "db").await.is_ok());
        let err = store.resolve(Uuid::now_v7(), "db").await.unwrap_err();
        assert_eq!(err, CredentialError::AccessDenied("db".into()));
    }
}
