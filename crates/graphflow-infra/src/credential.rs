//! Environment variable credential resolver.
//!
//! A read-only resolver backed by environment variables.
//!
//! Key layout for credential `slack-bot`:
//! - `GRAPHFLOW_CRED_SLACK_BOT_TOKEN` -> field `token`
//! - `GRAPHFLOW_CRED_SLACK_BOT_HEADER_NAME` -> field `headerName`

use std::collections::HashMap;

use futures_util::future::BoxFuture;
use graphflow_core::expression::process_env;
use graphflow_core::repository::CredentialResolver;
use graphflow_types::error::CredentialError;
use uuid::Uuid;

/// Variable prefix shared by every credential field.
pub const ENV_PREFIX: &str = "GRAPHFLOW_CRED_";

/// Credential resolver over a snapshot of the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialResolver {
    vars: HashMap<String, String>,
}

impl EnvCredentialResolver {
    /// Snapshot every `GRAPHFLOW_CRED_*` variable of the current process.
    /// Variables that are not valid UTF-8 are skipped.
    pub fn new() -> Self {
        Self::from_vars(process_env())
    }

    /// Build from explicit `(name, value)` pairs. Non-prefixed names are dropped.
    pub fn from_vars<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let vars = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .collect();
        Self { vars }
    }
}

/// `slack-bot` -> `SLACK_BOT`
fn env_slug(credential_id: &str) -> String {
    credential_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// `HEADER_NAME` -> `headerName`
fn field_name(suffix: &str) -> String {
    let mut out = String::with_capacity(suffix.len());
    for (i, part) in suffix.split('_').filter(|p| !p.is_empty()).enumerate() {
        let lower = part.to_ascii_lowercase();
        if i == 0 {
            out.push_str(&lower);
        } else {
            let mut chars = lower.chars();
            if let Some(first) = chars.next() {
                out.push(first.to_ascii_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}

impl CredentialResolver for EnvCredentialResolver {
    fn resolve<'a>(
        &'a self,
        _workflow_id: Uuid,
        credential_id: &'a str,
    ) -> BoxFuture<'a, Result<HashMap<String, String>, CredentialError>> {
        Box::pin(async move {
            let prefix = format!("{ENV_PREFIX}{}_", env_slug(credential_id));

            let fields: HashMap<String, String> = self
                .vars
                .iter()
                .filter_map(|(name, value)| {
                    let suffix = name.strip_prefix(&prefix)?;
                    (!suffix.is_empty()).then(|| (field_name(suffix), value.clone()))
                })
                .collect();

            if fields.is_empty() {
                return Err(CredentialError::NotFound(credential_id.to_string()));
            }

            tracing::debug!(
                credential_id,
                fields = fields.len(),
                "resolved credential from environment"
            );
            Ok(fields)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_names_are_camel_cased() {
        assert_eq!(field_name("TOKEN"), "token");
        assert_eq!(field_name("HEADER_VALUE"), "headerValue");
        assert_eq!(env_slug("slack-bot.v2"), "SLACK_BOT_V2");
    }

    #[tokio::test]
    async fn resolves_fields_for_credential() {
        let resolver = EnvCredentialResolver::from_vars([
            ("GRAPHFLOW_CRED_SLACK_BOT_TOKEN", "xoxb"),
            ("GRAPHFLOW_CRED_SLACK_BOT_HEADER_NAME", "X-Key"),
            ("GRAPHFLOW_CRED_OTHER_TOKEN", "nope"),
            ("HOME", "/root"),
        ]);

        let fields = resolver.resolve(Uuid::now_v7(), "slack-bot").await.unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["token"], "xoxb");
        assert_eq!(fields["headerName"], "X-Key");
    }

    #[tokio::test]
    async fn missing_credential_is_not_found() {
        let resolver = EnvCredentialResolver::from_vars([("GRAPHFLOW_CRED_A_TOKEN", "t")]);
        let err = resolver.resolve(Uuid::now_v7(), "b").await.unwrap_err();
        assert_eq!(err, CredentialError::NotFound("b".into()));
    }

    #[test]
    fn process_snapshot_keeps_only_prefixed_names() {
        let resolver = EnvCredentialResolver::new();
        assert!(resolver.vars.keys().all(|k| k.starts_with(ENV_PREFIX)));
    }
}
