//! Elevated-access probing for scopes that need moderator rights or better.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinSet;

use super::credential::CredentialPool;
use super::gateway::CallGateway;
use super::methods::{COMMUNITY_LOOKUP, privilege_probe_params};

/// Community role levels, ordered by power.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Privilege {
    None = 0,
    Moderator = 1,
    Editor = 2,
    Administrator = 3,
}

impl Privilege {
    pub fn from_level(level: i64) -> Self {
        match level {
            l if l >= 3 => Privilege::Administrator,
            2 => Privilege::Editor,
            1 => Privilege::Moderator,
            _ => Privilege::None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PrivilegeError {
    #[error("no credential holds {required:?} rights on community {community_id}")]
    NoneQualified {
        community_id: i64,
        required: Privilege,
    },
}

#[derive(Debug, Deserialize)]
struct ProbedCommunity {
    #[serde(default)]
    is_admin: Option<i64>,
    #[serde(default)]
    admin_level: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProbeResponse {
    List(Vec<ProbedCommunity>),
    Wrapped { groups: Vec<ProbedCommunity> },
}

/// Read the privilege level out of a community lookup payload.
fn privilege_from_probe(value: Value) -> Privilege {
    let communities = match serde_json::from_value::<ProbeResponse>(value) {
        Ok(ProbeResponse::List(list)) => list,
        Ok(ProbeResponse::Wrapped { groups }) => groups,
        Err(_) => return Privilege::None,
    };
    communities
        .first()
        .filter(|c| c.is_admin.unwrap_or(0) != 0)
        .map(|c| Privilege::from_level(c.admin_level.unwrap_or(0)))
        .unwrap_or(Privilege::None)
}

/// Probe every credential concurrently and keep those holding at least `required`.
///
/// Probe failures count as "not privileged". An empty result is an error: the
/// caller must abort instead of running with degraded rights.
pub async fn filter_privileged(
    gateway: &CallGateway,
    pool: &CredentialPool,
    community_id: i64,
    required: Privilege,
) -> Result<CredentialPool, PrivilegeError> {
    let mut probes = JoinSet::new();
    for (index, credential) in pool.credentials().iter().cloned().enumerate() {
        let gateway = gateway.clone();
        probes.spawn(async move {
            let params = privilege_probe_params(community_id);
            let level = match gateway.call(&credential, COMMUNITY_LOOKUP, &params).await {
                Ok(value) => privilege_from_probe(value),
                Err(err) => {
                    tracing::debug!(
                        credential = %credential,
                        error = %err,
                        "privilege probe failed"
                    );
                    Privilege::None
                }
            };
            (index, level)
        });
    }

    let mut qualified = Vec::new();
    while let Some(joined) = probes.join_next().await {
        match joined {
            Ok((index, level)) if level >= required => qualified.push(index),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "privilege probe task failed"),
        }
    }
    qualified.sort_unstable();

    tracing::info!(
        community_id,
        probed = pool.len(),
        qualified = qualified.len(),
        "filtered credentials by privilege"
    );

    if qualified.is_empty() {
        return Err(PrivilegeError::NoneQualified {
            community_id,
            required,
        });
    }
    Ok(pool.retain_indices(&qualified))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::api::credential::Credential;
    use crate::api::error::Result;
    use crate::api::gateway::GatewayPolicy;
    use crate::api::transport::{Params, RemoteApi};

    /// Grants admin level based on the credential secret prefix.
    struct ByPrefix;

    #[async_trait]
    impl RemoteApi for ByPrefix {
        async fn invoke(&self, credential: &Credential, _: &str, _: &Params) -> Result<Value> {
            let level = match &credential.secret()[..5] {
                "admin" => 3,
                "edits" => 2,
                "moder" => 1,
                _ => return Ok(json!({"groups": [{"id": 1, "is_admin": 0}]})),
            };
            Ok(json!([{"id": 1, "is_admin": 1, "admin_level": level}]))
        }
    }

    fn pool() -> CredentialPool {
        CredentialPool::new(
            ["plain-000000000", "moder-000000000", "admin-000000000", "edits-000000000"]
                .into_iter()
                .map(|s| Credential::new(s).with_rate_limit(1000)),
        )
    }

    #[test]
    fn probe_payload_shapes() {
        assert_eq!(
            privilege_from_probe(json!([{"is_admin": 1, "admin_level": 2}])),
            Privilege::Editor
        );
        assert_eq!(
            privilege_from_probe(json!({"groups": [{"is_admin": 1, "admin_level": 3}]})),
            Privilege::Administrator
        );
        assert_eq!(privilege_from_probe(json!("garbage")), Privilege::None);
    }

    #[tokio::test]
    async fn keeps_only_qualified_credentials_in_order() {
        let gateway = CallGateway::new(Arc::new(ByPrefix), GatewayPolicy::immediate());
        let filtered = filter_privileged(&gateway, &pool(), 1, Privilege::Editor)
            .await
            .unwrap();
        let secrets: Vec<&str> = filtered.credentials().iter().map(|c| c.secret()).collect();
        assert_eq!(secrets, vec!["admin-000000000", "edits-000000000"]);
    }

    #[tokio::test]
    async fn empty_result_is_an_error() {
        let gateway = CallGateway::new(Arc::new(ByPrefix), GatewayPolicy::immediate());
        let only_plain = CredentialPool::new([Credential::new("plain-000000000")]);
        let err = filter_privileged(&gateway, &only_plain, 1, Privilege::Moderator)
            .await
            .unwrap_err();
        assert!(matches!(err, PrivilegeError::NoneQualified { .. }));
    }
}
