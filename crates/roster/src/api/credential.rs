//! Credentials and the per-run credential pool.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::rate_limit::ApiRateLimiter;

/// Activity status of a credential as known to external configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Active,
    Blocked,
    #[default]
    Unknown,
}

/// An opaque bearer secret bound to one acting identity.
///
/// Cloning is cheap and clones share the same rate limiter.
#[derive(Clone)]
pub struct Credential {
    secret: Arc<str>,
    status: CredentialStatus,
    owner_id: Option<i64>,
    limiter: ApiRateLimiter,
}

impl Credential {
    pub fn new(secret: impl Into<Arc<str>>) -> Self {
        Self {
            secret: secret.into(),
            status: CredentialStatus::Unknown,
            owner_id: None,
            limiter: ApiRateLimiter::default(),
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: CredentialStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn with_owner(mut self, owner_id: i64) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    /// Replace the pacing limiter (requests per second for this credential).
    #[must_use]
    pub fn with_rate_limit(mut self, requests_per_second: u32) -> Self {
        self.limiter = ApiRateLimiter::new(requests_per_second);
        self
    }

    /// The raw secret. Only transports should read this.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn status(&self) -> CredentialStatus {
        self.status
    }

    pub fn owner_id(&self) -> Option<i64> {
        self.owner_id
    }

    pub fn limiter(&self) -> &ApiRateLimiter {
        &self.limiter
    }

    /// Masked identifier safe to log: the first and last four characters.
    pub fn masked(&self) -> String {
        let chars: Vec<char> = self.secret.chars().collect();
        if chars.len() <= 12 {
            return "****".to_string();
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}…{tail}")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("secret", &self.masked())
            .field("status", &self.status)
            .field("owner_id", &self.owner_id)
            .finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.secret == other.secret
    }
}

impl Eq for Credential {}

/// The ordered set of usable credentials for one run.
///
/// Read-only once built; workers receive rotations, never the pool itself.
#[derive(Clone, Debug, Default)]
pub struct CredentialPool {
    credentials: Arc<[Credential]>,
}

impl CredentialPool {
    /// Build a pool, dropping credentials known to be blocked and duplicates.
    pub fn new(credentials: impl IntoIterator<Item = Credential>) -> Self {
        let mut kept: Vec<Credential> = Vec::new();
        for credential in credentials {
            if credential.status == CredentialStatus::Blocked {
                tracing::debug!(credential = %credential, "skipping blocked credential");
                continue;
            }
            if kept.contains(&credential) {
                continue;
            }
            kept.push(credential);
        }
        Self {
            credentials: kept.into(),
        }
    }

    /// Build a pool from raw secrets, all paced at `requests_per_second`.
    pub fn from_secrets<S: AsRef<str>>(secrets: &[S], requests_per_second: u32) -> Self {
        Self::new(
            secrets
                .iter()
                .map(|s| s.as_ref().trim())
                .filter(|s| !s.is_empty())
                .map(|s| Credential::new(s).with_rate_limit(requests_per_second)),
        )
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    /// Index of the primary credential for a unit of work.
    pub fn rotation_start(&self, chunk_index: usize) -> usize {
        if self.credentials.is_empty() {
            0
        } else {
            chunk_index % self.credentials.len()
        }
    }

    /// Credentials in the order a unit of work should try them:
    /// `credentials[i mod N..] + credentials[..i mod N]`.
    pub fn select_rotation(&self, chunk_index: usize) -> Vec<Credential> {
        let start = self.rotation_start(chunk_index);
        self.credentials[start..]
            .iter()
            .chain(self.credentials[..start].iter())
            .cloned()
            .collect()
    }

    /// Keep only the credentials at the given positions, preserving order.
    pub fn retain_indices(&self, keep: &[usize]) -> Self {
        Self {
            credentials: self
                .credentials
                .iter()
                .enumerate()
                .filter(|(i, _)| keep.contains(i))
                .map(|(_, c)| c.clone())
                .collect(),
        }
    }
}
