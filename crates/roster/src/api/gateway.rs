//! The call gateway: one remote call with pacing, retry and classification.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde_json::Value;

use super::credential::Credential;
use super::error::{ApiError, ErrorClass, Result, short_error_message};
use super::transport::{Params, RemoteApi};
use crate::retry::RetryConfig;
use crate::sync::{DEFAULT_MAX_RATE_LIMIT_WAITS, DEFAULT_RATE_LIMIT_STEP_MS};

/// Retry behaviour of the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayPolicy {
    /// Exponential backoff for transient failures.
    pub transient: RetryConfig,
    /// Sleep after the n-th consecutive rate-limit response is `n * rate_limit_step`.
    pub rate_limit_step: Duration,
    /// Consecutive rate-limit waits before the error is surfaced.
    ///
    /// The wait loop is bounded on purpose rather than waiting indefinitely:
    /// once this many waits have passed, the call fails with
    /// [`ApiError::RateLimited`] so the caller can rotate to another
    /// credential or requeue the chunk.
    pub max_rate_limit_waits: u32,
}

impl Default for GatewayPolicy {
    fn default() -> Self {
        Self {
            transient: RetryConfig::default(),
            rate_limit_step: Duration::from_millis(DEFAULT_RATE_LIMIT_STEP_MS),
            max_rate_limit_waits: DEFAULT_MAX_RATE_LIMIT_WAITS,
        }
    }
}

impl GatewayPolicy {
    /// No sleeping at all; for tests.
    pub fn immediate() -> Self {
        Self {
            transient: RetryConfig::immediate(2),
            rate_limit_step: Duration::ZERO,
            max_rate_limit_waits: 3,
        }
    }
}

/// Counters shared by every clone of a gateway.
#[derive(Debug, Default)]
pub struct CallStats {
    calls: AtomicU64,
    failures: AtomicU64,
    rate_limited: AtomicU64,
    retries: AtomicU64,
}

/// Point-in-time copy of [`CallStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallStatsSnapshot {
    pub calls: u64,
    pub failures: u64,
    pub rate_limited: u64,
    pub retries: u64,
}

impl CallStats {
    pub fn snapshot(&self) -> CallStatsSnapshot {
        CallStatsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// Executes remote calls for one scope.
///
/// Cloning is cheap; clones share the transport and counters.
#[derive(Clone)]
pub struct CallGateway {
    api: Arc<dyn RemoteApi>,
    policy: GatewayPolicy,
    stats: Arc<CallStats>,
    label: Arc<str>,
}

impl CallGateway {
    pub fn new(api: Arc<dyn RemoteApi>, policy: GatewayPolicy) -> Self {
        Self {
            api,
            policy,
            stats: Arc::new(CallStats::default()),
            label: Arc::from("-"),
        }
    }

    /// A gateway whose log lines carry `label` (usually `project/kind`).
    pub fn for_scope(&self, label: impl Into<Arc<str>>) -> Self {
        Self {
            label: label.into(),
            ..self.clone()
        }
    }

    pub fn policy(&self) -> &GatewayPolicy {
        &self.policy
    }

    pub fn stats(&self) -> CallStatsSnapshot {
        self.stats.snapshot()
    }

    /// Call `method` with `credential`, retrying transient failures and
    /// waiting out rate limits. Permanent failures return immediately.
    pub async fn call(
        &self,
        credential: &Credential,
        method: &str,
        params: &Params,
    ) -> Result<Value> {
        let mut delays = self.policy.transient.delays();
        let mut rate_limit_waits = 0u32;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            credential.limiter().wait().await;
            self.stats.calls.fetch_add(1, Ordering::Relaxed);

            let started = Instant::now();
            let outcome = self.api.invoke(credential, method, params).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let err = match outcome {
                Ok(value) => {
                    tracing::debug!(
                        method,
                        scope = %self.label,
                        credential = %credential,
                        attempt,
                        elapsed_ms,
                        "call ok"
                    );
                    return Ok(value);
                }
                Err(err) => err,
            };

            self.stats.failures.fetch_add(1, Ordering::Relaxed);

            match err.class() {
                ErrorClass::Permanent => {
                    tracing::warn!(
                        method,
                        scope = %self.label,
                        credential = %credential,
                        attempt,
                        code = err.code(),
                        error = %short_error_message(&err),
                        "permanent failure"
                    );
                    return Err(err);
                }
                ErrorClass::RateLimit => {
                    self.stats.rate_limited.fetch_add(1, Ordering::Relaxed);
                    rate_limit_waits += 1;
                    // Bounded: after `max_rate_limit_waits` the credential is given up.
                    if rate_limit_waits > self.policy.max_rate_limit_waits {
                        tracing::warn!(
                            method,
                            scope = %self.label,
                            credential = %credential,
                            waits = rate_limit_waits - 1,
                            "rate limit persisted, giving up on credential"
                        );
                        return Err(err);
                    }
                    let pause = self.policy.rate_limit_step * rate_limit_waits;
                    tracing::debug!(
                        method,
                        scope = %self.label,
                        credential = %credential,
                        pause_ms = pause.as_millis() as u64,
                        "rate limited"
                    );
                    tokio::time::sleep(pause).await;
                }
                ErrorClass::Transient => match delays.next() {
                    Some(delay) => {
                        self.stats.retries.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(
                            method,
                            scope = %self.label,
                            credential = %credential,
                            attempt,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %short_error_message(&err),
                            "transient failure, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::warn!(
                            method,
                            scope = %self.label,
                            credential = %credential,
                            attempt,
                            error = %short_error_message(&err),
                            "transient failure, attempts exhausted"
                        );
                        return Err(err);
                    }
                },
            }
        }
    }

    /// Try each credential in order until one call succeeds.
    ///
    /// Returns the payload and the position of the credential that served it.
    pub async fn call_rotating(
        &self,
        rotation: &[Credential],
        method: &str,
        params: &Params,
    ) -> Result<(Value, usize)> {
        let mut last_err = ApiError::network("no credentials in rotation");
        for (position, credential) in rotation.iter().enumerate() {
            match self.call(credential, method, params).await {
                Ok(value) => return Ok((value, position)),
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }
}
