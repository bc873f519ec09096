use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

/// Type alias for the governor rate limiter.
type GovernorRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Default pacing per credential (requests per second).
pub const DEFAULT_CREDENTIAL_RPS: u32 = 3;

/// A per-credential API rate limiter using the governor crate.
///
/// Clones share the same budget, so every worker holding a copy of a
/// credential draws from one bucket.
///
/// # Example
///
/// ```ignore
/// use roster::api::ApiRateLimiter;
///
/// let limiter = ApiRateLimiter::new(3);
///
/// // Before each API call:
/// limiter.wait().await;
/// api.invoke(&credential, method, &params).await?;
/// ```
#[derive(Clone)]
pub struct ApiRateLimiter {
    inner: Arc<GovernorRateLimiter>,
}

impl ApiRateLimiter {
    /// Create a new rate limiter with the specified requests per second.
    ///
    /// A value of 0 is clamped to 1.
    pub fn new(requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rps));

        Self {
            inner: Arc::new(rate_limiter),
        }
    }

    /// Wait until a request is allowed by the rate limiter.
    pub async fn wait(&self) {
        self.inner.until_ready().await;
    }

    /// Take a permit without waiting. Returns `false` when the bucket is empty.
    pub fn try_acquire(&self) -> bool {
        self.inner.check().is_ok()
    }
}

impl Default for ApiRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_CREDENTIAL_RPS)
    }
}

impl std::fmt::Debug for ApiRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRateLimiter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rps_is_clamped() {
        let limiter = ApiRateLimiter::new(0);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn clones_share_one_bucket() {
        let limiter = ApiRateLimiter::new(2);
        let clone = limiter.clone();
        assert!(limiter.try_acquire());
        assert!(clone.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn wait_returns_when_permit_available() {
        let limiter = ApiRateLimiter::new(100);
        limiter.wait().await;
    }
}
