//! Sliding-window rate limiting.
//!
//! A [`SlidingWindowLimiter`] keeps, per key, the timestamps of admitted
//! requests inside the trailing window. The shared store (Redis) is used when
//! configured; any failure or timeout there is logged and the decision is taken
//! by the in-process store instead, so an infrastructure outage never rejects
//! traffic on its own.

pub mod memory;
pub mod redis_store;
pub mod rules;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use metrics::counter;
use std::{sync::Arc, time::Duration};
use thiserror::Error;

pub use memory::InMemoryRateLimitStore;
pub use redis_store::RedisRateLimitStore;
pub use rules::{Quota, RateLimitRule, RuleTable};

#[derive(Debug, Error)]
pub enum RateLimitStoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
}

/// Window contents after one admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub admitted: bool,
    /// Entries inside the window, including the current one when admitted.
    pub count: u32,
    /// Oldest timestamp still inside the window, in milliseconds.
    pub oldest_ms: Option<i64>,
}

/// Backend for the counter. `hit` must prune, count, compare and insert as
/// one atomic step for the given key.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn hit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        max: u32,
    ) -> Result<WindowState, RateLimitStoreError>;

    fn backend(&self) -> &'static str;
}

/// Admission result plus the values surfaced in response headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub retry_after: Option<u64>,
    pub backend: &'static str,
}

#[derive(Clone)]
pub struct SlidingWindowLimiter {
    primary: Option<Arc<dyn RateLimitStore>>,
    fallback: Arc<InMemoryRateLimitStore>,
    timeout: Duration,
}

impl SlidingWindowLimiter {
    /// Limiter backed only by process memory.
    pub fn in_memory() -> Self {
        Self {
            primary: None,
            fallback: Arc::new(InMemoryRateLimitStore::new()),
            timeout: Duration::from_millis(250),
        }
    }

    /// Limiter that prefers `primary` and degrades to process memory.
    pub fn with_primary(primary: Arc<dyn RateLimitStore>, timeout: Duration) -> Self {
        Self {
            primary: Some(primary),
            fallback: Arc::new(InMemoryRateLimitStore::new()),
            timeout,
        }
    }

    pub fn fallback(&self) -> &Arc<InMemoryRateLimitStore> {
        &self.fallback
    }

    pub async fn check(&self, key: &str, quota: Quota) -> Decision {
        self.check_at(key, quota, Utc::now()).await
    }

    pub async fn check_at(&self, key: &str, quota: Quota, now: DateTime<Utc>) -> Decision {
        let now_ms = now.timestamp_millis();
        let window_ms = quota.window_ms();

        let (state, backend) = match self.try_primary(key, now_ms, window_ms, quota).await {
            Some(result) => result,
            None => {
                let state = self.fallback.hit_now(key, now_ms, window_ms, quota.max_requests);
                (state, self.fallback.backend())
            }
        };

        let decision = decide(state, quota, now_ms, backend);

        counter!(
            "rate_limit_decisions_total",
            "outcome" => if decision.allowed { "allowed" } else { "rejected" },
            "backend" => backend
        )
        .increment(1);

        decision
    }

    async fn try_primary(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        quota: Quota,
    ) -> Option<(WindowState, &'static str)> {
        let primary = self.primary.as_ref()?;

        let result = match tokio::time::timeout(
            self.timeout,
            primary.hit(key, now_ms, window_ms, quota.max_requests),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RateLimitStoreError::Timeout(self.timeout)),
        };

        match result {
            Ok(state) => Some((state, primary.backend())),
            Err(e) => {
                tracing::warn!(
                    backend = primary.backend(),
                    error = %e,
                    "Rate limit store unavailable, using in-process fallback (degraded mode)"
                );
                None
            }
        }
    }
}

fn decide(state: WindowState, quota: Quota, now_ms: i64, backend: &'static str) -> Decision {
    let window_ms = quota.window_ms();
    let reset_ms = state.oldest_ms.unwrap_or(now_ms) + window_ms;
    let reset_at = Utc
        .timestamp_millis_opt(reset_ms)
        .single()
        .unwrap_or_else(Utc::now);

    let retry_after = if state.admitted {
        None
    } else {
        let wait_ms = (reset_ms - now_ms).max(0);
        Some(((wait_ms + 999) / 1000).max(1) as u64)
    };

    Decision {
        allowed: state.admitted,
        limit: quota.max_requests,
        remaining: quota.max_requests.saturating_sub(state.count),
        reset_at,
        retry_after,
        backend,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    struct FailingStore;

    #[async_trait]
    impl RateLimitStore for FailingStore {
        async fn hit(
            &self,
            _key: &str,
            _now_ms: i64,
            _window_ms: i64,
            _max: u32,
        ) -> Result<WindowState, RateLimitStoreError> {
            Err(RateLimitStoreError::Timeout(Duration::from_millis(1)))
        }

        fn backend(&self) -> &'static str {
            "failing"
        }
    }

    struct SlowStore;

    #[async_trait]
    impl RateLimitStore for SlowStore {
        async fn hit(
            &self,
            _key: &str,
            _now_ms: i64,
            _window_ms: i64,
            _max: u32,
        ) -> Result<WindowState, RateLimitStoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(WindowState {
                admitted: false,
                count: 0,
                oldest_ms: None,
            })
        }

        fn backend(&self) -> &'static str {
            "slow"
        }
    }

    fn quota(max: u32, window: u64) -> Quota {
        Quota {
            max_requests: max,
            window_seconds: window,
        }
    }

    #[tokio::test]
    async fn admits_exactly_max_within_window() {
        let limiter = SlidingWindowLimiter::in_memory();
        let q = quota(5, 300);
        let t0 = Utc::now();

        for i in 0..5 {
            let d = limiter
                .check_at("ip:10.0.0.1", q, t0 + ChronoDuration::seconds(i))
                .await;
            assert!(d.allowed, "request {} should be admitted", i + 1);
            assert_eq!(d.remaining, 4 - i as u32);
        }

        let d = limiter
            .check_at("ip:10.0.0.1", q, t0 + ChronoDuration::seconds(10))
            .await;
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
        assert_eq!(d.retry_after, Some(290));
    }

    #[tokio::test]
    async fn admissions_resume_after_window_elapses() {
        let limiter = SlidingWindowLimiter::in_memory();
        let q = quota(2, 60);
        let t0 = Utc::now();

        assert!(limiter.check_at("k", q, t0).await.allowed);
        assert!(limiter.check_at("k", q, t0).await.allowed);
        assert!(!limiter.check_at("k", q, t0 + ChronoDuration::seconds(30)).await.allowed);

        let later = t0 + ChronoDuration::seconds(61);
        let d = limiter.check_at("k", q, later).await;
        assert!(d.allowed);
        assert_eq!(d.remaining, 1);
    }

    #[tokio::test]
    async fn rejected_attempts_do_not_extend_window() {
        let limiter = SlidingWindowLimiter::in_memory();
        let q = quota(1, 10);
        let t0 = Utc::now();

        assert!(limiter.check_at("k", q, t0).await.allowed);
        for s in 1..10 {
            assert!(!limiter.check_at("k", q, t0 + ChronoDuration::seconds(s)).await.allowed);
        }
        assert!(limiter.check_at("k", q, t0 + ChronoDuration::seconds(11)).await.allowed);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = SlidingWindowLimiter::in_memory();
        let q = quota(1, 60);
        let now = Utc::now();

        assert!(limiter.check_at("ip:1", q, now).await.allowed);
        assert!(limiter.check_at("ip:2", q, now).await.allowed);
        assert!(!limiter.check_at("ip:1", q, now).await.allowed);
    }

    #[tokio::test]
    async fn failing_primary_falls_back_and_still_limits() {
        let limiter =
            SlidingWindowLimiter::with_primary(Arc::new(FailingStore), Duration::from_millis(50));
        let q = quota(1, 60);
        let now = Utc::now();

        let first = limiter.check_at("k", q, now).await;
        assert!(first.allowed);
        assert_eq!(first.backend, "memory");

        assert!(!limiter.check_at("k", q, now).await.allowed);
    }

    #[tokio::test]
    async fn slow_primary_times_out_and_fails_open() {
        let limiter =
            SlidingWindowLimiter::with_primary(Arc::new(SlowStore), Duration::from_millis(20));
        let d = limiter.check("k", quota(3, 60)).await;
        assert!(d.allowed);
        assert_eq!(d.backend, "memory");
    }
}
