use super::{RateLimitStore, RateLimitStoreError, WindowState};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;

/// Process-local sliding windows.
///
/// Each key maps to its admitted timestamps in ascending order. The map entry
/// guard serializes prune/count/insert for a key; stale timestamps are dropped
/// lazily on the next hit and idle keys by [`InMemoryRateLimitStore::purge_idle`].
#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    windows: DashMap<String, VecDeque<i64>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hit_now(&self, key: &str, now_ms: i64, window_ms: i64, max: u32) -> WindowState {
        let mut entry = self.windows.entry(key.to_string()).or_default();
        let timestamps = entry.value_mut();

        let cutoff = now_ms - window_ms;
        while timestamps.front().is_some_and(|&ts| ts < cutoff) {
            timestamps.pop_front();
        }

        let admitted = (timestamps.len() as u64) < u64::from(max);
        if admitted {
            timestamps.push_back(now_ms);
        }

        WindowState {
            admitted,
            count: timestamps.len() as u32,
            oldest_ms: timestamps.front().copied(),
        }
    }

    /// Drops keys whose newest entry is older than `max_window_ms`.
    pub fn purge_idle(&self, now_ms: i64, max_window_ms: i64) -> usize {
        let before = self.windows.len();
        let cutoff = now_ms - max_window_ms;
        self.windows
            .retain(|_, timestamps| timestamps.back().is_some_and(|&ts| ts >= cutoff));
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn hit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        max: u32,
    ) -> Result<WindowState, RateLimitStoreError> {
        Ok(self.hit_now(key, now_ms, window_ms, max))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
