use super::{RateLimitStore, RateLimitStoreError, WindowState};
use async_trait::async_trait;
use redis::{Client, Script, aio::ConnectionManager};
use uuid::Uuid;

// KEYS[1] window key; ARGV: now_ms, window_ms, max, member.
// Returns {admitted, count, oldest_ms or -1}.
const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local max = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, '-inf', '(' .. (now - window))
local count = redis.call('ZCARD', key)
local admitted = 0
if count < max then
    redis.call('ZADD', key, now, ARGV[4])
    count = count + 1
    admitted = 1
end
redis.call('PEXPIRE', key, window)

local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local oldest_ms = -1
if oldest[2] then
    oldest_ms = tonumber(oldest[2])
end
return {admitted, count, oldest_ms}
"#;

/// Shared sliding windows kept in Redis sorted sets.
///
/// The prune/count/insert sequence runs as one Lua script so concurrent
/// processes cannot both take the last slot.
#[derive(Clone)]
pub struct RedisRateLimitStore {
    conn: ConnectionManager,
    script: Script,
}

impl RedisRateLimitStore {
    pub async fn connect(url: &str) -> Result<Self, RateLimitStoreError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("Connected to Redis rate limit store");
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            script: Script::new(SLIDING_WINDOW_SCRIPT),
        }
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn hit(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
        max: u32,
    ) -> Result<WindowState, RateLimitStoreError> {
        let mut conn = self.conn.clone();
        let member = format!("{}-{}", now_ms, Uuid::new_v4().simple());

        let (admitted, count, oldest_ms): (i64, i64, i64) = self
            .script
            .key(key)
            .arg(now_ms)
            .arg(window_ms)
            .arg(max)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;

        Ok(WindowState {
            admitted: admitted == 1,
            count: count.max(0) as u32,
            oldest_ms: (oldest_ms >= 0).then_some(oldest_ms),
        })
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
