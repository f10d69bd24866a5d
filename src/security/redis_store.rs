//! Redis-backed rate limit store for deployments with more than one instance.
//!
//! Each check runs as one Lua script so the block test, window reset and
//! increment happen atomically on the server. Keys carry a TTL matching the
//! window or block, so no sweep is needed.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;

use crate::security::policy::RateLimitPolicy;
use crate::security::rate_limit::RateLimitResult;
use crate::security::store::{BlockEntry, RateLimitStore, StoreError, StoreStats, SweepStats};

/// KEYS[1] bucket hash, KEYS[2] block key.
/// ARGV: now_ms, limit, window_ms, block_ms (0 = no block).
/// Returns {allowed, remaining, reset}.
const HIT_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])
local window = tonumber(ARGV[3])
local block = tonumber(ARGV[4])

local blocked_until = tonumber(redis.call('GET', KEYS[2]))
if blocked_until and now < blocked_until then
    return {0, 0, blocked_until}
end

local count = tonumber(redis.call('HGET', KEYS[1], 'count'))
local reset = tonumber(redis.call('HGET', KEYS[1], 'reset'))
if (not reset) or now > reset then
    count = 0
    reset = now + window
end

count = count + 1
if count > limit + 1 then
    count = limit + 1
end
redis.call('HSET', KEYS[1], 'count', count, 'reset', reset)
redis.call('PEXPIRE', KEYS[1], reset - now + 1)

if count > limit then
    if block > 0 then
        redis.call('SET', KEYS[2], now + block, 'PX', block)
    end
    return {0, 0, reset}
end

return {1, limit - count, reset}
"#;

pub struct RedisRateLimitStore {
    conn: ConnectionManager,
    prefix: String,
    script: Script,
}

impl RedisRateLimitStore {
    /// Connect and verify the server answers `PING`.
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Backend(format!("invalid redis url: {}", e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Backend(format!("redis connection error: {}", e)))?;

        let mut ping = conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut ping)
            .await
            .map_err(|e| StoreError::Backend(format!("redis ping failed: {}", e)))?;

        tracing::info!(prefix = %prefix, "Connected to redis rate limit store");

        Ok(Self {
            conn,
            prefix: prefix.to_string(),
            script: Script::new(HIT_SCRIPT),
        })
    }

    fn bucket_key(&self, key: &str) -> String {
        format!("{}:bucket:{}", self.prefix, key)
    }

    fn block_key(&self, key: &str) -> String {
        format!("{}:block:{}", self.prefix, key)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await
                .map_err(backend_err)?;
            keys.extend(batch);
            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }
}

fn backend_err(e: redis::RedisError) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn hit(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
        now_ms: u64,
    ) -> Result<RateLimitResult, StoreError> {
        let mut conn = self.conn.clone();
        let (allowed, remaining, reset): (i64, i64, i64) = self
            .script
            .key(self.bucket_key(key))
            .key(self.block_key(key))
            .arg(now_ms)
            .arg(policy.limit)
            .arg(policy.window_ms)
            .arg(policy.block_duration_ms.unwrap_or(0))
            .invoke_async(&mut conn)
            .await
            .map_err(backend_err)?;

        let reset = reset.max(0) as u64;
        Ok(if allowed == 1 {
            RateLimitResult::allowed(policy.limit, remaining.max(0) as u32, reset)
        } else {
            RateLimitResult::denied(policy.limit, reset, now_ms)
        })
    }

    async fn unblock(&self, key: &str, _now_ms: u64) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(self.block_key(key))
            .query_async(&mut conn)
            .await
            .map_err(backend_err)?;
        Ok(removed > 0)
    }

    async fn blocked(&self, now_ms: u64) -> Result<Vec<BlockEntry>, StoreError> {
        let block_prefix = format!("{}:block:", self.prefix);
        let keys = self.scan(&format!("{}*", block_prefix)).await?;
        let mut conn = self.conn.clone();

        let mut blocks = Vec::with_capacity(keys.len());
        for redis_key in keys {
            let until: Option<u64> = redis::cmd("GET")
                .arg(&redis_key)
                .query_async(&mut conn)
                .await
                .map_err(backend_err)?;
            if let Some(until) = until.filter(|u| now_ms < *u) {
                blocks.push(BlockEntry {
                    key: redis_key.trim_start_matches(&block_prefix).to_string(),
                    blocked_until: until,
                });
            }
        }
        blocks.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(blocks)
    }

    async fn sweep(&self, _now_ms: u64) -> Result<SweepStats, StoreError> {
        // Expiry is handled by key TTLs.
        Ok(SweepStats::default())
    }

    async fn stats(&self, now_ms: u64) -> Result<StoreStats, StoreError> {
        let buckets = self.scan(&format!("{}:bucket:*", self.prefix)).await?;
        let blocks = self.blocked(now_ms).await?;
        Ok(StoreStats {
            backend: self.backend(),
            tracked_keys: buckets.len(),
            active_blocks: blocks.len(),
        })
    }
}
