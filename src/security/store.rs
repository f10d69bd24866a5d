//! Rate limit state storage.
//!
//! # Responsibilities
//! - Hold one bucket and at most one block per key
//! - Apply a single request to a key atomically
//! - Evict expired state
//!
//! # Backends
//! - [`MemoryRateLimitStore`]: per-process, swept periodically
//! - `RedisRateLimitStore` (feature `redis-backend`): shared across instances,
//!   expiry via native key TTLs

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

use crate::config::schema::{RateLimitConfig, StoreKind};
use crate::security::policy::RateLimitPolicy;
use crate::security::rate_limit::RateLimitResult;

/// Errors raised by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("rate limit backend error: {0}")]
    Backend(String),

    #[error("rate limit backend '{0}' is not compiled in (enable the `{0}-backend` feature)")]
    Unsupported(&'static str),
}

/// Fixed-window counter for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBucket {
    pub count: u32,
    /// Epoch milliseconds at which the window closes.
    pub window_reset_at: u64,
}

impl RateBucket {
    fn open(now_ms: u64, window_ms: u64) -> Self {
        Self {
            count: 0,
            window_reset_at: now_ms.saturating_add(window_ms),
        }
    }
}

/// A key rejected unconditionally until `blocked_until`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockEntry {
    pub key: String,
    pub blocked_until: u64,
}

/// Everything tracked for a single key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyState {
    pub bucket: Option<RateBucket>,
    pub blocked_until: Option<u64>,
}

impl KeyState {
    /// Apply one request under `policy` at `now_ms`.
    pub fn hit(&mut self, policy: &RateLimitPolicy, now_ms: u64) -> RateLimitResult {
        if let Some(until) = self.blocked_until {
            if now_ms < until {
                return RateLimitResult::denied(policy.limit, until, now_ms);
            }
            self.blocked_until = None;
        }

        if self.bucket.map_or(true, |b| now_ms > b.window_reset_at) {
            self.bucket = Some(RateBucket::open(now_ms, policy.window_ms));
        }
        let bucket = self
            .bucket
            .get_or_insert_with(|| RateBucket::open(now_ms, policy.window_ms));

        // Saturate one past the limit; every request beyond that is rejected anyway.
        bucket.count = bucket.count.saturating_add(1).min(policy.limit.saturating_add(1));
        let reset = bucket.window_reset_at;

        if bucket.count > policy.limit {
            if let Some(block_ms) = policy.block_duration_ms {
                self.blocked_until = Some(now_ms.saturating_add(block_ms));
            }
            return RateLimitResult::denied(policy.limit, reset, now_ms);
        }

        RateLimitResult::allowed(policy.limit, policy.limit - bucket.count, reset)
    }

    /// Drop expired parts. Returns true when nothing is left.
    fn prune(&mut self, now_ms: u64) -> bool {
        if self.bucket.is_some_and(|b| now_ms > b.window_reset_at) {
            self.bucket = None;
        }
        if self.blocked_until.is_some_and(|until| now_ms >= until) {
            self.blocked_until = None;
        }
        self.bucket.is_none() && self.blocked_until.is_none()
    }

    fn active_block(&self, now_ms: u64) -> Option<u64> {
        self.blocked_until.filter(|until| now_ms < *until)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    pub removed: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub backend: &'static str,
    pub tracked_keys: usize,
    pub active_blocks: usize,
}

/// Storage backend for rate limit state.
///
/// `hit` must apply the whole check to one key atomically so that concurrent
/// requests for the same key never observe a count above `limit + 1`.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn hit(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
        now_ms: u64,
    ) -> Result<RateLimitResult, StoreError>;

    /// Lift an active block. Returns whether one existed.
    async fn unblock(&self, key: &str, now_ms: u64) -> Result<bool, StoreError>;

    async fn blocked(&self, now_ms: u64) -> Result<Vec<BlockEntry>, StoreError>;

    async fn sweep(&self, now_ms: u64) -> Result<SweepStats, StoreError>;

    async fn stats(&self, now_ms: u64) -> Result<StoreStats, StoreError>;
}

/// In-process store. Each key is guarded by its DashMap shard lock for the
/// duration of a hit.
#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    entries: DashMap<String, KeyState>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one key's state.
    pub fn state(&self, key: &str) -> Option<KeyState> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn hit(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
        now_ms: u64,
    ) -> Result<RateLimitResult, StoreError> {
        if let Some(mut state) = self.entries.get_mut(key) {
            return Ok(state.hit(policy, now_ms));
        }
        let mut state = self.entries.entry(key.to_string()).or_default();
        Ok(state.hit(policy, now_ms))
    }

    async fn unblock(&self, key: &str, now_ms: u64) -> Result<bool, StoreError> {
        Ok(match self.entries.get_mut(key) {
            Some(mut state) => {
                let was_blocked = state.active_block(now_ms).is_some();
                state.blocked_until = None;
                was_blocked
            }
            None => false,
        })
    }

    async fn blocked(&self, now_ms: u64) -> Result<Vec<BlockEntry>, StoreError> {
        let mut blocks: Vec<BlockEntry> = self
            .entries
            .iter()
            .filter_map(|e| {
                e.value().active_block(now_ms).map(|until| BlockEntry {
                    key: e.key().clone(),
                    blocked_until: until,
                })
            })
            .collect();
        blocks.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(blocks)
    }

    async fn sweep(&self, now_ms: u64) -> Result<SweepStats, StoreError> {
        let before = self.entries.len();
        self.entries.retain(|_, state| !state.prune(now_ms));
        let remaining = self.entries.len();
        Ok(SweepStats {
            removed: before.saturating_sub(remaining),
            remaining,
        })
    }

    async fn stats(&self, now_ms: u64) -> Result<StoreStats, StoreError> {
        let active_blocks = self
            .entries
            .iter()
            .filter(|e| e.value().active_block(now_ms).is_some())
            .count();
        Ok(StoreStats {
            backend: self.backend(),
            tracked_keys: self.entries.len(),
            active_blocks,
        })
    }
}

/// Build the backend selected in configuration.
pub async fn build_store(config: &RateLimitConfig) -> Result<Arc<dyn RateLimitStore>, StoreError> {
    match config.store {
        StoreKind::Memory => Ok(Arc::new(MemoryRateLimitStore::new())),
        #[cfg(feature = "redis-backend")]
        StoreKind::Redis => {
            let store = crate::security::redis_store::RedisRateLimitStore::connect(
                &config.redis_url,
                &config.key_prefix,
            )
            .await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis-backend"))]
        StoreKind::Redis => Err(StoreError::Unsupported("redis")),
    }
}
