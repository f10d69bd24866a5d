//! Fixed-window rate limiting with block escalation.
//!
//! # Algorithm
//! ```text
//! check(key, policy):
//!     key blocked and now < blocked_until  → reject (retry after the block)
//!     no bucket or now > window_reset_at   → new bucket, count = 0
//!     count += 1
//!     count > limit                        → block if the policy says so, reject
//!     otherwise                            → allow, remaining = limit - count
//! ```
//!
//! # Design Decisions
//! - Fixed window: O(1) state per key, bursts at window edges are accepted
//! - Blocks are independent of the window; a blocked key stays rejected
//!   even when its window would have reset
//! - The limiter never fails a request because of its own storage: store
//!   errors are logged and the request is allowed

use arc_swap::ArcSwap;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use std::sync::Arc;

use crate::observability::metrics;
use crate::security::clock::{Clock, SystemClock};
use crate::security::identity::{user_key, KeyStrategy};
use crate::security::policy::{Preset, PresetTable, RateLimitPolicy};
use crate::security::store::{BlockEntry, RateLimitStore, StoreError, StoreStats, SweepStats};

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// Outcome of a single rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    pub success: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Epoch milliseconds when the current window (or block) ends.
    pub reset: u64,
    /// Seconds to wait before retrying; only set on rejection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl RateLimitResult {
    pub fn allowed(limit: u32, remaining: u32, reset: u64) -> Self {
        Self {
            success: true,
            limit,
            remaining,
            reset,
            retry_after: None,
        }
    }

    /// Rejection that lifts at `reset`. The hint is rounded up to whole
    /// seconds and never below one.
    pub fn denied(limit: u32, reset: u64, now_ms: u64) -> Self {
        let wait_ms = reset.saturating_sub(now_ms);
        Self {
            success: false,
            limit,
            remaining: 0,
            reset,
            retry_after: Some(wait_ms.div_ceil(1000).max(1)),
        }
    }

    /// `X-RateLimit-*` headers, plus `Retry-After` on rejection.
    pub fn headers(&self) -> Vec<(HeaderName, HeaderValue)> {
        let mut headers = vec![
            (HeaderName::from_static(X_RATELIMIT_LIMIT), HeaderValue::from(self.limit)),
            (HeaderName::from_static(X_RATELIMIT_REMAINING), HeaderValue::from(self.remaining)),
            (HeaderName::from_static(X_RATELIMIT_RESET), HeaderValue::from(self.reset)),
        ];
        if let Some(seconds) = self.retry_after {
            headers.push((axum::http::header::RETRY_AFTER, HeaderValue::from(seconds)));
        }
        headers
    }

    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        for (name, value) in self.headers() {
            headers.insert(name, value);
        }
    }
}

/// Rate limiter shared by every route.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    presets: ArcSwap<PresetTable>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, presets: PresetTable) -> Self {
        Self::with_clock(store, presets, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn RateLimitStore>,
        presets: PresetTable,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            presets: ArcSwap::from_pointee(presets),
            clock,
        }
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Current policy for a preset.
    pub fn policy(&self, preset: Preset) -> RateLimitPolicy {
        self.presets.load().get(preset)
    }

    pub fn presets(&self) -> PresetTable {
        self.presets.load().as_ref().clone()
    }

    /// Swap in a new preset table. In-flight windows keep their reset time.
    pub fn update_presets(&self, presets: PresetTable) {
        self.presets.store(Arc::new(presets));
        tracing::info!("Rate limit presets updated");
    }

    /// Check one request for `key` under `policy`.
    pub async fn check(&self, key: &str, policy: &RateLimitPolicy) -> RateLimitResult {
        let now = self.clock.now_ms();
        match self.store.hit(key, policy, now).await {
            Ok(result) => {
                if !result.success {
                    tracing::debug!(
                        key = %key,
                        limit = result.limit,
                        reset = result.reset,
                        retry_after = ?result.retry_after,
                        "Rate limit exceeded"
                    );
                }
                result
            }
            Err(e) => {
                tracing::warn!(key = %key, backend = self.store.backend(), error = %e, "Rate limit store failed, allowing request");
                metrics::record_store_error(self.store.backend());
                RateLimitResult::allowed(policy.limit, policy.limit, now.saturating_add(policy.window_ms))
            }
        }
    }

    pub async fn check_preset(&self, key: &str, preset: Preset) -> RateLimitResult {
        let policy = self.policy(preset);
        let result = self.check(key, &policy).await;
        metrics::record_rate_limit_decision(preset.as_str(), result.success);
        result
    }

    /// Limit an authenticated action per user, regardless of network address.
    ///
    /// Runs the full check on `user:{id}:{action}`, so a policy with a block
    /// duration blocks the user just as it would an address. Plain per-user
    /// counters without blocks come from passing a policy that has none.
    pub async fn check_user(&self, user_id: &str, action: &str, policy: &RateLimitPolicy) -> RateLimitResult {
        self.check(&user_key(user_id, action), policy).await
    }

    /// Derive the key from request headers, then check the preset.
    /// Returns the key alongside the result for logging.
    pub async fn check_request(
        &self,
        headers: &HeaderMap,
        preset: Preset,
        strategy: &KeyStrategy,
    ) -> (String, RateLimitResult) {
        let key = strategy.derive(headers);
        let result = self.check_preset(&key, preset).await;
        (key, result)
    }

    pub async fn unblock(&self, key: &str) -> Result<bool, StoreError> {
        let lifted = self.store.unblock(key, self.clock.now_ms()).await?;
        if lifted {
            tracing::info!(key = %key, "Block lifted");
        }
        Ok(lifted)
    }

    pub async fn blocked(&self) -> Result<Vec<BlockEntry>, StoreError> {
        self.store.blocked(self.clock.now_ms()).await
    }

    pub async fn sweep(&self) -> Result<SweepStats, StoreError> {
        self.store.sweep(self.clock.now_ms()).await
    }

    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.store.stats(self.clock.now_ms()).await
    }
}
