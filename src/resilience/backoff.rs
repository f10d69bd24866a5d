//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

use crate::resilience::retries::RetryPolicy;

/// Delay before the retry that follows the failed `attempt` (0-based):
/// `min(initial * factor^attempt, max)` plus up to `jitter_ms` of random jitter.
pub fn calculate_backoff(attempt: u32, policy: &RetryPolicy) -> Duration {
    let exponential = policy.initial_delay_ms as f64 * policy.backoff_factor.powi(attempt as i32);
    let capped = if exponential.is_finite() {
        exponential.min(policy.max_delay_ms as f64) as u64
    } else {
        policy.max_delay_ms
    };

    let jitter = if policy.jitter_ms > 0 {
        rand::thread_rng().gen_range(0..=policy.jitter_ms)
    } else {
        0
    };

    Duration::from_millis(capped.saturating_add(jitter))
}
