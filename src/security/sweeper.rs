//! Periodic eviction of expired rate limit state.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::observability::metrics;
use crate::security::rate_limit::RateLimiter;

pub struct Sweeper {
    limiter: Arc<RateLimiter>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(limiter: Arc<RateLimiter>, interval: Duration) -> Self {
        Self { limiter, interval }
    }

    /// Sweep on every tick until shutdown is signalled.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            backend = self.limiter.backend(),
            "Rate limit sweeper starting"
        );

        let mut ticker = time::interval(self.interval);
        // The first tick completes immediately; nothing can have expired yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Rate limit sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    async fn sweep_once(&self) {
        match self.limiter.sweep().await {
            Ok(stats) => {
                tracing::debug!(removed = stats.removed, remaining = stats.remaining, "Rate limit sweep complete");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Rate limit sweep failed");
                return;
            }
        }

        if let Ok(stats) = self.limiter.stats().await {
            metrics::record_store_size(stats.tracked_keys, stats.active_blocks);
        }
    }
}
