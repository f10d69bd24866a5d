//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::resilience::retries::RetryPolicy;
use crate::security::policy::PresetTable;

/// Root configuration for campus-guard.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Listener configuration (bind address, body limit).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Base retry policy for database calls.
    pub retries: RetryPolicy,

    /// Hosted database connection.
    pub supabase: SupabaseConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            timeouts: TimeoutConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retries: RetryPolicy::supabase(),
            supabase: SupabaseConfig::default(),
            observability: ObservabilityConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 64 * 1024,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout for outbound calls, in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Where rate limit counters live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Per-process map.
    #[default]
    Memory,
    /// Shared across instances; needs the `redis-backend` feature.
    Redis,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting. When off every request is allowed.
    pub enabled: bool,

    pub store: StoreKind,

    /// Redis connection URL, used when `store = "redis"`.
    pub redis_url: String,

    /// Prefix for every Redis key.
    pub key_prefix: String,

    /// Interval between sweeps of expired buckets and blocks.
    pub sweep_interval_secs: u64,

    /// Per-preset policy overrides.
    pub presets: PresetTable,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store: StoreKind::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "campus-guard".to_string(),
            sweep_interval_secs: 300,
            presets: PresetTable::default(),
        }
    }
}

/// Hosted database (Supabase) connection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`.
    pub url: String,

    /// Service role key. Overridden by `SUPABASE_SERVICE_ROLE_KEY`.
    pub service_role_key: String,
}

impl Default for SupabaseConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:54321".to_string(),
            service_role_key: String::new(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::policy::{Preset, RateLimitPolicy};

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: GuardConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.rate_limit.store, StoreKind::Memory);
        assert_eq!(config.rate_limit.sweep_interval_secs, 300);
        assert_eq!(config.retries, RetryPolicy::supabase());
        assert!(!config.admin.enabled);
    }

    #[test]
    fn test_full_file() {
        let config: GuardConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "127.0.0.1:3000"

            [rate_limit]
            store = "redis"
            redis_url = "redis://cache:6379"

            [rate_limit.presets.auth]
            limit = 3
            window_ms = 600000
            block_duration_ms = 3600000

            [retries]
            max_retries = 5
            jitter_ms = 0

            [supabase]
            url = "https://demo.supabase.co"
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "127.0.0.1:3000");
        assert_eq!(config.rate_limit.store, StoreKind::Redis);
        assert_eq!(
            config.rate_limit.presets.get(Preset::Auth),
            RateLimitPolicy::new(3, 600_000).with_block(3_600_000)
        );
        assert_eq!(config.rate_limit.presets.get(Preset::Read), Preset::Read.default_policy());
        assert_eq!(config.retries.max_retries, 5);
        assert_eq!(config.retries.jitter_ms, 0);
        assert_eq!(config.retries.initial_delay_ms, 1_000);
        assert_eq!(config.supabase.url, "https://demo.supabase.co");
    }
}
