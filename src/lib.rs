//! campus-guard library: a per-key fixed-window rate limiter with block
//! escalation, a retry executor for flaky network calls, and the HTTP service
//! that puts both in front of the CampusAxis hosted database.

pub mod admin;
pub mod config;
pub mod database;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::GuardConfig;
pub use http::GuardServer;
pub use lifecycle::Shutdown;
pub use resilience::{with_retry, RetryError, RetryPolicy};
pub use security::{Preset, RateLimitPolicy, RateLimitResult, RateLimiter};
