//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → identity.rs (derive key: client IP, prefixed IP or custom)
//!     → rate_limit.rs (check the route's preset policy)
//!     → store.rs (atomic per-key bucket + block update)
//!     → allowed: handler runs; rejected: 429 with Retry-After
//!
//! Background:
//!     sweeper.rs evicts expired buckets and blocks
//! ```
//!
//! # Design Decisions
//! - Policies are data (presets.* in config), not code
//! - Storage sits behind a trait; memory by default, redis for shared counters
//! - Limiter failures never block traffic

pub mod clock;
pub mod identity;
pub mod policy;
pub mod rate_limit;
#[cfg(feature = "redis-backend")]
pub mod redis_store;
pub mod store;
pub mod sweeper;

pub use identity::{client_ip, KeyStrategy};
pub use policy::{Preset, PresetTable, RateLimitPolicy};
pub use rate_limit::{RateLimitResult, RateLimiter};
pub use store::{MemoryRateLimitStore, RateLimitStore, StoreError};
