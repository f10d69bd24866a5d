//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to the hosted database:
//!     → timeouts.rs (bound each attempt)
//!     → On failure: retries.rs (classify, stop on permanent errors)
//!     → backoff.rs (exponential delay + jitter before the next attempt)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every attempt has a deadline
//! - Only transient network failures are retried
//! - Callers may cancel a retry loop at any suspension point

pub mod backoff;
pub mod retries;
pub mod timeouts;

pub use retries::{is_retryable, with_retry, with_retry_cancellable, RetryClassify, RetryError, RetryPolicy};
