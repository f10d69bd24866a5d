//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound a single attempt of an external call
//! - Cancel the attempt cleanly when the deadline passes
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the timed-out future is dropped
//! - Timeout errors are distinct from operation errors and always retryable

use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Operation timeout after {}ms", .0.as_millis())]
pub struct TimeoutError(pub Duration);

/// Run `future`, giving up after `limit`.
pub async fn with_timeout<F: Future>(limit: Duration, future: F) -> Result<F::Output, TimeoutError> {
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| TimeoutError(limit))
}
