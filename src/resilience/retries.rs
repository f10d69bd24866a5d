//! Retry logic.
//!
//! # Responsibilities
//! - Run a fallible async operation with a per-attempt timeout
//! - Classify failures as transient (retry) or permanent (fail fast)
//! - Back off exponentially with jitter between attempts
//! - Stop early when the caller cancels
//!
//! # Design Decisions
//! - Total attempts are `max_retries + 1`, never more
//! - Permanent errors come back unchanged on their first occurrence
//! - Exhaustion wraps the last failure in [`RetryError::Exhausted`]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::timeouts::{with_timeout, TimeoutError};

/// Error codes of transient network failures.
pub const TRANSIENT_CODES: &[&str] = &[
    "ECONNRESET",
    "ECONNREFUSED",
    "ETIMEDOUT",
    "UND_ERR_CONNECT_TIMEOUT",
    "ENOTFOUND",
    "EAI_AGAIN",
];

/// Lower-case message fragments of transient failures.
pub const TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "connect timeout",
    "fetch failed",
    "network error",
    "connection reset",
];

/// Retry budget and timing for one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    /// Deadline for each individual attempt.
    pub timeout_ms: u64,
    /// Upper bound of the random jitter added to every delay.
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            timeout_ms: 15_000,
            jitter_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Defaults for calls to the hosted database.
    pub fn supabase() -> Self {
        Self {
            max_delay_ms: 10_000,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Lets the retry loop tell transient failures from permanent ones.
pub trait RetryClassify {
    /// Machine-readable code, e.g. `ECONNRESET`.
    fn error_code(&self) -> Option<&str> {
        None
    }

    /// Code of the underlying cause, if the error wraps one.
    fn cause_code(&self) -> Option<&str> {
        None
    }

    /// The error declares itself retryable.
    fn marked_retryable(&self) -> bool {
        false
    }
}

/// Transient if marked retryable, carrying a transient code (directly or on
/// its cause), or whose message matches a timeout/network pattern.
pub fn is_retryable<E: RetryClassify + fmt::Display + ?Sized>(error: &E) -> bool {
    if error.marked_retryable() {
        return true;
    }

    let transient_code = |code: Option<&str>| code.is_some_and(|c| TRANSIENT_CODES.contains(&c));
    if transient_code(error.error_code()) || transient_code(error.cause_code()) {
        return true;
    }

    let message = error.to_string().to_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| message.contains(p))
}

impl RetryClassify for std::io::Error {
    fn error_code(&self) -> Option<&str> {
        use std::io::ErrorKind;
        match self.kind() {
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => Some("ECONNRESET"),
            ErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
            ErrorKind::TimedOut => Some("ETIMEDOUT"),
            _ => None,
        }
    }
}

/// Why a single attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError<E> {
    #[error(transparent)]
    Operation(E),

    #[error(transparent)]
    Timeout(TimeoutError),
}

impl<E: RetryClassify> RetryClassify for AttemptError<E> {
    fn error_code(&self) -> Option<&str> {
        match self {
            AttemptError::Operation(e) => e.error_code(),
            AttemptError::Timeout(_) => None,
        }
    }

    fn cause_code(&self) -> Option<&str> {
        match self {
            AttemptError::Operation(e) => e.cause_code(),
            AttemptError::Timeout(_) => None,
        }
    }

    fn marked_retryable(&self) -> bool {
        match self {
            AttemptError::Operation(e) => e.marked_retryable(),
            AttemptError::Timeout(_) => true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Not retryable; returned as-is on first occurrence.
    #[error(transparent)]
    Permanent(E),

    /// Every attempt failed; `last` is the final failure.
    #[error("Operation failed after {attempts} attempts")]
    Exhausted {
        attempts: u32,
        #[source]
        last: AttemptError<E>,
    },

    #[error("Operation cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl<E> RetryError<E> {
    /// Attempts made, when known. Permanent errors always stop after the
    /// attempt that produced them, so the caller only needs this for logging.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            RetryError::Permanent(_) => None,
            RetryError::Exhausted { attempts, .. } | RetryError::Cancelled { attempts } => Some(*attempts),
        }
    }

    /// The operation's own error, if the loop ended on one.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Permanent(e) => Some(e),
            RetryError::Exhausted { last: AttemptError::Operation(e), .. } => Some(e),
            _ => None,
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, RetryError::Permanent(_))
    }
}

impl<E: RetryClassify> RetryClassify for RetryError<E> {
    fn error_code(&self) -> Option<&str> {
        match self {
            RetryError::Permanent(e) => e.error_code(),
            _ => None,
        }
    }

    fn cause_code(&self) -> Option<&str> {
        match self {
            RetryError::Permanent(e) => e.cause_code(),
            RetryError::Exhausted { last, .. } => last.error_code(),
            RetryError::Cancelled { .. } => None,
        }
    }

    fn marked_retryable(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

/// Run `operation` under `policy`.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryClassify + fmt::Display,
{
    retry_loop("operation", policy, &CancellationToken::new(), operation).await
}

/// Like [`with_retry`], but stops when `cancel` fires: before an attempt,
/// during an attempt, or during a backoff wait.
pub async fn with_retry_cancellable<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryClassify + fmt::Display,
{
    retry_loop("operation", policy, cancel, operation).await
}

pub(crate) async fn retry_loop<T, E, F, Fut>(
    label: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryClassify + fmt::Display,
{
    let max_attempts = policy.max_attempts();
    let mut attempt: u32 = 0;

    loop {
        // `select!` builds every branch first, so check before calling `operation`.
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled { attempts: attempt });
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RetryError::Cancelled { attempts: attempt });
            }
            outcome = with_timeout(policy.timeout(), operation()) => outcome,
        };

        let error = match outcome {
            Ok(Ok(value)) => {
                if attempt > 0 {
                    tracing::info!(operation = %label, attempt = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Ok(Err(e)) => AttemptError::Operation(e),
            Err(timeout) => AttemptError::Timeout(timeout),
        };

        if attempt >= policy.max_retries {
            metrics::record_retry_exhausted(label);
            return Err(RetryError::Exhausted {
                attempts: attempt + 1,
                last: error,
            });
        }

        let error = match error {
            AttemptError::Operation(e) if !is_retryable(&e) => return Err(RetryError::Permanent(e)),
            other => other,
        };

        let delay = calculate_backoff(attempt, policy);
        tracing::warn!(
            operation = %label,
            attempt = attempt + 1,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying after transient failure"
        );
        metrics::record_retry_attempt(label);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RetryError::Cancelled { attempts: attempt + 1 });
            }
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, thiserror::Error)]
    #[error("{message}")]
    struct CodedError {
        code: Option<&'static str>,
        cause: Option<&'static str>,
        message: &'static str,
    }

    impl CodedError {
        fn code(code: &'static str) -> Self {
            Self { code: Some(code), cause: None, message: "request failed" }
        }

        fn message(message: &'static str) -> Self {
            Self { code: None, cause: None, message }
        }
    }

    impl RetryClassify for CodedError {
        fn error_code(&self) -> Option<&str> {
            self.code
        }
        fn cause_code(&self) -> Option<&str> {
            self.cause
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_factor: 2.0,
            timeout_ms: 1_000,
            jitter_ms: 0,
        }
    }

    #[test]
    fn test_classification() {
        for code in TRANSIENT_CODES {
            assert!(is_retryable(&CodedError::code(code)), "{} should be retryable", code);
        }
        let wrapped = CodedError { code: Some("FETCH_ERROR"), cause: Some("ECONNRESET"), message: "x" };
        assert!(is_retryable(&wrapped));

        assert!(is_retryable(&CodedError::message("Connect Timeout Error")));
        assert!(is_retryable(&CodedError::message("TypeError: fetch failed")));
        assert!(is_retryable(&CodedError::message("Network Error while loading")));
        assert!(is_retryable(&CodedError::message("read: connection reset by peer")));

        assert!(!is_retryable(&CodedError::message("duplicate key value violates unique constraint")));
        assert!(!is_retryable(&CodedError::code("PGRST116")));
    }

    #[test]
    fn test_io_error_codes() {
        use std::io::{Error, ErrorKind};
        assert!(is_retryable(&Error::new(ErrorKind::ConnectionReset, "boom")));
        assert!(is_retryable(&Error::new(ErrorKind::ConnectionRefused, "boom")));
        assert!(!is_retryable(&Error::new(ErrorKind::PermissionDenied, "denied")));
    }

    #[test]
    fn test_exhausted_error_is_marked_retryable() {
        let err: RetryError<CodedError> = RetryError::Exhausted {
            attempts: 3,
            last: AttemptError::Operation(CodedError::message("validation")),
        };
        assert!(is_retryable(&err));
        assert_eq!(err.to_string(), "Operation failed after 3 attempts");

        let permanent: RetryError<CodedError> = RetryError::Permanent(CodedError::message("validation"));
        assert!(!is_retryable(&permanent));
    }

    #[tokio::test]
    async fn test_permanent_error_runs_once_and_is_unchanged() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let original = CodedError::message("title: must not be empty");

        let result: Result<(), _> = with_retry(&fast_policy(3), || {
            c.fetch_add(1, Ordering::SeqCst);
            let err = original.clone();
            async move { Err(err) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match result {
            Err(RetryError::Permanent(e)) => assert_eq!(e, original),
            other => panic!("expected permanent error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result = with_retry(&fast_policy(3), || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CodedError::code("ETIMEDOUT"))
                } else {
                    Ok("rows")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "rows");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_wraps_last_cause() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<(), _> = with_retry(&fast_policy(2), || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err(CodedError::code("ECONNRESET")) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let err = result.unwrap_err();
        assert_eq!(err.attempts(), Some(3));
        match &err {
            RetryError::Exhausted { last: AttemptError::Operation(e), .. } => {
                assert_eq!(e.code, Some("ECONNRESET"));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert!(std::error::Error::source(&err).is_some());
    }

    #[tokio::test]
    async fn test_zero_retries_means_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<(), _> = with_retry(&fast_policy(0), || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err(CodedError::code("ECONNRESET")) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 1, .. })));
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let policy = RetryPolicy {
            timeout_ms: 20,
            ..fast_policy(1)
        };

        let result = with_retry(&policy, || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok::<_, CodedError>(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<(), RetryError<CodedError>> = with_retry_cancellable(&fast_policy(3), &cancel, || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 0 })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy {
            initial_delay_ms: 10_000,
            max_delay_ms: 10_000,
            ..fast_policy(3)
        };
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result: Result<(), _> = with_retry_cancellable(&policy, &cancel, || async {
            Err(CodedError::code("ECONNREFUSED"))
        })
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 1 })));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
