//! Retry wrappers for database calls.

use std::fmt;
use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::database::client::{Filter, SupabaseClient, UserPage};
use crate::database::DbError;
use crate::resilience::retries::{retry_loop, RetryClassify, RetryError, RetryPolicy};

const COUNT_MAX_RETRIES: u32 = 2;
const COUNT_TIMEOUT_MS: u64 = 10_000;
const LIST_USERS_MAX_RETRIES: u32 = 2;
const LIST_USERS_TIMEOUT_MS: u64 = 12_000;

pub const DEFAULT_USERS_PER_PAGE: u32 = 100;

/// Run a database operation under `policy`, logging the definitive failure
/// before handing it back unchanged.
pub async fn with_supabase_retry<T, E, F, Fut>(
    operation_name: &str,
    policy: &RetryPolicy,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryClassify + fmt::Display,
{
    let result = retry_loop(operation_name, policy, &CancellationToken::new(), operation).await;

    if let Err(e) = &result {
        let message = match e {
            RetryError::Exhausted { last, .. } => last.to_string(),
            RetryError::Permanent(inner) => inner.to_string(),
            RetryError::Cancelled { .. } => e.to_string(),
        };
        let code = failure_code(e);
        tracing::error!(
            operation = %operation_name,
            message = %message,
            code = ?code,
            attempts = ?e.attempts(),
            max_attempts = policy.max_attempts(),
            "Database operation failed definitively"
        );
    }

    result
}

/// Code reported for a definitive failure: the error's own code, else its cause's.
fn failure_code<E: RetryClassify>(error: &RetryError<E>) -> Option<String> {
    let code = match error {
        RetryError::Exhausted { last, .. } => last.error_code().or(last.cause_code()),
        RetryError::Permanent(inner) => inner.error_code().or(inner.cause_code()),
        RetryError::Cancelled { .. } => None,
    };
    code.map(str::to_string)
}

/// Exact row count with two retries and a 10 s attempt deadline.
pub async fn safe_count_with_retry(
    client: &SupabaseClient,
    base: &RetryPolicy,
    table: &str,
    filters: &[Filter],
) -> Result<u64, RetryError<DbError>> {
    let policy = base
        .clone()
        .with_max_retries(COUNT_MAX_RETRIES)
        .with_timeout_ms(COUNT_TIMEOUT_MS);

    with_supabase_retry(&format!("Count {}", table), &policy, || client.count(table, filters)).await
}

/// One page of Auth users with two retries and a 12 s attempt deadline.
pub async fn safe_list_users_with_retry(
    client: &SupabaseClient,
    base: &RetryPolicy,
    page: u32,
    per_page: u32,
) -> Result<UserPage, RetryError<DbError>> {
    let policy = base
        .clone()
        .with_max_retries(LIST_USERS_MAX_RETRIES)
        .with_timeout_ms(LIST_USERS_TIMEOUT_MS);

    with_supabase_retry("List users", &policy, || client.list_users(page, per_page)).await
}
