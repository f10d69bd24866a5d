//! Hosted database access.
//!
//! # Data Flow
//! ```text
//! handler
//!     → retry.rs (safe_* helpers: policy per operation, definitive failure logged)
//!     → resilience::retries (timeout, classification, backoff)
//!     → client.rs (one HTTP call to PostgREST or Auth)
//! ```

pub mod client;
pub mod retry;

pub use client::{AuthUser, DbError, Filter, SupabaseClient, UserPage};
pub use retry::{safe_count_with_retry, safe_list_users_with_retry, with_supabase_retry};
