//! Error responses.
//!
//! Handlers return [`ApiError`]; it maps onto a status code and a small JSON
//! body. Internal details are logged where the error is converted, never sent
//! to the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::database::DbError;
use crate::resilience::retries::RetryError;
use crate::security::rate_limit::RateLimitResult;
use crate::security::store::StoreError;

pub const RATE_LIMITED: &str = "RATE_LIMITED";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Too many requests")]
    RateLimited(RateLimitResult),

    #[error("{0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    NotFound(String),

    /// A dependency stayed unreachable after retrying.
    #[error("Service temporarily unavailable, please try again later")]
    Unavailable,

    /// A dependency answered with a permanent error.
    #[error("Upstream request failed")]
    Upstream,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Upstream => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::RateLimited(_) => RATE_LIMITED,
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Unavailable => "SERVICE_UNAVAILABLE",
            ApiError::Upstream => "UPSTREAM_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            ApiError::RateLimited(result) => {
                let body = json!({
                    "error": "Too many requests. Please try again later.",
                    "code": RATE_LIMITED,
                    "retryAfter": result.retry_after,
                });
                let mut response = (status, Json(body)).into_response();
                result.apply_headers(response.headers_mut());
                response
            }
            other => (status, Json(json!({ "error": other.to_string(), "code": other.code() }))).into_response(),
        }
    }
}

impl From<RetryError<DbError>> for ApiError {
    fn from(err: RetryError<DbError>) -> Self {
        match err {
            RetryError::Permanent(DbError::InvalidTable(table)) => {
                ApiError::BadRequest(format!("invalid table name: {}", table))
            }
            RetryError::Permanent(_) => ApiError::Upstream,
            RetryError::Exhausted { .. } | RetryError::Cancelled { .. } => ApiError::Unavailable,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "Rate limit store operation failed");
        ApiError::Unavailable
    }
}
