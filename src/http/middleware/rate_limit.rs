//! Rate limit middleware.
//! Derives the key, checks the route's preset and either rejects with 429 or
//! lets the request through with the `X-RateLimit-*` headers attached.

use arc_swap::ArcSwap;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::config::GuardConfig;
use crate::http::request::request_id;
use crate::http::response::ApiError;
use crate::security::{KeyStrategy, Preset, RateLimiter};

/// Per-route limiter settings.
#[derive(Clone)]
pub struct RouteGuard {
    pub limiter: Arc<RateLimiter>,
    pub config: Arc<ArcSwap<GuardConfig>>,
    pub preset: Preset,
    pub strategy: KeyStrategy,
}

pub async fn rate_limit_middleware(State(guard): State<RouteGuard>, request: Request, next: Next) -> Response {
    if !guard.config.load().rate_limit.enabled {
        return next.run(request).await;
    }

    let (key, result) = guard
        .limiter
        .check_request(request.headers(), guard.preset, &guard.strategy)
        .await;

    if !result.success {
        tracing::warn!(
            request_id = %request_id(request.headers()),
            key = %key,
            preset = %guard.preset,
            path = %request.uri().path(),
            retry_after = ?result.retry_after,
            "Rate limit exceeded"
        );
        return ApiError::RateLimited(result).into_response();
    }

    let mut response = next.run(request).await;
    // Handlers that report on another key set their own headers.
    let headers = response.headers_mut();
    for (name, value) in result.headers() {
        headers.entry(name).or_insert(value);
    }
    response
}
