use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::http::request::request_id;
use crate::http::response::ApiError;
use crate::http::server::AppState;

/// Bearer token check against `admin.api_key`; the key is read per request so
/// a reload takes effect immediately.
pub async fn admin_auth_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let authorized = {
        let config = state.config.load();
        request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| !config.admin.api_key.is_empty() && token == config.admin.api_key)
    };

    if authorized {
        return next.run(request).await;
    }

    tracing::warn!(
        request_id = %request_id(request.headers()),
        path = %request.uri().path(),
        "Rejected admin request with missing or invalid API key"
    );
    ApiError::Unauthorized.into_response()
}
