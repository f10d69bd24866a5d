//! Admin API: limiter inspection and maintenance, user listing.
//! Every route is rate limited with the admin preset per client address,
//! then authenticated with the bearer API key.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;
use crate::security::{KeyStrategy, Preset};

pub const ADMIN_KEY_PREFIX: &str = "admin";

pub fn router(state: &AppState) -> Router<AppState> {
    let routes = Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/limiter", get(get_limiter))
        .route("/admin/blocks/{key}", delete(delete_block))
        .route("/admin/sweep", post(post_sweep))
        .route("/admin/users", get(get_users))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware));

    // Added last, so it runs before authentication.
    state.guard(routes, Preset::Admin, KeyStrategy::Prefixed(ADMIN_KEY_PREFIX))
}
