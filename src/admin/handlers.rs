use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::database::retry::DEFAULT_USERS_PER_PAGE;
use crate::database::{safe_list_users_with_retry, UserPage};
use crate::http::response::ApiError;
use crate::http::server::AppState;
use crate::security::store::{BlockEntry, StoreStats, SweepStats};
use crate::security::PresetTable;

#[derive(Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub uptime_secs: u64,
    pub rate_limit_enabled: bool,
    pub backend: String,
}

#[derive(Serialize)]
pub struct LimiterReport {
    pub stats: StoreStats,
    pub presets: PresetTable,
    pub blocked: Vec<BlockEntry>,
}

#[derive(Serialize, Deserialize)]
pub struct UnblockOutcome {
    pub key: String,
    pub unblocked: bool,
}

#[derive(Deserialize)]
pub struct UsersQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "operational".to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        rate_limit_enabled: state.config.load().rate_limit.enabled,
        backend: state.limiter.backend().to_string(),
    })
}

pub async fn get_limiter(State(state): State<AppState>) -> Result<Json<LimiterReport>, ApiError> {
    let stats = state.limiter.stats().await?;
    let blocked = state.limiter.blocked().await?;
    Ok(Json(LimiterReport {
        stats,
        presets: state.limiter.presets(),
        blocked,
    }))
}

pub async fn delete_block(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<UnblockOutcome>, ApiError> {
    if state.limiter.unblock(&key).await? {
        Ok(Json(UnblockOutcome { key, unblocked: true }))
    } else {
        Err(ApiError::NotFound(format!("no active block for {}", key)))
    }
}

pub async fn post_sweep(State(state): State<AppState>) -> Result<Json<SweepStats>, ApiError> {
    let stats = state.limiter.sweep().await?;
    tracing::info!(removed = stats.removed, remaining = stats.remaining, "Manual sweep complete");
    Ok(Json(stats))
}

pub async fn get_users(
    State(state): State<AppState>,
    Query(query): Query<UsersQuery>,
) -> Result<Json<UserPage>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(DEFAULT_USERS_PER_PAGE).clamp(1, 1000);
    let policy = state.config.load().retries.clone();

    let users = safe_list_users_with_retry(&state.db, &policy, page, per_page).await?;
    Ok(Json(users))
}
