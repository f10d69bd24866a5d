//! Public API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::database::client::validate_table_name;
use crate::database::{safe_count_with_retry, Filter};
use crate::http::response::ApiError;
use crate::http::server::AppState;
use crate::security::identity::external_key;
use crate::security::Preset;

#[derive(Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TableCount {
    pub table: String,
    pub count: u64,
}

const FILTER_OPERATORS: &[&str] = &["eq", "neq", "gt", "gte", "lt", "lte", "like", "ilike", "is", "in"];

/// Turn `?column=op.value` pairs into filters; anything else means `eq`.
fn parse_filters(params: BTreeMap<String, String>) -> Result<Vec<Filter>, ApiError> {
    params
        .into_iter()
        .map(|(column, raw)| -> Result<Filter, ApiError> {
            validate_table_name(&column)
                .map_err(|_| ApiError::BadRequest(format!("invalid column name: {:?}", column)))?;
            Ok(match raw.split_once('.') {
                Some((op, value)) if FILTER_OPERATORS.contains(&op) => Filter::new(column, op, value),
                _ => Filter::eq(column, raw.as_str()),
            })
        })
        .collect()
}

pub async fn table_stats(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Result<Json<TableCount>, ApiError> {
    validate_table_name(&table).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let filters = parse_filters(params)?;

    let policy = state.config.load().retries.clone();
    let count = safe_count_with_retry(&state.db, &policy, &table, &filters).await?;

    Ok(Json(TableCount { table, count }))
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub key: Option<String>,
    #[serde(alias = "userId")]
    pub user_id: Option<String>,
    pub action: Option<String>,
    pub preset: Preset,
}

/// Check (and count) a request against a preset on behalf of another service.
/// Named keys live under `ext:` so they cannot touch address-derived buckets.
pub async fn check_rate_limit(
    State(state): State<AppState>,
    Json(body): Json<CheckRequest>,
) -> Result<Response, ApiError> {
    let result = match (body.key.as_deref(), body.user_id.as_deref(), body.action.as_deref()) {
        (Some(key), _, _) if !key.trim().is_empty() => {
            state.limiter.check_preset(&external_key(key.trim()), body.preset).await
        }
        (_, Some(user_id), Some(action)) if !user_id.is_empty() && !action.is_empty() => {
            let policy = state.limiter.policy(body.preset);
            state.limiter.check_user(user_id, action, &policy).await
        }
        _ => {
            return Err(ApiError::BadRequest(
                "either key or user_id and action is required".to_string(),
            ))
        }
    };

    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };
    let mut response = (status, Json(result)).into_response();
    result.apply_headers(response.headers_mut());
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filters() {
        let mut params = BTreeMap::new();
        params.insert("status".to_string(), "approved".to_string());
        params.insert("rating".to_string(), "gte.4".to_string());
        params.insert("email".to_string(), "a.b@campus.edu".to_string());

        let filters = parse_filters(params).unwrap();
        assert_eq!(
            filters,
            vec![
                Filter::eq("email", "a.b@campus.edu"),
                Filter::new("rating", "gte", "4"),
                Filter::eq("status", "approved"),
            ]
        );
    }

    #[test]
    fn test_parse_filters_rejects_bad_columns() {
        let mut params = BTreeMap::new();
        params.insert("or=(a".to_string(), "1".to_string());
        assert!(matches!(parse_filters(params), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_check_request_accepts_both_spellings() {
        let a: CheckRequest = serde_json::from_str(r#"{"user_id":"u1","action":"post","preset":"write"}"#).unwrap();
        let b: CheckRequest = serde_json::from_str(r#"{"userId":"u1","action":"post","preset":"write"}"#).unwrap();
        assert_eq!(a.user_id, b.user_id);
        assert_eq!(a.preset, Preset::Write);
    }
}
