//! Minimal Supabase REST client: PostgREST row counts and Auth admin user
//! listing.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::error::Error as _;
use std::time::Duration;

use crate::config::schema::{SupabaseConfig, TimeoutConfig};
use crate::resilience::retries::RetryClassify;

const APIKEY_HEADER: &str = "apikey";
const PREFER_HEADER: &str = "prefer";
const CONTENT_RANGE_HEADER: &str = "content-range";

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Request never produced a response.
    #[error("request failed: {message}")]
    Transport {
        code: Option<&'static str>,
        message: String,
    },

    /// The API answered with an error status.
    #[error("{message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("invalid table name: {0:?}")]
    InvalidTable(String),

    #[error("client configuration: {0}")]
    Config(String),
}

impl DbError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return DbError::Decode(err.to_string());
        }
        DbError::Transport {
            code: transport_code(&err),
            message: err.to_string(),
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            DbError::Transport { code, .. } => *code,
            DbError::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

impl RetryClassify for DbError {
    fn error_code(&self) -> Option<&str> {
        self.code()
    }
}

/// Map a transport failure onto the network error code it corresponds to.
fn transport_code(err: &reqwest::Error) -> Option<&'static str> {
    if err.is_timeout() {
        return Some("ETIMEDOUT");
    }

    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if let Some(code) = io.error_code() {
                return Some(match code {
                    "ECONNRESET" => "ECONNRESET",
                    "ECONNREFUSED" => "ECONNREFUSED",
                    _ => "ETIMEDOUT",
                });
            }
        }
        let text = cause.to_string().to_lowercase();
        if text.contains("dns") || text.contains("resolve") || text.contains("name or service not known") {
            return Some("ENOTFOUND");
        }
        source = cause.source();
    }

    if err.is_connect() {
        Some("ECONNREFUSED")
    } else if err.is_request() || err.is_body() {
        Some("ECONNRESET")
    } else {
        None
    }
}

/// PostgREST filter: `column=operator.value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub operator: String,
    pub value: String,
}

impl Filter {
    pub fn new(column: impl Into<String>, operator: impl Into<String>, value: impl ToString) -> Self {
        Self {
            column: column.into(),
            operator: operator.into(),
            value: value.to_string(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
        Self::new(column, "eq", value)
    }

    fn query_pair(&self) -> (String, String) {
        (self.column.clone(), format!("{}.{}", self.operator, self.value))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "created_at")]
    pub created_at: Option<String>,
    #[serde(default, alias = "last_sign_in_at")]
    pub last_sign_in_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPage {
    pub users: Vec<AuthUser>,
    /// Users on this page.
    pub total_count: usize,
}

#[derive(Deserialize)]
struct UsersResponse {
    #[serde(default)]
    users: Vec<AuthUser>,
}

/// Table names are interpolated into the path, so only plain identifiers pass.
pub fn validate_table_name(table: &str) -> Result<(), DbError> {
    if !table.is_empty() && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(DbError::InvalidTable(table.to_string()))
    }
}

/// Parse the total from a `Content-Range` header (`0-24/3573`, `*/0`).
/// An unknown total (`*/*`) counts as zero.
pub fn parse_content_range(value: &str) -> Result<u64, DbError> {
    let total = value
        .rsplit_once('/')
        .map(|(_, total)| total.trim())
        .ok_or_else(|| DbError::Decode(format!("malformed content-range {:?}", value)))?;

    if total == "*" {
        return Ok(0);
    }
    total
        .parse()
        .map_err(|_| DbError::Decode(format!("malformed content-range {:?}", value)))
}

#[derive(Clone)]
pub struct SupabaseClient {
    http: Client,
    base_url: String,
}

impl SupabaseClient {
    pub fn new(config: &SupabaseConfig, timeouts: &TimeoutConfig) -> Result<Self, DbError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.service_role_key)
            .map_err(|_| DbError::Config("service role key is not a valid header value".to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.service_role_key))
            .map_err(|_| DbError::Config("service role key is not a valid header value".to_string()))?;
        headers.insert(APIKEY_HEADER, key);
        headers.insert(AUTHORIZATION, bearer);

        let http = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| DbError::Config(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Exact row count of `table` matching every filter.
    pub async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64, DbError> {
        validate_table_name(table)?;

        let mut query = vec![("select".to_string(), "*".to_string())];
        query.extend(filters.iter().map(Filter::query_pair));

        let response = self
            .http
            .head(format!("{}/rest/v1/{}", self.base_url, table))
            .header(PREFER_HEADER, "count=exact")
            .query(&query)
            .send()
            .await
            .map_err(DbError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(api_error(status, None));
        }

        match response.headers().get(CONTENT_RANGE_HEADER) {
            Some(value) => {
                let value = value
                    .to_str()
                    .map_err(|_| DbError::Decode("content-range is not ASCII".to_string()))?;
                parse_content_range(value)
            }
            None => Ok(0),
        }
    }

    /// One page of Auth users (pages start at 1).
    pub async fn list_users(&self, page: u32, per_page: u32) -> Result<UserPage, DbError> {
        let response = self
            .http
            .get(format!("{}/auth/v1/admin/users", self.base_url))
            .query(&[("page", page), ("per_page", per_page)])
            .send()
            .await
            .map_err(DbError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.ok();
            return Err(api_error(status, body.as_deref()));
        }

        let body: UsersResponse = response.json().await.map_err(DbError::from_reqwest)?;
        Ok(UserPage {
            total_count: body.users.len(),
            users: body.users,
        })
    }
}

/// Build an API error from a PostgREST or Auth error body when there is one.
fn api_error(status: StatusCode, body: Option<&str>) -> DbError {
    let parsed = body.and_then(|b| serde_json::from_str::<serde_json::Value>(b).ok());

    let field = |names: &[&str]| -> Option<String> {
        let value = parsed.as_ref()?;
        names.iter().find_map(|name| match value.get(*name)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    };

    DbError::Api {
        status: status.as_u16(),
        code: field(&["code", "error_code"]),
        message: field(&["message", "msg", "error_description", "error"])
            .unwrap_or_else(|| format!("HTTP {}", status)),
    }
}
