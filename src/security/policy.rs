//! Rate limit policies and the per-endpoint-class preset table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SECOND_MS: u64 = 1_000;
const MINUTE_MS: u64 = 60 * SECOND_MS;

/// Fixed-window policy applied to a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Maximum requests allowed per window.
    pub limit: u32,

    /// Window length in milliseconds.
    pub window_ms: u64,

    /// How long a key stays blocked after exceeding the limit.
    /// `None` means the key is only throttled until the window resets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_duration_ms: Option<u64>,
}

impl RateLimitPolicy {
    pub const fn new(limit: u32, window_ms: u64) -> Self {
        Self {
            limit,
            window_ms,
            block_duration_ms: None,
        }
    }

    pub const fn with_block(mut self, block_duration_ms: u64) -> Self {
        self.block_duration_ms = Some(block_duration_ms);
        self
    }
}

/// Endpoint classes with their own policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Auth,
    Api,
    Upload,
    Admin,
    Read,
    Write,
}

impl Preset {
    pub const ALL: [Preset; 6] = [
        Preset::Auth,
        Preset::Api,
        Preset::Upload,
        Preset::Admin,
        Preset::Read,
        Preset::Write,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Auth => "auth",
            Preset::Api => "api",
            Preset::Upload => "upload",
            Preset::Admin => "admin",
            Preset::Read => "read",
            Preset::Write => "write",
        }
    }

    /// Built-in policy for this class.
    pub fn default_policy(&self) -> RateLimitPolicy {
        match self {
            Preset::Auth => RateLimitPolicy::new(5, 15 * MINUTE_MS).with_block(30 * MINUTE_MS),
            Preset::Api => RateLimitPolicy::new(100, MINUTE_MS).with_block(5 * MINUTE_MS),
            Preset::Upload => RateLimitPolicy::new(10, 60 * MINUTE_MS),
            Preset::Admin => RateLimitPolicy::new(50, MINUTE_MS).with_block(60 * MINUTE_MS),
            Preset::Read => RateLimitPolicy::new(200, MINUTE_MS),
            Preset::Write => RateLimitPolicy::new(30, MINUTE_MS).with_block(10 * MINUTE_MS),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown rate limit preset '{0}'")]
pub struct UnknownPreset(pub String);

impl FromStr for Preset {
    type Err = UnknownPreset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Preset::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownPreset(s.to_string()))
    }
}

/// Policies for every preset. Missing entries in a config file fall back to
/// the built-in table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresetTable {
    pub auth: RateLimitPolicy,
    pub api: RateLimitPolicy,
    pub upload: RateLimitPolicy,
    pub admin: RateLimitPolicy,
    pub read: RateLimitPolicy,
    pub write: RateLimitPolicy,
}

impl PresetTable {
    pub fn get(&self, preset: Preset) -> RateLimitPolicy {
        match preset {
            Preset::Auth => self.auth,
            Preset::Api => self.api,
            Preset::Upload => self.upload,
            Preset::Admin => self.admin,
            Preset::Read => self.read,
            Preset::Write => self.write,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Preset, RateLimitPolicy)> + '_ {
        Preset::ALL.into_iter().map(|p| (p, self.get(p)))
    }
}

impl Default for PresetTable {
    fn default() -> Self {
        Self {
            auth: Preset::Auth.default_policy(),
            api: Preset::Api.default_policy(),
            upload: Preset::Upload.default_policy(),
            admin: Preset::Admin.default_policy(),
            read: Preset::Read.default_policy(),
            write: Preset::Write.default_policy(),
        }
    }
}
