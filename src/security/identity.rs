//! Request identity derivation for rate limit keys.

use axum::http::HeaderMap;
use std::fmt;
use std::sync::Arc;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";
pub const CF_CONNECTING_IP: &str = "cf-connecting-ip";

/// Key used when no address header is present.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Extract the client address from proxy headers.
///
/// Priority: first entry of `x-forwarded-for`, then `x-real-ip`, then
/// `cf-connecting-ip`. Empty or non-UTF-8 values are skipped.
pub fn client_ip(headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(first) = header(X_FORWARDED_FOR)
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }

    header(X_REAL_IP)
        .or_else(|| header(CF_CONNECTING_IP))
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

/// Key for limiting an authenticated action independently of network address.
pub fn user_key(user_id: &str, action: &str) -> String {
    format!("user:{}:{}", user_id, action)
}

/// Namespace for keys named by another service through the check endpoint,
/// kept apart from address and user keys.
pub const EXTERNAL_KEY_PREFIX: &str = "ext";

pub fn external_key(key: &str) -> String {
    format!("{}:{}", EXTERNAL_KEY_PREFIX, key)
}

pub type KeyGenerator = Arc<dyn Fn(&HeaderMap) -> String + Send + Sync>;

/// How a route turns a request into a rate limit key.
#[derive(Clone, Default)]
pub enum KeyStrategy {
    /// The client address.
    #[default]
    ClientIp,
    /// `"{prefix}:{client address}"`, so one class of routes gets its own counter.
    Prefixed(&'static str),
    /// Caller-supplied generator.
    Custom(KeyGenerator),
}

impl KeyStrategy {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&HeaderMap) -> String + Send + Sync + 'static,
    {
        KeyStrategy::Custom(Arc::new(f))
    }

    pub fn derive(&self, headers: &HeaderMap) -> String {
        match self {
            KeyStrategy::ClientIp => client_ip(headers),
            KeyStrategy::Prefixed(prefix) => format!("{}:{}", prefix, client_ip(headers)),
            KeyStrategy::Custom(generate) => generate(headers),
        }
    }
}

impl fmt::Debug for KeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyStrategy::ClientIp => f.write_str("ClientIp"),
            KeyStrategy::Prefixed(prefix) => f.debug_tuple("Prefixed").field(prefix).finish(),
            KeyStrategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}
