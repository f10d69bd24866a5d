//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, limits > 0, addresses parse)
//! - Check that the selected backend is usable
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::{GuardConfig, StoreKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "must be a socket address"));
    }
    if config.listener.max_body_bytes == 0 {
        errors.push(ValidationError::new("listener.max_body_bytes", "must be greater than 0"));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be greater than 0"));
    }

    let rl = &config.rate_limit;
    if rl.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("rate_limit.sweep_interval_secs", "must be greater than 0"));
    }
    if rl.store == StoreKind::Redis {
        if url::Url::parse(&rl.redis_url).is_err() {
            errors.push(ValidationError::new("rate_limit.redis_url", "must be a valid URL"));
        }
        if !cfg!(feature = "redis-backend") {
            errors.push(ValidationError::new(
                "rate_limit.store",
                "redis store requires the redis-backend feature",
            ));
        }
    }
    for (preset, policy) in rl.presets.iter() {
        if policy.limit == 0 {
            errors.push(ValidationError::new(format!("rate_limit.presets.{}.limit", preset), "must be greater than 0"));
        }
        if policy.window_ms == 0 {
            errors.push(ValidationError::new(
                format!("rate_limit.presets.{}.window_ms", preset),
                "must be greater than 0",
            ));
        }
        if policy.block_duration_ms == Some(0) {
            errors.push(ValidationError::new(
                format!("rate_limit.presets.{}.block_duration_ms", preset),
                "must be greater than 0 when set",
            ));
        }
    }

    let retries = &config.retries;
    if retries.timeout_ms == 0 {
        errors.push(ValidationError::new("retries.timeout_ms", "must be greater than 0"));
    }
    if !(retries.backoff_factor.is_finite() && retries.backoff_factor >= 1.0) {
        errors.push(ValidationError::new("retries.backoff_factor", "must be a finite number >= 1"));
    }
    if retries.initial_delay_ms > retries.max_delay_ms {
        errors.push(ValidationError::new("retries.initial_delay_ms", "must not exceed retries.max_delay_ms"));
    }

    match url::Url::parse(&config.supabase.url) {
        Ok(u) if u.scheme() == "http" || u.scheme() == "https" => {}
        _ => errors.push(ValidationError::new("supabase.url", "must be an http(s) URL")),
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new("observability.metrics_address", "must be a socket address"));
    }

    if config.admin.enabled && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::new("admin.api_key", "must not be empty when admin is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
