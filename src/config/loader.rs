//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::GuardConfig;
use crate::config::validation::{validate_config, ValidationError};

pub const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
pub const ENV_SUPABASE_KEY: &str = "SUPABASE_SERVICE_ROLE_KEY";
pub const ENV_ADMIN_KEY: &str = "CAMPUS_GUARD_ADMIN_KEY";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Load and validate configuration from a TOML file, then apply
/// environment overrides.
pub fn load_config(path: &Path) -> Result<GuardConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content, |name| std::env::var(name).ok())
}

/// Parse `content` with `env` as the source of overrides.
pub fn parse_config<F>(content: &str, env: F) -> Result<GuardConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: GuardConfig = toml::from_str(content)?;
    apply_env_overrides(&mut config, env);

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Secrets come from the environment when present so they stay out of
/// the config file.
pub fn apply_env_overrides<F>(config: &mut GuardConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |name: &str| env(name).filter(|v| !v.trim().is_empty());

    if let Some(url) = non_empty(ENV_SUPABASE_URL) {
        config.supabase.url = url;
    }
    if let Some(key) = non_empty(ENV_SUPABASE_KEY) {
        config.supabase.service_role_key = key;
    }
    if let Some(key) = non_empty(ENV_ADMIN_KEY) {
        config.admin.api_key = key;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_env_overrides_win() {
        let config = parse_config(
            "[supabase]\nurl = \"https://file.supabase.co\"\nservice_role_key = \"from-file\"\n",
            env_of(&[(ENV_SUPABASE_KEY, "from-env"), (ENV_ADMIN_KEY, "admin-secret"), (ENV_SUPABASE_URL, "")]),
        )
        .unwrap();

        assert_eq!(config.supabase.url, "https://file.supabase.co");
        assert_eq!(config.supabase.service_role_key, "from-env");
        assert_eq!(config.admin.api_key, "admin-secret");
    }

    #[test]
    fn test_parse_and_validation_errors() {
        let err = parse_config("[listener\n", env_of(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));

        let err = parse_config("[timeouts]\nrequest_secs = 0\n", env_of(&[])).unwrap_err();
        assert_eq!(err.to_string(), "Validation failed: timeouts.request_secs: must be greater than 0");
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("campus-guard-{}.toml", uuid::Uuid::new_v4()));
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "[rate_limit]\nsweep_interval_secs = 60").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.rate_limit.sweep_interval_secs, 60);

        fs::remove_file(&path).unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Io(_))));
    }
}
