//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;

use secrecy::SecretString;

use crate::config::schema::GuardConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable overriding `identity.client_secret`.
pub const ENV_CLIENT_SECRET: &str = "SESSION_GUARD_CLIENT_SECRET";
/// Environment variable overriding `identity.refresh_token`.
pub const ENV_REFRESH_TOKEN: &str = "SESSION_GUARD_REFRESH_TOKEN";
/// Environment variable overriding `identity.access_token`.
pub const ENV_ACCESS_TOKEN: &str = "SESSION_GUARD_ACCESS_TOKEN";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, apply environment overrides to, and validate a TOML file.
pub fn load_config(path: &Path) -> Result<GuardConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: GuardConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Replace identity secrets with values found in the environment.
/// Empty values are ignored.
pub fn apply_env_overrides(config: &mut GuardConfig, lookup: impl Fn(&str) -> Option<String>) {
    let read = |key: &str| {
        lookup(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(SecretString::from)
    };

    if let Some(secret) = read(ENV_CLIENT_SECRET) {
        config.identity.client_secret = Some(secret);
    }
    if let Some(token) = read(ENV_REFRESH_TOKEN) {
        config.identity.refresh_token = Some(token);
    }
    if let Some(token) = read(ENV_ACCESS_TOKEN) {
        config.identity.access_token = Some(token);
    }
}
