//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::guard::DEFAULT_EXEMPT_SUFFIXES;

/// Root configuration for the session guard.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Backend API settings.
    pub api: ApiConfig,

    /// Credential attachment settings.
    pub credentials: CredentialsConfig,

    /// Identity provider settings (token mode only).
    pub identity: IdentityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Backend API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL every request path is resolved against.
    pub base_url: String,

    /// Total time allowed for a single request/response exchange, in seconds.
    pub request_timeout_secs: u64,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// User-Agent header sent on every request.
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout_secs: 30,
            connect_timeout_secs: 5,
            user_agent: concat!("session-guard/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Credential mode as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModeSetting {
    /// Cookie session plus CSRF header.
    #[default]
    Session,
    /// Bearer token from the identity provider.
    Token,
    /// Ask the backend (`GET /auth/type`) once at startup.
    Auto,
}

/// Credential attachment configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Which credential mode to run in.
    pub mode: ModeSetting,

    /// Cookie holding the CSRF value.
    pub csrf_cookie: String,

    /// Header the CSRF value is echoed in.
    pub csrf_header: String,

    /// Header callers set to opt a request out of interception.
    pub skip_header: String,

    /// Path suffixes that are never intercepted.
    pub exempt_suffixes: Vec<String>,

    /// Cookies seeded into the jar at startup (`name=value`).
    pub cookies: Vec<String>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            mode: ModeSetting::Session,
            csrf_cookie: "csrf".to_string(),
            csrf_header: "X-CSRF-Token".to_string(),
            skip_header: "X-Skip-Auth".to_string(),
            exempt_suffixes: default_exempt_suffixes(),
            cookies: Vec::new(),
        }
    }
}

fn default_exempt_suffixes() -> Vec<String> {
    DEFAULT_EXEMPT_SUFFIXES
        .into_iter()
        .map(String::from)
        .collect()
}

/// Identity provider configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// OAuth2 token endpoint. Derived from `/auth/sso-config` when unset.
    pub token_url: Option<String>,

    /// OAuth2 client identifier.
    pub client_id: String,

    /// OAuth2 client secret for the client-credentials grant.
    pub client_secret: Option<SecretString>,

    /// Refresh token for the refresh-token grant.
    pub refresh_token: Option<SecretString>,

    /// Access token to start with, if one was issued out of band.
    pub access_token: Option<SecretString>,

    /// Token endpoint request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            token_url: None,
            client_id: String::new(),
            client_secret: None,
            refresh_token: None,
            access_token: None,
            timeout_secs: 10,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_defaults() {
        let config = GuardConfig::default();
        assert_eq!(config.credentials.mode, ModeSetting::Session);
        assert_eq!(config.credentials.csrf_cookie, "csrf");
        assert_eq!(config.credentials.csrf_header, "X-CSRF-Token");
        assert_eq!(config.credentials.skip_header, "X-Skip-Auth");
        assert_eq!(
            config.credentials.exempt_suffixes,
            vec!["/auth/login", "/auth/logout", "/health", "/q/health"]
        );
        assert_eq!(config.credentials.exempt_suffixes, DEFAULT_EXEMPT_SUFFIXES.to_vec());
        assert_eq!(config.api.request_timeout_secs, 30);
    }

    #[test]
    fn test_minimal_toml() {
        let config: GuardConfig = toml::from_str(
            r#"
            [credentials]
            mode = "token"

            [identity]
            client_id = "designer"
            refresh_token = "r-1"
            "#,
        )
        .unwrap();

        assert_eq!(config.credentials.mode, ModeSetting::Token);
        assert_eq!(config.credentials.csrf_cookie, "csrf");
        assert_eq!(config.identity.client_id, "designer");
        assert_eq!(
            config.identity.refresh_token.as_ref().map(|t| t.expose_secret()),
            Some("r-1")
        );
        assert_eq!(config.api.base_url, "http://localhost:8080");
    }
}
