//! Configuration validation.
//!
//! Serde handles the syntactic side; this module checks values that parse
//! but cannot work (bad URLs, zero timeouts, unusable header names). Every
//! problem is collected so a single run reports all of them.

use http::HeaderName;
use url::Url;

use crate::config::schema::{GuardConfig, ModeSetting};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_http_url("api.base_url", &config.api.base_url, &mut errors);

    if config.api.request_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "api.request_timeout_secs",
            "must be greater than zero",
        ));
    }
    if config.api.connect_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "api.connect_timeout_secs",
            "must be greater than zero",
        ));
    }

    let credentials = &config.credentials;
    check_header_name("credentials.csrf_header", &credentials.csrf_header, &mut errors);
    check_header_name("credentials.skip_header", &credentials.skip_header, &mut errors);

    if credentials.csrf_cookie.trim().is_empty() || credentials.csrf_cookie.contains(['=', ';']) {
        errors.push(ValidationError::new(
            "credentials.csrf_cookie",
            "must be a non-empty cookie name without '=' or ';'",
        ));
    }

    for suffix in &credentials.exempt_suffixes {
        if !suffix.starts_with('/') {
            errors.push(ValidationError::new(
                "credentials.exempt_suffixes",
                format!("'{suffix}' must start with '/'"),
            ));
        }
    }

    for cookie in &credentials.cookies {
        match cookie.split_once('=') {
            Some((name, _)) if !name.trim().is_empty() => {}
            _ => errors.push(ValidationError::new(
                "credentials.cookies",
                format!("'{cookie}' is not of the form name=value"),
            )),
        }
    }

    if credentials.mode == ModeSetting::Token && config.identity.client_id.trim().is_empty() {
        errors.push(ValidationError::new(
            "identity.client_id",
            "is required in token mode",
        ));
    }
    if let Some(token_url) = &config.identity.token_url {
        check_http_url("identity.token_url", token_url, &mut errors);
    }
    if config.identity.timeout_secs == 0 {
        errors.push(ValidationError::new(
            "identity.timeout_secs",
            "must be greater than zero",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_http_url(field: &'static str, raw: &str, errors: &mut Vec<ValidationError>) {
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => errors.push(ValidationError::new(
            field,
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new(field, format!("invalid URL: {e}"))),
    }
}

fn check_header_name(field: &'static str, raw: &str, errors: &mut Vec<ValidationError>) {
    if HeaderName::from_bytes(raw.as_bytes()).is_err() {
        errors.push(ValidationError::new(
            field,
            format!("'{raw}' is not a valid header name"),
        ));
    }
}
