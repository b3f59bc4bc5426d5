//! OAuth2/OIDC token endpoint client.
//!
//! # Responsibilities
//! - Hold the current access token (and refresh token, if any)
//! - Refresh via `refresh_token` grant, or `client_credentials` when only a
//!   client secret is configured
//! - Serialize refreshes: one request in flight, waiters reuse its result
//!
//! # Security Constraints
//! - Tokens and secrets are `SecretString` and never logged

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use futures_util::future::BoxFuture;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use url::Url;

use crate::config::IdentityConfig;
use crate::identity::provider::{IdentityError, IdentityProvider};

/// Maximum number of error body characters kept from the token endpoint.
const MAX_ERROR_CHARS: usize = 200;

/// Keycloak-style SSO settings published by the backend at `/auth/sso-config`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SsoConfig {
    /// Identity server base URL.
    pub url: String,
    /// Realm name.
    pub realm: String,
    /// Public client id.
    pub client_id: String,
}

impl SsoConfig {
    /// Token endpoint of the realm.
    pub fn token_url(&self) -> Result<Url, url::ParseError> {
        let base = self.url.trim_end_matches('/');
        Url::parse(&format!(
            "{base}/realms/{}/protocol/openid-connect/token",
            self.realm
        ))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct TokenSet {
    access_token: Option<SecretString>,
    refresh_token: Option<SecretString>,
    expires_at: Option<Instant>,
}

/// Token client for an OAuth2 token endpoint.
pub struct OidcTokenClient {
    http: reqwest::Client,
    token_url: Url,
    client_id: String,
    client_secret: Option<SecretString>,
    tokens: ArcSwapOption<TokenSet>,
    generation: AtomicU64,
    refresh_lock: Mutex<()>,
}

impl OidcTokenClient {
    /// Build a client from configuration and a resolved token endpoint.
    pub fn new(config: &IdentityConfig, token_url: Url) -> Result<Self, IdentityError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let client = Self {
            http,
            token_url,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            tokens: ArcSwapOption::empty(),
            generation: AtomicU64::new(0),
            refresh_lock: Mutex::new(()),
        };

        if config.access_token.is_some() || config.refresh_token.is_some() {
            client.tokens.store(Some(Arc::new(TokenSet {
                access_token: config.access_token.clone(),
                refresh_token: config.refresh_token.clone(),
                expires_at: None,
            })));
        }

        Ok(client)
    }

    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// True if the current access token is known to be past its lifetime.
    pub fn is_expired(&self) -> bool {
        self.tokens
            .load()
            .as_ref()
            .and_then(|set| set.expires_at)
            .is_some_and(|at| Instant::now() >= at)
    }

    fn grant_form(&self) -> Result<Vec<(&'static str, String)>, IdentityError> {
        let mut form = vec![("client_id", self.client_id.clone())];

        let refresh_token = self
            .tokens
            .load()
            .as_ref()
            .and_then(|set| set.refresh_token.clone());

        match (refresh_token, &self.client_secret) {
            (Some(refresh), _) => {
                form.push(("grant_type", "refresh_token".to_string()));
                form.push(("refresh_token", refresh.expose_secret().to_string()));
            }
            (None, Some(_)) => {
                form.push(("grant_type", "client_credentials".to_string()));
            }
            (None, None) => {
                return Err(IdentityError::NotConfigured(
                    "no refresh token or client secret".to_string(),
                ));
            }
        }
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.expose_secret().to_string()));
        }

        Ok(form)
    }

    async fn refresh_token(&self) -> Result<Option<SecretString>, IdentityError> {
        let seen = self.generation.load(Ordering::Acquire);
        let _guard = self.refresh_lock.lock().await;

        if self.generation.load(Ordering::Acquire) != seen {
            tracing::debug!("Token refreshed by a concurrent caller");
            return Ok(self.current_token());
        }

        let form = self.grant_form()?;
        tracing::debug!(token_url = %self.token_url, "Requesting new access token");

        let response = self
            .http
            .post(self.token_url.clone())
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IdentityError::Rejected {
                status: status.as_u16(),
                message: body.trim().chars().take(MAX_ERROR_CHARS).collect(),
            });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| IdentityError::Decode(e.to_string()))?;

        let previous_refresh = self
            .tokens
            .load()
            .as_ref()
            .and_then(|set| set.refresh_token.clone());

        let access_token = Some(body.access_token)
            .filter(|token| !token.is_empty())
            .map(SecretString::from);

        self.tokens.store(Some(Arc::new(TokenSet {
            access_token: access_token.clone(),
            refresh_token: body.refresh_token.map(SecretString::from).or(previous_refresh),
            expires_at: body
                .expires_in
                .map(|secs| Instant::now() + Duration::from_secs(secs)),
        })));
        self.generation.fetch_add(1, Ordering::AcqRel);

        tracing::info!(expires_in = ?body.expires_in, "Access token refreshed");
        Ok(access_token)
    }
}

impl IdentityProvider for OidcTokenClient {
    fn current_token(&self) -> Option<SecretString> {
        self.tokens
            .load()
            .as_ref()
            .and_then(|set| set.access_token.clone())
    }

    fn refresh(&self) -> BoxFuture<'_, Result<Option<SecretString>, IdentityError>> {
        Box::pin(self.refresh_token())
    }
}
