//! Startup orchestration.
//!
//! # Responsibilities
//! - Seed the cookie jar and build the transport
//! - Resolve the credential mode (asking the backend when set to `auto`)
//! - Build the credential policy, including the token client in token mode
//! - Install the guard layer once and hydrate the session from `/auth/me`
//!
//! # Design Decisions
//! - Fail fast on anything that makes the guard unusable
//! - A failed initial token fetch is not fatal; the first 401 retries it
//! - Subsystems initialize in order, not concurrently

use std::sync::Arc;

use http::header::{HeaderName, InvalidHeaderName};
use tower::util::MapErr;
use tower::{Layer, ServiceExt};
use url::Url;

use crate::auth::{ApiError, AuthClient};
use crate::config::{GuardConfig, IdentityConfig, ModeSetting};
use crate::guard::{
    CredentialMode, Credentials, ExemptionRule, GuardError, SessionGuard, SessionGuardLayer,
    SessionPolicy, TokenPolicy, UnknownMode,
};
use crate::http::{HyperTransport, TransportError};
use crate::identity::{IdentityError, IdentityProvider, OidcTokenClient};
use crate::session::{CookieJar, SessionStore, SessionView};

/// Auth client over the fully guarded transport.
pub type GuardedClient = AuthClient<SessionGuard<HyperTransport>>;

/// Errors that abort startup.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Invalid base URL '{url}': {source}")]
    BaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid header name '{name}': {source}")]
    HeaderName {
        name: String,
        #[source]
        source: InvalidHeaderName,
    },

    #[error("Could not resolve credential mode: {0}")]
    ModeDiscovery(#[source] ApiError),

    #[error(transparent)]
    UnknownMode(#[from] UnknownMode),

    #[error("Token mode requires identity.client_id")]
    MissingClientId,

    #[error("Could not resolve token endpoint: {0}")]
    TokenUrl(String),

    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// Everything a caller needs after startup.
pub struct GuardStack {
    pub client: GuardedClient,
    /// Read-only; only the guard and the auth client change the session.
    pub sessions: SessionView,
    pub jar: CookieJar,
    pub mode: CredentialMode,
}

/// Build the guarded stack from validated configuration.
pub async fn start(config: &GuardConfig) -> Result<GuardStack, StartupError> {
    let base_url = Url::parse(&config.api.base_url).map_err(|source| StartupError::BaseUrl {
        url: config.api.base_url.clone(),
        source,
    })?;
    let skip_header = header_name(&config.credentials.skip_header)?;
    let csrf_header = header_name(&config.credentials.csrf_header)?;

    let jar = CookieJar::new();
    for cookie in &config.credentials.cookies {
        jar.seed(cookie);
    }

    let transport = HyperTransport::new(&config.api, jar.clone());
    let bare = bare_client(transport.clone(), &base_url, &skip_header);

    let mode = resolve_mode(config.credentials.mode, &bare).await?;
    tracing::info!(mode = %mode, base_url = %base_url, "Credential mode resolved");

    let sessions = SessionStore::new();
    let credentials = match mode {
        CredentialMode::Session => Credentials::Session(SessionPolicy::new(
            jar.clone(),
            sessions.clone(),
            config.credentials.csrf_cookie.clone(),
            csrf_header,
        )),
        CredentialMode::Token => {
            let provider = token_client(&config.identity, &bare).await?;
            Credentials::Token(TokenPolicy::new(provider))
        }
    };

    let exemptions = ExemptionRule::new(
        skip_header.clone(),
        config.credentials.exempt_suffixes.clone(),
    );
    let layer = SessionGuardLayer::configure(credentials, exemptions);
    let client = AuthClient::new(layer.layer(transport), base_url, sessions.clone(), skip_header);
    let sessions = sessions.view();

    match client.hydrate().await {
        Some(session) => tracing::info!(user_id = %session.user_id, "Session restored"),
        None => tracing::info!("No active session"),
    }

    Ok(GuardStack {
        client,
        sessions,
        jar,
        mode,
    })
}

/// Transport with its errors lifted into the guard's error type.
type BareService = MapErr<HyperTransport, fn(TransportError) -> GuardError>;

/// Auth client over the transport without the guard, for calls made before
/// the mode is known.
fn bare_client(
    transport: HyperTransport,
    base_url: &Url,
    skip_header: &HeaderName,
) -> AuthClient<BareService> {
    let to_guard_error: fn(TransportError) -> GuardError = GuardError::from;
    AuthClient::new(
        transport.map_err(to_guard_error),
        base_url.clone(),
        SessionStore::new(),
        skip_header.clone(),
    )
}

async fn resolve_mode(
    setting: ModeSetting,
    bare: &AuthClient<BareService>,
) -> Result<CredentialMode, StartupError> {
    match setting {
        ModeSetting::Session => Ok(CredentialMode::Session),
        ModeSetting::Token => Ok(CredentialMode::Token),
        ModeSetting::Auto => {
            let advertised = bare.auth_type().await.map_err(StartupError::ModeDiscovery)?;
            tracing::debug!(advertised = %advertised, "Backend auth type");
            Ok(advertised.parse()?)
        }
    }
}

async fn token_client(
    identity: &IdentityConfig,
    bare: &AuthClient<BareService>,
) -> Result<Arc<dyn IdentityProvider>, StartupError> {
    if identity.client_id.trim().is_empty() {
        return Err(StartupError::MissingClientId);
    }

    let token_url = match &identity.token_url {
        Some(url) => Url::parse(url).map_err(|e| StartupError::TokenUrl(format!("{url}: {e}")))?,
        None => {
            let sso = bare
                .sso_config()
                .await
                .map_err(|e| StartupError::TokenUrl(e.to_string()))?;
            sso.token_url()
                .map_err(|e| StartupError::TokenUrl(e.to_string()))?
        }
    };
    tracing::info!(token_url = %token_url, client_id = %identity.client_id, "Token endpoint resolved");

    let client = OidcTokenClient::new(identity, token_url)?;
    if identity.access_token.is_none() {
        match client.refresh().await {
            Ok(Some(_)) => tracing::info!("Initial access token obtained"),
            Ok(None) => tracing::warn!("Identity provider returned no access token"),
            Err(e) => tracing::warn!(error = %e, "Initial token fetch failed"),
        }
    }

    Ok(Arc::new(client))
}

fn header_name(name: &str) -> Result<HeaderName, StartupError> {
    HeaderName::from_bytes(name.trim().as_bytes()).map_err(|source| StartupError::HeaderName {
        name: name.to_string(),
        source,
    })
}
