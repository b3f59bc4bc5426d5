//! Per-mode credential policies.
//!
//! Both modes implement the same two operations: decorate an outgoing
//! request, and decide what to do with an authentication failure. The guard
//! only calls [`CredentialPolicy::handle_response`] for descriptors that are
//! neither exempt nor already retried, and always hands them over already
//! marked retried.

use std::future::Future;
use std::sync::Arc;

use http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use http::StatusCode;
use secrecy::{ExposeSecret, SecretString};

use crate::guard::mode::CredentialMode;
use crate::http::{HttpResponse, RequestDescriptor};
use crate::identity::IdentityProvider;
use crate::observability::metrics;
use crate::session::{CookieJar, SessionStore};

/// What to do after an authentication failure.
#[derive(Debug)]
pub enum Recovery {
    /// Hand the original response back unchanged.
    PassThrough(HttpResponse),
    /// The session is gone; surface the tagged rejection.
    Reject(HttpResponse),
    /// Send this (retried) descriptor once more.
    Reissue(RequestDescriptor),
}

/// One credential mode's request decoration and failure handling.
pub trait CredentialPolicy: Send + Sync {
    fn mode(&self) -> CredentialMode;

    /// Attach this mode's credential to a non-exempt request.
    fn prepare_request(&self, request: RequestDescriptor) -> RequestDescriptor;

    /// Recover from an authentication failure. `request` is already marked
    /// retried.
    fn handle_response(
        &self,
        request: RequestDescriptor,
        response: HttpResponse,
    ) -> impl Future<Output = Recovery> + Send;

    fn is_auth_failure(&self, status: StatusCode) -> bool {
        self.mode().is_auth_failure(status)
    }
}

/// Cookie session with CSRF echo.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    jar: CookieJar,
    sessions: SessionStore,
    csrf_cookie: String,
    csrf_header: HeaderName,
}

impl SessionPolicy {
    pub fn new(
        jar: CookieJar,
        sessions: SessionStore,
        csrf_cookie: impl Into<String>,
        csrf_header: HeaderName,
    ) -> Self {
        Self {
            jar,
            sessions,
            csrf_cookie: csrf_cookie.into(),
            csrf_header,
        }
    }
}

impl CredentialPolicy for SessionPolicy {
    fn mode(&self) -> CredentialMode {
        CredentialMode::Session
    }

    fn prepare_request(&self, request: RequestDescriptor) -> RequestDescriptor {
        if !request.is_state_changing() {
            return request;
        }

        let Some(csrf) = self.jar.get(&self.csrf_cookie) else {
            tracing::trace!(path = %request.path(), "No CSRF cookie to echo");
            return request;
        };

        match HeaderValue::from_str(&csrf) {
            Ok(value) => {
                tracing::debug!(
                    request_id = %request.id(),
                    header = %self.csrf_header,
                    "Attached CSRF header"
                );
                request.with_header(self.csrf_header.clone(), value)
            }
            Err(_) => {
                tracing::warn!(cookie = %self.csrf_cookie, "CSRF cookie is not a valid header value");
                request
            }
        }
    }

    async fn handle_response(&self, request: RequestDescriptor, response: HttpResponse) -> Recovery {
        let cleared = self.sessions.clear();
        tracing::warn!(
            request_id = %request.id(),
            path = %request.path(),
            status = %response.status(),
            cleared,
            "Session rejected by server"
        );
        metrics::record_recovery(CredentialMode::Session, "session_expired");
        Recovery::Reject(response)
    }
}

/// Bearer token from an identity provider.
#[derive(Clone)]
pub struct TokenPolicy {
    provider: Arc<dyn IdentityProvider>,
}

impl TokenPolicy {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }
}

impl CredentialPolicy for TokenPolicy {
    fn mode(&self) -> CredentialMode {
        CredentialMode::Token
    }

    fn prepare_request(&self, request: RequestDescriptor) -> RequestDescriptor {
        match self.provider.current_token().as_ref().and_then(bearer_value) {
            Some(value) => {
                tracing::debug!(request_id = %request.id(), "Attached bearer token");
                request.with_header(AUTHORIZATION, value)
            }
            None => request,
        }
    }

    async fn handle_response(&self, request: RequestDescriptor, response: HttpResponse) -> Recovery {
        let refreshed = match self.provider.refresh().await {
            Ok(Some(token)) => bearer_value(&token),
            Ok(None) => {
                tracing::warn!(request_id = %request.id(), "Token refresh returned no token");
                None
            }
            Err(e) => {
                tracing::warn!(request_id = %request.id(), error = %e, "Token refresh failed");
                None
            }
        };

        match refreshed {
            Some(value) => {
                tracing::info!(
                    request_id = %request.id(),
                    path = %request.path(),
                    status = %response.status(),
                    "Re-issuing request with refreshed token"
                );
                metrics::record_recovery(CredentialMode::Token, "reissued");
                Recovery::Reissue(request.with_header(AUTHORIZATION, value))
            }
            None => {
                metrics::record_recovery(CredentialMode::Token, "refresh_failed");
                Recovery::PassThrough(response)
            }
        }
    }
}

/// `Bearer <token>` as a sensitive header value.
pub fn bearer_value(token: &SecretString) -> Option<HeaderValue> {
    let token = token.expose_secret();
    if token.is_empty() {
        return None;
    }
    let mut value = HeaderValue::from_str(&format!("Bearer {token}")).ok()?;
    value.set_sensitive(true);
    Some(value)
}

/// The active policy, chosen once at startup.
#[derive(Clone)]
pub enum Credentials {
    Session(SessionPolicy),
    Token(TokenPolicy),
}

impl CredentialPolicy for Credentials {
    fn mode(&self) -> CredentialMode {
        match self {
            Credentials::Session(policy) => policy.mode(),
            Credentials::Token(policy) => policy.mode(),
        }
    }

    fn prepare_request(&self, request: RequestDescriptor) -> RequestDescriptor {
        match self {
            Credentials::Session(policy) => policy.prepare_request(request),
            Credentials::Token(policy) => policy.prepare_request(request),
        }
    }

    async fn handle_response(&self, request: RequestDescriptor, response: HttpResponse) -> Recovery {
        match self {
            Credentials::Session(policy) => policy.handle_response(request, response).await,
            Credentials::Token(policy) => policy.handle_response(request, response).await,
        }
    }
}
