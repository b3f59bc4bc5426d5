//! Client wrappers for the backend's `/auth` endpoints.
//!
//! Every call goes through the guarded service, so credentials and failure
//! handling are applied the same way as for any other endpoint. Login and
//! logout are exempt by path; logout additionally carries the skip marker.

use std::sync::Arc;

use http::header::{HeaderName, HeaderValue};
use http::{Method, Uri};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tower::{Service, ServiceExt};
use url::Url;

use crate::auth::types::{LoginRequest, PasswordChangeRequest, UserResponse};
use crate::guard::GuardError;
use crate::http::{HttpResponse, RequestDescriptor};
use crate::identity::SsoConfig;
use crate::session::{Session, SessionStore, SessionView};

/// Maximum number of error body characters surfaced to the user.
const MAX_ERROR_CHARS: usize = 200;

pub const LOGIN_PATH: &str = "/auth/login";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const ME_PATH: &str = "/auth/me";
pub const TYPE_PATH: &str = "/auth/type";
pub const SSO_CONFIG_PATH: &str = "/auth/sso-config";
pub const PASSWORD_PATH: &str = "/auth/password";

/// Errors returned by [`AuthClient`].
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error("Request failed ({status}): {message}")]
    Http { status: u16, message: String },

    #[error("Response error: {0}")]
    Decode(String),

    #[error("Request error: {0}")]
    Encode(String),
}

impl ApiError {
    /// True when the guard rejected the call because the session expired.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, ApiError::Guard(e) if e.is_session_expired())
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::Guard(GuardError::SessionExpired { response }) => {
                Some(response.status().as_u16())
            }
            _ => None,
        }
    }
}

/// Auth API client over a guarded service.
#[derive(Clone)]
pub struct AuthClient<S> {
    service: S,
    base_url: Url,
    sessions: SessionStore,
    skip_header: HeaderName,
}

impl<S> AuthClient<S>
where
    S: Service<RequestDescriptor, Response = HttpResponse, Error = GuardError> + Clone + Send,
    S::Future: Send,
{
    pub fn new(service: S, base_url: Url, sessions: SessionStore, skip_header: HeaderName) -> Self {
        Self {
            service,
            base_url,
            sessions,
            skip_header,
        }
    }

    /// Read-only view of the session this client maintains.
    pub fn session(&self) -> SessionView {
        self.sessions.view()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build a fresh descriptor for `path` under the base URL.
    pub fn request(&self, method: Method, path: &str) -> Result<RequestDescriptor, ApiError> {
        let url = build_url(self.base_url.as_str(), path);
        let uri: Uri = url
            .parse()
            .map_err(|e| ApiError::Encode(format!("Invalid URL '{url}': {e}")))?;
        Ok(RequestDescriptor::new(method, uri))
    }

    /// Send any request through the guard. Statuses are not interpreted.
    pub async fn send(&self, request: RequestDescriptor) -> Result<HttpResponse, ApiError> {
        Ok(self.service.clone().oneshot(request).await?)
    }

    /// Log in and record the returned user as the session.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, ApiError> {
        let request = with_json(
            self.request(Method::POST, LOGIN_PATH)?,
            &LoginRequest { username, password },
        )?;
        let user: UserResponse = self.send_json(request).await?;
        let session = Session::from(user);
        self.sessions.set(session.clone());

        tracing::info!(user_id = %session.user_id, "Logged in");
        Ok(session)
    }

    /// Log out on the server. The local session is cleared even if the
    /// server call fails.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let request = self
            .request(Method::POST, LOGOUT_PATH)?
            .with_header(self.skip_header.clone(), HeaderValue::from_static("1"));
        let result = self.send_empty(request).await;
        self.sessions.clear();

        match &result {
            Ok(()) => tracing::info!("Logged out"),
            Err(e) => tracing::warn!(error = %e, "Server logout failed, local session cleared"),
        }
        result
    }

    /// Fetch the current identity and record it as the session.
    pub async fn me(&self) -> Result<Session, ApiError> {
        let request = self.request(Method::GET, ME_PATH)?;
        let user: UserResponse = self.send_json(request).await?;
        let session = Session::from(user);
        self.sessions.set(session.clone());
        Ok(session)
    }

    /// Initialize the session from `/auth/me`. Any failure leaves the
    /// session cleared.
    pub async fn hydrate(&self) -> Option<Arc<Session>> {
        match self.me().await {
            Ok(_) => self.sessions.get(),
            Err(e) => {
                tracing::debug!(error = %e, "No session at startup");
                self.sessions.clear();
                None
            }
        }
    }

    /// Authentication type advertised by the backend.
    pub async fn auth_type(&self) -> Result<String, ApiError> {
        let request = self.request(Method::GET, TYPE_PATH)?;
        let response = self.send_checked(request).await?;
        Ok(response.text().trim().trim_matches('"').to_string())
    }

    pub async fn sso_config(&self) -> Result<SsoConfig, ApiError> {
        let request = self.request(Method::GET, SSO_CONFIG_PATH)?;
        self.send_json(request).await
    }

    pub async fn change_password(&self, current: &str, new: &str) -> Result<(), ApiError> {
        let request = with_json(
            self.request(Method::POST, PASSWORD_PATH)?,
            &PasswordChangeRequest {
                current_password: current,
                new_password: new,
            },
        )?;
        self.send_empty(request).await
    }

    async fn send_checked(&self, request: RequestDescriptor) -> Result<HttpResponse, ApiError> {
        let response = self.send(request).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(ApiError::Http {
                status: response.status().as_u16(),
                message: sanitize_body(&response.text()),
            })
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestDescriptor) -> Result<T, ApiError> {
        let response = self.send_checked(request).await?;
        response
            .json()
            .map_err(|e| ApiError::Decode(format!("Failed to decode response: {e}")))
    }

    async fn send_empty(&self, request: RequestDescriptor) -> Result<(), ApiError> {
        self.send_checked(request).await.map(|_| ())
    }
}

fn with_json<T: Serialize>(request: RequestDescriptor, body: &T) -> Result<RequestDescriptor, ApiError> {
    request
        .with_json(body)
        .map_err(|e| ApiError::Encode(format!("Failed to encode request: {e}")))
}

/// Join a base URL and a path with exactly one `/` between them.
pub fn build_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let path = path.trim();

    if base.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", base, path.trim_start_matches('/'))
    }
}

/// Trim and truncate an error body for display.
fn sanitize_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "Request failed.".to_string()
    } else {
        trimmed.chars().take(MAX_ERROR_CHARS).collect()
    }
}
