//! Tower layer installing the session guard around a transport.
//!
//! # Flow per request
//! ```text
//! RequestDescriptor (Fresh)
//!     → strip stale bearer header
//!     → exempt? ── yes ──────────────────────────────┐
//!     → policy.prepare_request (CSRF or bearer)       │
//!     → inner service                                 │
//!     → auth failure, not exempt, not retried? ───────┤ no: outcome as-is
//!     → mark Retried → policy.handle_response         │
//!         Reject    → GuardError::SessionExpired      │
//!         PassThrough → original response             │
//!         Reissue   → inner service once more ────────┘
//! ```
//!
//! A reissued descriptor is already `Retried`, so its outcome is returned
//! without another look; this is the only loop bound and it is structural.

use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use http::header::AUTHORIZATION;
use tower::{Layer, Service, ServiceExt};

use crate::guard::error::GuardError;
use crate::guard::exempt::ExemptionRule;
use crate::guard::mode::CredentialMode;
use crate::guard::policy::{CredentialPolicy, Credentials, Recovery};
use crate::http::{HttpResponse, RequestDescriptor, TransportError};
use crate::observability::metrics;

/// Result of looking at a settled outcome.
#[derive(Debug)]
pub enum Verdict {
    /// Return this to the caller.
    Done(Result<HttpResponse, GuardError>),
    /// Send this descriptor once more and return whatever comes back.
    Reissue(RequestDescriptor),
}

/// Request and response interception for one credential mode.
pub struct Interceptor {
    credentials: Credentials,
    exemptions: ExemptionRule,
}

impl Interceptor {
    pub fn new(credentials: Credentials, exemptions: ExemptionRule) -> Self {
        Self {
            credentials,
            exemptions,
        }
    }

    pub fn mode(&self) -> CredentialMode {
        self.credentials.mode()
    }

    /// Decorate an outgoing request with the mode's credential.
    pub fn intercept_request(&self, request: RequestDescriptor) -> RequestDescriptor {
        let request = strip_bearer(request);

        if self.exemptions.is_exempt(&request) {
            tracing::trace!(
                request_id = %request.id(),
                method = %request.method(),
                path = %request.path(),
                "Exempt request, no credentials attached"
            );
            return request;
        }

        metrics::record_request(self.mode());
        self.credentials.prepare_request(request)
    }

    /// Decide what the caller sees for `request`'s outcome.
    pub async fn intercept_response(
        &self,
        request: &RequestDescriptor,
        outcome: Result<HttpResponse, TransportError>,
    ) -> Verdict {
        let response = match outcome {
            Ok(response) => response,
            Err(e) => return Verdict::Done(Err(GuardError::Transport(e))),
        };

        let status = response.status();
        if !self.credentials.is_auth_failure(status) {
            return Verdict::Done(Ok(response));
        }

        if self.exemptions.is_exempt(request) {
            tracing::debug!(
                request_id = %request.id(),
                path = %request.path(),
                status = %status,
                "Auth failure on exempt request passed through"
            );
            return Verdict::Done(Ok(response));
        }

        if request.is_retried() {
            tracing::debug!(
                request_id = %request.id(),
                path = %request.path(),
                status = %status,
                "Auth failure after recovery passed through"
            );
            return Verdict::Done(Ok(response));
        }

        metrics::record_auth_failure(self.mode(), status);
        let retried = request.clone().mark_retried();

        match self.credentials.handle_response(retried, response).await {
            Recovery::PassThrough(response) => Verdict::Done(Ok(response)),
            Recovery::Reject(response) => Verdict::Done(Err(GuardError::SessionExpired { response })),
            Recovery::Reissue(request) => Verdict::Reissue(request),
        }
    }
}

/// Remove an `Authorization: Bearer …` header; other schemes are kept.
fn strip_bearer(request: RequestDescriptor) -> RequestDescriptor {
    let is_bearer = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| {
            v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ")
        });

    if is_bearer {
        tracing::trace!(request_id = %request.id(), "Stripped pre-existing bearer header");
        request.without_header(&AUTHORIZATION)
    } else {
        request
    }
}

/// Layer that installs a [`SessionGuard`] around a transport service.
///
/// Layering the same stack twice duplicates interception. The mode is set
/// once at startup, so build one layer and apply it once.
#[derive(Clone)]
pub struct SessionGuardLayer {
    interceptor: Arc<Interceptor>,
}

impl SessionGuardLayer {
    /// Install the interception behaviour for `credentials`.
    pub fn configure(credentials: Credentials, exemptions: ExemptionRule) -> Self {
        tracing::info!(mode = %credentials.mode(), "Session guard configured");
        Self {
            interceptor: Arc::new(Interceptor::new(credentials, exemptions)),
        }
    }

    pub fn mode(&self) -> CredentialMode {
        self.interceptor.mode()
    }
}

impl<S> Layer<S> for SessionGuardLayer {
    type Service = SessionGuard<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SessionGuard {
            inner,
            interceptor: self.interceptor.clone(),
        }
    }
}

/// Guarded service: attaches credentials and performs at most one recovery
/// per request.
#[derive(Clone)]
pub struct SessionGuard<S> {
    inner: S,
    interceptor: Arc<Interceptor>,
}

impl<S> SessionGuard<S> {
    pub fn mode(&self) -> CredentialMode {
        self.interceptor.mode()
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S> Service<RequestDescriptor> for SessionGuard<S>
where
    S: Service<RequestDescriptor, Response = HttpResponse, Error = TransportError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = HttpResponse;
    type Error = GuardError;
    type Future = BoxFuture<'static, Result<HttpResponse, GuardError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(GuardError::from)
    }

    fn call(&mut self, request: RequestDescriptor) -> Self::Future {
        // Take the service that was driven to readiness, leave a clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let interceptor = self.interceptor.clone();

        Box::pin(async move {
            let request = interceptor.intercept_request(request);
            let outcome = inner.call(request.clone()).await;

            match interceptor.intercept_response(&request, outcome).await {
                Verdict::Done(result) => result,
                Verdict::Reissue(retry) => {
                    let response = inner.ready().await?.call(retry).await?;
                    Ok(response)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::exempt::X_SKIP_AUTH;
    use crate::guard::policy::{SessionPolicy, TokenPolicy};
    use crate::identity::{IdentityError, IdentityProvider};
    use crate::session::{CookieJar, Session, SessionStore};
    use http::header::{HeaderName, HeaderValue};
    use http::{Method, StatusCode};
    use secrecy::SecretString;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const CSRF_HEADER: &str = "x-csrf-token";

    type Calls = Arc<Mutex<Vec<RequestDescriptor>>>;
    type Respond = dyn Fn(&RequestDescriptor, usize) -> Result<HttpResponse, TransportError> + Send + Sync;

    /// Inner service that records every request and answers via `respond`,
    /// which also receives the 1-based call number.
    #[derive(Clone)]
    struct Scripted {
        calls: Calls,
        respond: Arc<Respond>,
    }

    impl Service<RequestDescriptor> for Scripted {
        type Response = HttpResponse;
        type Error = TransportError;
        type Future = std::future::Ready<Result<HttpResponse, TransportError>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: RequestDescriptor) -> Self::Future {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(req.clone());
                calls.len()
            };
            std::future::ready((self.respond)(&req, n))
        }
    }

    fn scripted(
        respond: impl Fn(&RequestDescriptor, usize) -> Result<HttpResponse, TransportError>
            + Send
            + Sync
            + 'static,
    ) -> (Scripted, Calls) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let service = Scripted {
            calls: calls.clone(),
            respond: Arc::new(respond),
        };
        (service, calls)
    }

    fn status(code: StatusCode) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse::from_status(code))
    }

    struct CountingProvider {
        token: Mutex<Option<String>>,
        next: Option<String>,
        fail: bool,
        refreshes: AtomicUsize,
    }

    impl CountingProvider {
        fn new(current: Option<&str>, next: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                token: Mutex::new(current.map(String::from)),
                next: next.map(String::from),
                fail: false,
                refreshes: AtomicUsize::new(0),
            })
        }

        fn failing(current: &str) -> Arc<Self> {
            Arc::new(Self {
                token: Mutex::new(Some(current.to_string())),
                next: None,
                fail: true,
                refreshes: AtomicUsize::new(0),
            })
        }
    }

    impl IdentityProvider for CountingProvider {
        fn current_token(&self) -> Option<SecretString> {
            self.token.lock().unwrap().clone().map(SecretString::from)
        }

        fn refresh(&self) -> BoxFuture<'_, Result<Option<SecretString>, IdentityError>> {
            Box::pin(async move {
                self.refreshes.fetch_add(1, Ordering::SeqCst);
                if self.fail {
                    return Err(IdentityError::NotConfigured("test".to_string()));
                }
                *self.token.lock().unwrap() = self.next.clone();
                Ok(self.next.clone().map(SecretString::from))
            })
        }
    }

    fn session_layer(jar: &CookieJar, sessions: &SessionStore) -> SessionGuardLayer {
        SessionGuardLayer::configure(
            Credentials::Session(SessionPolicy::new(
                jar.clone(),
                sessions.clone(),
                "csrf",
                HeaderName::from_static(CSRF_HEADER),
            )),
            ExemptionRule::default(),
        )
    }

    fn token_layer(provider: Arc<dyn IdentityProvider>) -> SessionGuardLayer {
        SessionGuardLayer::configure(
            Credentials::Token(TokenPolicy::new(provider)),
            ExemptionRule::default(),
        )
    }

    fn req(method: Method, path: &str) -> RequestDescriptor {
        RequestDescriptor::new(method, format!("http://localhost:8080{path}").parse().unwrap())
    }

    fn signed_in() -> SessionStore {
        let sessions = SessionStore::new();
        sessions.set(Session::new("ann", vec!["developer".to_string()]));
        sessions
    }

    #[tokio::test]
    async fn test_csrf_header_matches_cookie_for_state_changing_methods() {
        let jar = CookieJar::new();
        jar.insert("csrf", "tok-42");
        let (inner, calls) = scripted(|_, _| status(StatusCode::OK));
        let guard = session_layer(&jar, &SessionStore::new()).layer(inner);

        for method in [Method::POST, Method::PUT, Method::PATCH, Method::DELETE, Method::GET] {
            guard.clone().oneshot(req(method, "/api/project")).await.unwrap();
        }

        let calls = calls.lock().unwrap();
        for call in &calls[..4] {
            assert_eq!(call.headers().get(CSRF_HEADER).unwrap(), "tok-42");
        }
        assert!(calls[4].headers().get(CSRF_HEADER).is_none());
    }

    #[tokio::test]
    async fn test_no_csrf_cookie_means_no_header() {
        let (inner, calls) = scripted(|_, _| status(StatusCode::OK));
        let guard = session_layer(&CookieJar::new(), &SessionStore::new()).layer(inner);

        guard.oneshot(req(Method::POST, "/api/project")).await.unwrap();

        assert!(calls.lock().unwrap()[0].headers().get(CSRF_HEADER).is_none());
    }

    #[tokio::test]
    async fn test_stale_bearer_stripped_in_session_mode() {
        let (inner, calls) = scripted(|_, _| status(StatusCode::OK));
        let guard = session_layer(&CookieJar::new(), &SessionStore::new()).layer(inner);

        let request = req(Method::GET, "/health")
            .with_header(AUTHORIZATION, HeaderValue::from_static("Bearer stale"));
        guard.clone().oneshot(request).await.unwrap();

        let request = req(Method::GET, "/api/project")
            .with_header(AUTHORIZATION, HeaderValue::from_static("Basic YWRtaW46YWRtaW4="));
        guard.oneshot(request).await.unwrap();

        let calls = calls.lock().unwrap();
        assert!(calls[0].headers().get(AUTHORIZATION).is_none());
        assert_eq!(calls[1].headers().get(AUTHORIZATION).unwrap(), "Basic YWRtaW46YWRtaW4=");
    }

    #[tokio::test]
    async fn test_exempt_requests_get_no_credentials() {
        let jar = CookieJar::new();
        jar.insert("csrf", "tok");
        let (inner, calls) = scripted(|_, _| status(StatusCode::OK));
        let session_guard = session_layer(&jar, &SessionStore::new()).layer(inner.clone());
        let token_guard = token_layer(CountingProvider::new(Some("t"), None)).layer(inner);

        for path in ["/auth/login", "/auth/logout", "/health", "/q/health"] {
            session_guard.clone().oneshot(req(Method::POST, path)).await.unwrap();
            token_guard.clone().oneshot(req(Method::POST, path)).await.unwrap();
        }
        session_guard
            .oneshot(req(Method::OPTIONS, "/api/project"))
            .await
            .unwrap();

        for call in calls.lock().unwrap().iter() {
            assert!(call.headers().get(CSRF_HEADER).is_none());
            assert!(call.headers().get(AUTHORIZATION).is_none());
        }
    }

    #[tokio::test]
    async fn test_token_mode_attaches_current_token() {
        let provider = CountingProvider::new(Some("abc"), None);
        let (inner, calls) = scripted(|_, _| status(StatusCode::OK));
        let guard = token_layer(provider.clone()).layer(inner);

        let request = req(Method::GET, "/api/project")
            .with_header(AUTHORIZATION, HeaderValue::from_static("Bearer leaked"));
        guard.clone().oneshot(request).await.unwrap();

        *provider.token.lock().unwrap() = Some("def".to_string());
        guard.oneshot(req(Method::GET, "/api/project")).await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls[0].headers().get(AUTHORIZATION).unwrap(), "Bearer abc");
        assert_eq!(calls[1].headers().get(AUTHORIZATION).unwrap(), "Bearer def");
    }

    #[tokio::test]
    async fn test_session_401_clears_session_and_tags_rejection() {
        let sessions = signed_in();
        let (inner, calls) = scripted(|_, _| status(StatusCode::UNAUTHORIZED));
        let guard = session_layer(&CookieJar::new(), &sessions).layer(inner);

        let err = guard
            .oneshot(req(Method::GET, "/api/project"))
            .await
            .unwrap_err();

        assert!(err.is_session_expired());
        assert!(sessions.get().is_none());
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_session_403_passes_through() {
        let sessions = signed_in();
        let (inner, _) = scripted(|_, _| status(StatusCode::FORBIDDEN));
        let guard = session_layer(&CookieJar::new(), &sessions).layer(inner);

        let response = guard.oneshot(req(Method::GET, "/api/project")).await.unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(sessions.is_authenticated());
    }

    #[tokio::test]
    async fn test_health_401_untouched() {
        let sessions = signed_in();
        let (inner, calls) = scripted(|_, _| status(StatusCode::UNAUTHORIZED));
        let guard = session_layer(&CookieJar::new(), &sessions).layer(inner);

        let response = guard.oneshot(req(Method::GET, "/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(sessions.is_authenticated());
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].is_retried());
    }

    #[tokio::test]
    async fn test_skip_marked_logout_401_untouched() {
        let sessions = signed_in();
        let provider = CountingProvider::new(Some("t"), Some("t2"));
        let (inner, calls) = scripted(|_, _| status(StatusCode::UNAUTHORIZED));
        let session_guard = session_layer(&CookieJar::new(), &sessions).layer(inner.clone());
        let token_guard = token_layer(provider.clone()).layer(inner);

        let logout = req(Method::POST, "/api/logout")
            .with_header(HeaderName::from_static(X_SKIP_AUTH), HeaderValue::from_static("1"));

        let response = session_guard.oneshot(logout.clone()).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = token_guard.oneshot(logout).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        assert!(sessions.is_authenticated());
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 0);
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_retried_descriptor_passes_through() {
        let sessions = signed_in();
        let (inner, _) = scripted(|_, _| status(StatusCode::UNAUTHORIZED));
        let guard = session_layer(&CookieJar::new(), &sessions).layer(inner);

        let request = req(Method::GET, "/api/project").mark_retried();
        let response = guard.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(sessions.is_authenticated());
    }

    #[tokio::test]
    async fn test_token_403_refresh_reissues_once() {
        let provider = CountingProvider::new(Some("old"), Some("new"));
        let (inner, calls) = scripted(|req, _| {
            match req.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
                Some("Bearer new") => status(StatusCode::OK),
                _ => status(StatusCode::FORBIDDEN),
            }
        });
        let guard = token_layer(provider.clone()).layer(inner);

        let response = guard.oneshot(req(Method::GET, "/api/project")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1);
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].headers().get(AUTHORIZATION).unwrap(), "Bearer old");
        assert_eq!(calls[1].headers().get(AUTHORIZATION).unwrap(), "Bearer new");
        assert!(calls[1].is_retried());
    }

    #[tokio::test]
    async fn test_token_401_refresh_reissues_once() {
        let provider = CountingProvider::new(Some("old"), Some("new"));
        let (inner, calls) = scripted(|req, _| {
            match req.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
                Some("Bearer new") => Ok(HttpResponse::new(
                    StatusCode::OK,
                    Default::default(),
                    "project list",
                )),
                _ => status(StatusCode::UNAUTHORIZED),
            }
        });
        let guard = token_layer(provider.clone()).layer(inner);

        let request = req(Method::POST, "/api/project").with_body("{}");
        let response = guard.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text(), "project list");
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1);

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(!calls[0].is_retried());
        assert!(calls[1].is_retried());
        assert_eq!(calls[1].id(), calls[0].id());
        assert_eq!(calls[1].body(), "{}");
        assert_eq!(calls[1].headers().get(AUTHORIZATION).unwrap(), "Bearer new");
    }

    #[tokio::test]
    async fn test_token_second_failure_propagates() {
        let provider = CountingProvider::new(Some("old"), Some("new"));
        let (inner, calls) = scripted(|_, n| {
            if n == 1 {
                status(StatusCode::UNAUTHORIZED)
            } else {
                status(StatusCode::FORBIDDEN)
            }
        });
        let guard = token_layer(provider.clone()).layer(inner);

        let response = guard.oneshot(req(Method::GET, "/api/project")).await.unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_token_refresh_failure_surfaces_original() {
        let provider = CountingProvider::failing("old");
        let (inner, calls) = scripted(|_, _| status(StatusCode::UNAUTHORIZED));
        let guard = token_layer(provider.clone()).layer(inner);

        let response = guard.oneshot(req(Method::GET, "/api/project")).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_token_refresh_without_token_surfaces_original() {
        let provider = CountingProvider::new(Some("old"), None);
        let (inner, calls) = scripted(|_, _| status(StatusCode::FORBIDDEN));
        let guard = token_layer(provider).layer(inner);

        let response = guard.oneshot(req(Method::GET, "/api/project")).await.unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_network_error_passes_through() {
        let sessions = signed_in();
        let (inner, _) = scripted(|_, _| Err(TransportError::Timeout(Duration::from_secs(1))));
        let guard = session_layer(&CookieJar::new(), &sessions).layer(inner);

        let err = guard
            .oneshot(req(Method::GET, "/api/project"))
            .await
            .unwrap_err();

        assert!(matches!(err, GuardError::Transport(TransportError::Timeout(_))));
        assert!(sessions.is_authenticated());
    }

    #[tokio::test]
    async fn test_concurrent_401s_both_tagged() {
        let sessions = signed_in();
        let (inner, _) = scripted(|_, _| status(StatusCode::UNAUTHORIZED));
        let guard = session_layer(&CookieJar::new(), &sessions).layer(inner);

        let (a, b) = tokio::join!(
            guard.clone().oneshot(req(Method::GET, "/api/project")),
            guard.clone().oneshot(req(Method::DELETE, "/api/file/route.yaml")),
        );

        assert!(a.unwrap_err().is_session_expired());
        assert!(b.unwrap_err().is_session_expired());
        assert!(sessions.get().is_none());
    }
}
