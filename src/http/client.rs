//! HTTP transport the guard wraps.
//!
//! # Responsibilities
//! - Send a [`RequestDescriptor`] over a pooled hyper client
//! - Enforce the request deadline
//! - Play the browser's part for cookies: send the jar, store `Set-Cookie`
//! - Speak TLS for `https://` backends (rustls, webpki roots)
//!
//! # Design Decisions
//! - Bodies are fully buffered; the guard may need to send them twice
//! - Only errors without a response become `TransportError`; any status,
//!   including 401, is an `Ok` response

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderValue, COOKIE, USER_AGENT};
use http_body_util::{BodyExt, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::time;
use tower::Service;

use crate::config::ApiConfig;
use crate::http::request::RequestDescriptor;
use crate::http::response::HttpResponse;
use crate::session::CookieJar;

/// Failures that happen before a response status is known.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The descriptor could not be turned into a wire request.
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] http::Error),

    /// Connecting or exchanging the request failed.
    #[error("Request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    /// Reading the response body failed.
    #[error("Failed to read response body: {0}")]
    Body(#[from] hyper::Error),

    /// No response within the deadline.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

/// Pooled hyper client plus the shared cookie jar.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    jar: CookieJar,
    timeout: Duration,
    user_agent: Option<HeaderValue>,
}

impl HyperTransport {
    /// Create a transport from the API configuration.
    pub fn new(config: &ApiConfig, jar: CookieJar) -> Self {
        let mut http = HttpConnector::new();
        http.set_connect_timeout(Some(Duration::from_secs(config.connect_timeout_secs)));
        http.enforce_http(false);

        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(http);

        let client = Client::builder(TokioExecutor::new()).build(https);

        Self {
            client,
            jar,
            timeout: Duration::from_secs(config.request_timeout_secs),
            user_agent: HeaderValue::from_str(&config.user_agent).ok(),
        }
    }

    pub fn cookie_jar(&self) -> &CookieJar {
        &self.jar
    }

    /// Send one request and buffer the response.
    pub async fn send(&self, request: RequestDescriptor) -> Result<HttpResponse, TransportError> {
        let mut wire = request.to_http_request()?;

        let headers = wire.headers_mut();
        if !headers.contains_key(COOKIE) {
            if let Some(cookies) = self.jar.cookie_string() {
                if let Ok(value) = HeaderValue::from_str(&cookies) {
                    headers.insert(COOKIE, value);
                }
            }
        }
        if let Some(agent) = &self.user_agent {
            headers.entry(USER_AGENT).or_insert_with(|| agent.clone());
        }

        tracing::trace!(
            request_id = %request.id(),
            method = %request.method(),
            path = %request.path(),
            "Sending request"
        );

        let exchange = async {
            let response = self.client.request(wire).await?;
            let (parts, body) = response.into_parts();
            let body = body.collect().await?.to_bytes();
            Ok::<_, TransportError>(HttpResponse::new(parts.status, parts.headers, body))
        };

        let response = match time::timeout(self.timeout, exchange).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(
                    request_id = %request.id(),
                    path = %request.path(),
                    timeout = ?self.timeout,
                    "Request timed out"
                );
                return Err(TransportError::Timeout(self.timeout));
            }
        };

        self.jar.store_set_cookies(response.headers());

        tracing::debug!(
            request_id = %request.id(),
            method = %request.method(),
            path = %request.path(),
            status = %response.status(),
            "Response received"
        );

        Ok(response)
    }
}

impl Service<RequestDescriptor> for HyperTransport {
    type Response = HttpResponse;
    type Error = TransportError;
    type Future = Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: RequestDescriptor) -> Self::Future {
        let transport = self.clone();
        Box::pin(async move { transport.send(request).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::SET_COOKIE;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn transport(jar: &CookieJar) -> HyperTransport {
        HyperTransport::new(&ApiConfig::default(), jar.clone())
    }

    #[tokio::test]
    async fn test_cookies_sent_and_stored() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<String>();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let _ = tx.send(String::from_utf8_lossy(&buf[..n]).to_lowercase());
            let response = "HTTP/1.1 200 OK\r\nSet-Cookie: csrf=abc; Path=/\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });

        let jar = CookieJar::new();
        jar.seed("SESSION=s1");
        let request = RequestDescriptor::get(format!("http://{addr}/api/project").parse().unwrap());

        let response = transport(&jar).send(request).await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(response.text(), "ok");
        assert!(response.headers().contains_key(SET_COOKIE));
        assert_eq!(jar.get("csrf").as_deref(), Some("abc"));
        let head = rx.await.unwrap();
        assert!(head.contains("cookie: session=s1"));
        assert!(head.contains("x-request-id: "));
    }

    #[tokio::test]
    async fn test_https_scheme_attempts_tls_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            if let Ok((socket, _)) = listener.accept().await {
                let _ = tx.send(());
                drop(socket);
            }
        });

        let request = RequestDescriptor::get(format!("https://{addr}/api/project").parse().unwrap());
        let result = transport(&CookieJar::new()).send(request).await;

        assert!(matches!(result, Err(TransportError::Request(_))));
        assert!(rx.await.is_ok(), "the connector must dial https backends");
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let request = RequestDescriptor::get(format!("http://{addr}/").parse().unwrap());
        let result = transport(&CookieJar::new()).send(request).await;

        assert!(matches!(result, Err(TransportError::Request(_))));
    }
}
