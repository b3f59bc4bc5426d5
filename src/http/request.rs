//! Outgoing request descriptors.
//!
//! A [`RequestDescriptor`] is a value: every change produces a new
//! descriptor. The attempt marker can only move from [`Attempt::Fresh`] to
//! [`Attempt::Retried`]; there is no way back, which is what bounds the guard
//! to a single recovery per request.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method, Request, Uri};
use http_body_util::Full;
use serde::Serialize;
use uuid::Uuid;

/// Header carrying the per-request correlation id.
pub const X_REQUEST_ID: &str = "x-request-id";

/// How many times a descriptor has been sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Attempt {
    /// Not yet retried.
    #[default]
    Fresh,
    /// Already went through one recovery.
    Retried,
}

/// Method, URL, headers and body of a request plus its attempt marker.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    id: Uuid,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    attempt: Attempt,
}

impl RequestDescriptor {
    /// Create a fresh descriptor with no headers and an empty body.
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            attempt: Attempt::Fresh,
        }
    }

    pub fn get(uri: Uri) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: Uri) -> Self {
        Self::new(Method::POST, uri)
    }

    /// Return a copy with `name` set to `value`, replacing earlier values.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Return a copy without any `name` header.
    pub fn without_header(mut self, name: &HeaderName) -> Self {
        self.headers.remove(name);
        self
    }

    /// Return a copy carrying `body`.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Return a copy with `value` serialized as the JSON body.
    pub fn with_json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(self
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .with_body(body))
    }

    /// Consume the descriptor and return it marked as retried.
    #[must_use]
    pub fn mark_retried(self) -> Self {
        Self {
            attempt: Attempt::Retried,
            ..self
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn attempt(&self) -> Attempt {
        self.attempt
    }

    pub fn is_retried(&self) -> bool {
        self.attempt == Attempt::Retried
    }

    /// True for POST, PUT, PATCH and DELETE.
    pub fn is_state_changing(&self) -> bool {
        matches!(
            self.method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }

    /// Build the wire request, tagging it with the correlation id.
    pub fn to_http_request(&self) -> Result<Request<Full<Bytes>>, http::Error> {
        let mut builder = Request::builder()
            .method(self.method.clone())
            .uri(self.uri.clone());

        if let Some(headers) = builder.headers_mut() {
            headers.extend(self.headers.clone());
            if !headers.contains_key(X_REQUEST_ID) {
                if let Ok(value) = HeaderValue::from_str(&self.id.to_string()) {
                    headers.insert(X_REQUEST_ID, value);
                }
            }
        }

        builder.body(Full::new(self.body.clone()))
    }
}
