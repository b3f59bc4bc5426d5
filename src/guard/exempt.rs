//! Exemption rule.
//!
//! Exempt requests get no credentials and their failures are never
//! intercepted. Login, logout and health endpoints are exempt so that a
//! failure on them cannot start a recovery loop.

use http::header::HeaderName;
use http::Method;

use crate::http::RequestDescriptor;

/// Default opt-out header.
pub const X_SKIP_AUTH: &str = "x-skip-auth";

/// Default exempt path suffixes.
pub const DEFAULT_EXEMPT_SUFFIXES: [&str; 4] = ["/auth/login", "/auth/logout", "/health", "/q/health"];

/// Decides whether a request bypasses the guard.
#[derive(Debug, Clone)]
pub struct ExemptionRule {
    skip_header: HeaderName,
    suffixes: Vec<String>,
}

impl ExemptionRule {
    pub fn new(skip_header: HeaderName, suffixes: Vec<String>) -> Self {
        Self {
            skip_header,
            suffixes,
        }
    }

    pub fn skip_header(&self) -> &HeaderName {
        &self.skip_header
    }

    /// True if the request carries the skip marker, is an OPTIONS request, or
    /// targets a path ending in one of the exempt suffixes.
    pub fn is_exempt(&self, request: &RequestDescriptor) -> bool {
        self.has_skip_marker(request)
            || request.method() == Method::OPTIONS
            || self
                .suffixes
                .iter()
                .any(|suffix| request.path().ends_with(suffix.as_str()))
    }

    /// Any value other than `0` or `false` counts as the marker.
    fn has_skip_marker(&self, request: &RequestDescriptor) -> bool {
        request
            .headers()
            .get(&self.skip_header)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| {
                let v = v.trim();
                !(v == "0" || v.eq_ignore_ascii_case("false"))
            })
    }
}

impl Default for ExemptionRule {
    fn default() -> Self {
        Self::new(
            HeaderName::from_static(X_SKIP_AUTH),
            DEFAULT_EXEMPT_SUFFIXES.iter().map(|s| s.to_string()).collect(),
        )
    }
}
