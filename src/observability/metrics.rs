//! Metrics collection.
//!
//! # Metrics
//! - `session_guard_requests_total` (counter): credentialed requests by mode
//! - `session_guard_auth_failures_total` (counter): intercepted 401/403 by mode, status
//! - `session_guard_recoveries_total` (counter): recovery outcome by mode
//!
//! Recording is a no-op until the embedding application installs a recorder.

use http::StatusCode;
use metrics::counter;

use crate::guard::CredentialMode;

pub fn record_request(mode: CredentialMode) {
    counter!("session_guard_requests_total", "mode" => mode.as_str()).increment(1);
}

pub fn record_auth_failure(mode: CredentialMode, status: StatusCode) {
    counter!(
        "session_guard_auth_failures_total",
        "mode" => mode.as_str(),
        "status" => status.as_u16().to_string()
    )
    .increment(1);
}

/// `outcome` is one of `session_expired`, `reissued`, `refresh_failed`.
pub fn record_recovery(mode: CredentialMode, outcome: &'static str) {
    counter!(
        "session_guard_recoveries_total",
        "mode" => mode.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}
