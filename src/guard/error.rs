//! Guard error type.

use crate::http::{HttpResponse, TransportError};

/// Errors surfaced by a guarded service.
///
/// Responses with any status are `Ok`; only missing responses and the
/// session-expired rejection are errors.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// No response was received. Never interpreted by the guard.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server rejected the session. The session has been cleared and the
    /// caller is expected to send the user through login again.
    #[error("Session expired (HTTP {})", .response.status())]
    SessionExpired { response: HttpResponse },
}

impl GuardError {
    pub fn is_session_expired(&self) -> bool {
        matches!(self, GuardError::SessionExpired { .. })
    }
}
