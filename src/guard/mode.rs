//! Credential mode tag.

use std::fmt;
use std::str::FromStr;

use http::StatusCode;

/// Which kind of credential the guard attaches. Fixed for the process
/// lifetime once the guard is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialMode {
    /// Cookie session with a CSRF header on state-changing requests.
    Session,
    /// Bearer token from an identity provider.
    Token,
}

impl CredentialMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialMode::Session => "session",
            CredentialMode::Token => "token",
        }
    }

    /// Statuses this mode treats as an authentication failure.
    pub fn is_auth_failure(&self, status: StatusCode) -> bool {
        match self {
            CredentialMode::Session => status == StatusCode::UNAUTHORIZED,
            CredentialMode::Token => {
                status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
            }
        }
    }
}

impl fmt::Display for CredentialMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognised mode string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown credential mode '{0}'")]
pub struct UnknownMode(pub String);

impl FromStr for CredentialMode {
    type Err = UnknownMode;

    /// Accepts the backend's `/auth/type` values as well as the mode names.
    /// `public` servers take no credentials and run in session mode.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_matches('"').to_ascii_lowercase().as_str() {
            "session" | "basic" | "public" => Ok(CredentialMode::Session),
            "token" | "oidc" => Ok(CredentialMode::Token),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}
