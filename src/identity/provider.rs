//! Identity provider contract.

use futures_util::future::BoxFuture;
use secrecy::SecretString;

/// Errors that can occur while obtaining a token.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// Nothing to refresh with.
    #[error("Identity provider not configured: {0}")]
    NotConfigured(String),

    /// The token endpoint could not be reached.
    #[error("Token request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The token endpoint answered with an error status.
    #[error("Token endpoint returned {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The token endpoint answered with something that is not a token.
    #[error("Invalid token response: {0}")]
    Decode(String),
}

/// Source of bearer tokens for token mode.
///
/// Implementations own refresh serialization; callers may invoke
/// [`IdentityProvider::refresh`] concurrently.
pub trait IdentityProvider: Send + Sync {
    /// Token to attach right now, if any.
    fn current_token(&self) -> Option<SecretString>;

    /// Obtain a new token. `Ok(None)` means the provider had nothing to give.
    fn refresh(&self) -> BoxFuture<'_, Result<Option<SecretString>, IdentityError>>;
}
