//! Identity provider subsystem (token mode).
//!
//! # Data Flow
//! ```text
//! startup
//!     → token URL from config, or derived from GET /auth/sso-config
//!     → oidc.rs (OidcTokenClient seeded with configured tokens)
//!
//! guard, per request:   current_token() → Authorization header
//! guard, on 401/403:    refresh()       → new token or failure
//! ```

pub mod oidc;
pub mod provider;

pub use oidc::{OidcTokenClient, SsoConfig};
pub use provider::{IdentityError, IdentityProvider};
