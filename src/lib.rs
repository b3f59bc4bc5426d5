//! Session guard: credential attachment and retry-once recovery for an
//! HTTP client talking to a session- or token-authenticated backend.

pub mod auth;
pub mod config;
pub mod guard;
pub mod http;
pub mod identity;
pub mod lifecycle;
pub mod observability;
pub mod session;

pub use auth::{ApiError, AuthClient};
pub use config::GuardConfig;
pub use guard::{CredentialMode, GuardError, SessionGuard, SessionGuardLayer};
pub use http::{HttpResponse, HyperTransport, RequestDescriptor};
pub use lifecycle::{start, GuardStack};
pub use session::{Session, SessionStore};
