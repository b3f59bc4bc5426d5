//! Session guard subsystem.
//!
//! # Data Flow
//! ```text
//! caller ──RequestDescriptor──▶ layer.rs (SessionGuard service)
//!                                   │ exempt.rs   (login/logout/health/OPTIONS/skip marker)
//!                                   │ policy.rs   (SessionPolicy | TokenPolicy)
//!                                   ▼
//!                              inner transport
//! ```
//!
//! # Design Decisions
//! - The mode is a tagged variant picked once at startup, never a string
//!   compared per request
//! - At most one recovery per request, enforced by the descriptor's attempt
//!   marker
//! - Network failures are never interpreted
//! - Session mode does not re-send; it clears the session and returns a
//!   tagged rejection for the caller to act on

pub mod error;
pub mod exempt;
pub mod layer;
pub mod mode;
pub mod policy;

pub use error::GuardError;
pub use exempt::{ExemptionRule, DEFAULT_EXEMPT_SUFFIXES, X_SKIP_AUTH};
pub use layer::{Interceptor, SessionGuard, SessionGuardLayer, Verdict};
pub use mode::{CredentialMode, UnknownMode};
pub use policy::{bearer_value, CredentialPolicy, Credentials, Recovery, SessionPolicy, TokenPolicy};
