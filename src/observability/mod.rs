//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! guard, transport, identity, auth client produce:
//!     → logging.rs (structured tracing events, request id on every line)
//!     → metrics.rs (counters through the `metrics` facade)
//! ```
//!
//! # Design Decisions
//! - Tokens, secrets and cookie values are never logged
//! - Request ID flows from descriptor to wire header to log fields

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
