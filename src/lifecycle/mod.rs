//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Seed cookies → Transport → Resolve mode → Policy
//!         → Guard layer → Auth client → Hydrate session
//! ```

pub mod startup;

pub use startup::{start, GuardStack, GuardedClient, StartupError};
