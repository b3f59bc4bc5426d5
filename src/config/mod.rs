//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, apply SESSION_GUARD_* environment overrides)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → startup wires it into transport, identity provider and guard
//! ```
//!
//! # Design Decisions
//! - Config is read once; the credential mode cannot change at runtime
//! - All fields have defaults to allow minimal configs
//! - Secrets are `SecretString` and never printed by `Debug`

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{apply_env_overrides, load_config, ConfigError};
pub use schema::{
    ApiConfig, CredentialsConfig, GuardConfig, IdentityConfig, ModeSetting, ObservabilityConfig,
};
pub use validation::{validate_config, ValidationError};
