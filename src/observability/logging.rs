//! Structured logging.
//!
//! # Design Decisions
//! - Uses the tracing crate for structured events
//! - `RUST_LOG` wins over the configured level
//! - JSON format when requested, human-readable otherwise
//! - Logs go to stderr so command output on stdout stays clean

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Install the global subscriber. Calling it twice is a no-op.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(&config.log_level).into());

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Logging already initialized");
    }
}

fn default_filter(level: &str) -> String {
    format!("session_guard={level},warn")
}
