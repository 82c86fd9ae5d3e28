//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global tracing subscriber
//! - Pick the log level from the environment or the config
//! - Switch between human-readable and JSON output
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the config so operators can raise verbosity
//!   without editing files
//! - Thread names are printed, since every worker runs on its own thread

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ObservabilityConfig};

/// Filter used when `RUST_LOG` is not set.
pub fn default_directive(config: &ObservabilityConfig) -> String {
    format!("joke_gateway={}", config.log_level)
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(config)));

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Pretty => registry.with(fmt::layer().with_thread_names(true)).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_thread_names(true).with_current_span(true))
            .try_init(),
    }
}
