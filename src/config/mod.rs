//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → command-line overrides (main.rs)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → shared via Arc to every worker
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; workers derive their settings at start
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_or_default, parse_config, ConfigError};
pub use schema::{
    DnsConfig, GatewayConfig, LimitsConfig, ListenerConfig, LogFormat, ObservabilityConfig, ResponseConfig,
    TimeoutConfig, UpstreamConfig, UpstreamsConfig,
};
pub use validation::{validate_config, ValidationError};
