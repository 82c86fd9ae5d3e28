//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Sessions, workers, lookups produce:
//!     → logging.rs (structured tracing events, one span per session)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Structured fields rather than formatted messages
//! - Metric updates are no-ops until a recorder is installed, so tests and
//!   library users pay nothing for them

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::init_metrics;
