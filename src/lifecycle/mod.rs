//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (service::Gateway::start):
//!     Load config → Validate → Start workers in order → Accept traffic
//!
//! Shutdown (shutdown.rs):
//!     Signal or worker failure → Stop workers → Epilogues free sessions → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: the first worker binds, the rest reuse its port
//! - A worker failing to start aborts startup and stops the others

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::{wait_for_termination, Termination};
