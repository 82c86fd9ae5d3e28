//! Gateway service subsystem.
//!
//! # Data Flow
//! ```text
//! Gateway::start
//!     → reactor::Worker per thread (prologue builds a GatewayWorker)
//!     → GatewayWorker::listen (first worker picks the port, the rest share it)
//!     → on_accept → GatewaySession::open
//!
//! Gateway::stop
//!     → each worker's epilogue → GatewayWorker::close → sessions freed
//! ```

pub mod gateway;
pub mod worker;

pub use gateway::{Gateway, GatewayError};
pub use worker::GatewayWorker;
