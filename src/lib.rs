//! Joke Gateway Library

pub mod config;
pub mod dns;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod reactor;
pub mod service;
pub mod session;

pub use config::schema::GatewayConfig;
pub use lifecycle::Shutdown;
pub use service::{Gateway, GatewayError};
