//! Asynchronous name resolution for upstream hosts.
//!
//! # Responsibilities
//! - Define the [`Resolve`] seam sessions use to look up upstream hosts
//! - Provide the default resolver (static table, then a configured nameserver)
//!
//! # Design Decisions
//! - Lookups return the first usable address; IPv4 is tried before IPv6
//! - A lookup never holds its session alive; see `session::lookup`

pub mod resolver;

use std::net::IpAddr;

use async_trait::async_trait;
use thiserror::Error;

pub use resolver::GatewayResolver;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DnsError {
    #[error("no A or AAAA records found for {0}")]
    NoRecords(String),

    #[error("lookup for {host} failed: {reason}")]
    Lookup { host: String, reason: String },

    #[error("invalid nameserver address: {0}")]
    InvalidNameserver(String),
}

/// Host name to address resolution.
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<IpAddr, DnsError>;
}
