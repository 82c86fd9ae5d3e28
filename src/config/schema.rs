//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files, and
//! every section has defaults so an empty file is a valid configuration.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the joke gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, workers, backpressure).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Upstream name resolution.
    pub dns: DnsConfig,

    /// The two upstream web services.
    pub upstreams: UpstreamsConfig,

    /// What the client response looks like.
    pub response: ResponseConfig,

    /// Parser and buffer limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:5000"). Port 0 picks a free port that
    /// every worker then shares.
    pub bind_address: String,

    /// Number of worker threads, each with its own event loop.
    pub workers: usize,

    /// Maximum concurrent client connections per worker (backpressure).
    pub max_connections: usize,

    /// Listen backlog.
    pub backlog: u32,

    /// Bind with SO_REUSEPORT so all workers share the port.
    pub reuse_port: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:5000".to_string(),
            workers: 4,
            max_connections: 10_000,
            backlog: 100,
            reuse_port: true,
        }
    }
}

/// Timeout configuration. Zero disables a timeout.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Client read inactivity timeout in seconds.
    pub client_idle_secs: u64,

    /// Upstream connection establishment timeout in seconds.
    pub upstream_connect_secs: u64,

    /// Upstream read inactivity timeout in seconds.
    pub upstream_idle_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            client_idle_secs: 60,
            upstream_connect_secs: 5,
            upstream_idle_secs: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn client_idle(&self) -> Option<Duration> {
        non_zero_secs(self.client_idle_secs)
    }

    pub fn upstream_connect(&self) -> Option<Duration> {
        non_zero_secs(self.upstream_connect_secs)
    }

    pub fn upstream_idle(&self) -> Option<Duration> {
        non_zero_secs(self.upstream_idle_secs)
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// DNS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DnsConfig {
    /// Nameserver IP address.
    pub nameserver: String,

    /// Nameserver port.
    pub port: u16,

    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,

    /// Attempts per query.
    pub attempts: usize,

    /// Fall back to AAAA when no A record exists.
    pub ipv6_fallback: bool,

    /// Host names answered locally without querying the nameserver.
    pub static_hosts: HashMap<String, IpAddr>,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            nameserver: "8.8.8.8".to_string(),
            port: 53,
            timeout_ms: 1000,
            attempts: 3,
            ipv6_fallback: true,
            static_hosts: HashMap::new(),
        }
    }
}

/// The name and joke services.
///
/// Fields left out of a file section keep that service's own default, so
/// overriding only `host` still sends the service's fixed request path.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(from = "UpstreamsOverrides")]
pub struct UpstreamsConfig {
    pub name_service: UpstreamConfig,
    pub joke_service: UpstreamConfig,
}

impl Default for UpstreamsConfig {
    fn default() -> Self {
        Self {
            name_service: UpstreamConfig {
                host: "uinames.com".to_string(),
                path: "/api/".to_string(),
                ..UpstreamConfig::default()
            },
            joke_service: UpstreamConfig {
                host: "api.icndb.com".to_string(),
                path: "/jokes/random?firstName=Eduardo&lastName=Panisset&limitTo=[nerdy]".to_string(),
                ..UpstreamConfig::default()
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UpstreamsOverrides {
    name_service: UpstreamOverrides,
    joke_service: UpstreamOverrides,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UpstreamOverrides {
    host: Option<String>,
    port: Option<u16>,
    path: Option<String>,
    user_agent: Option<String>,
}

impl UpstreamOverrides {
    fn apply(self, mut base: UpstreamConfig) -> UpstreamConfig {
        if let Some(host) = self.host {
            base.host = host;
        }
        if let Some(port) = self.port {
            base.port = port;
        }
        if let Some(path) = self.path {
            base.path = path;
        }
        if let Some(user_agent) = self.user_agent {
            base.user_agent = user_agent;
        }
        base
    }
}

impl From<UpstreamsOverrides> for UpstreamsConfig {
    fn from(overrides: UpstreamsOverrides) -> Self {
        let defaults = UpstreamsConfig::default();
        Self {
            name_service: overrides.name_service.apply(defaults.name_service),
            joke_service: overrides.joke_service.apply(defaults.joke_service),
        }
    }
}

/// One upstream web service.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamConfig {
    /// Host name, resolved per session and sent as the Host header.
    pub host: String,

    /// TCP port.
    pub port: u16,

    /// Request target including the query string.
    pub path: String,

    /// User-Agent header value.
    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 80,
            path: "/".to_string(),
            user_agent: "Tigera/WebService/1.0.0".to_string(),
        }
    }
}

/// Client response settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResponseConfig {
    /// Server header value.
    pub server_name: String,

    /// Token in the joke replaced by the fetched first name.
    pub placeholder_name: String,

    /// Token in the joke replaced by the fetched surname.
    pub placeholder_surname: String,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            server_name: "Tigera/WebServer/1.0.0".to_string(),
            placeholder_name: "Eduardo".to_string(),
            placeholder_surname: "Panisset".to_string(),
        }
    }
}

/// Parser and buffer limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum size of a start line plus headers.
    pub max_header_bytes: usize,

    /// Maximum decoded body size.
    pub max_body_bytes: usize,

    /// Reading pauses while this many input bytes are buffered.
    pub input_high_watermark: usize,

    /// Output level at or below which the channel reports writable.
    pub write_low_watermark: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: 64 * 1024,
            max_body_bytes: 1024 * 1024,
            input_high_watermark: 16 * 1024 * 1024,
            write_low_watermark: 0,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
