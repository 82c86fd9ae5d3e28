//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses and value ranges (workers > 0, ports valid)
//! - Catch combinations that cannot work (several workers without port reuse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::config::schema::{GatewayConfig, UpstreamConfig};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem, tagged with the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let listener = &config.listener;
    if listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not an ip:port address", listener.bind_address),
        ));
    }
    if listener.workers == 0 {
        errors.push(ValidationError::new("listener.workers", "must be at least 1"));
    }
    if listener.workers > 1 && !listener.reuse_port {
        errors.push(ValidationError::new(
            "listener.reuse_port",
            "must be enabled when more than one worker shares the port",
        ));
    }
    if listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be at least 1"));
    }

    if config.dns.nameserver.parse::<IpAddr>().is_err() {
        errors.push(ValidationError::new(
            "dns.nameserver",
            format!("'{}' is not an IP address", config.dns.nameserver),
        ));
    }
    if config.dns.timeout_ms == 0 {
        errors.push(ValidationError::new("dns.timeout_ms", "must be greater than 0"));
    }
    if config.dns.attempts == 0 {
        errors.push(ValidationError::new("dns.attempts", "must be at least 1"));
    }

    check_upstream("upstreams.name_service", &config.upstreams.name_service, &mut errors);
    check_upstream("upstreams.joke_service", &config.upstreams.joke_service, &mut errors);

    if config.response.placeholder_name.is_empty() {
        errors.push(ValidationError::new("response.placeholder_name", "must not be empty"));
    }
    if config.response.placeholder_surname.is_empty() {
        errors.push(ValidationError::new("response.placeholder_surname", "must not be empty"));
    }
    if config.response.server_name.contains(['\r', '\n']) {
        errors.push(ValidationError::new("response.server_name", "must not contain line breaks"));
    }

    let limits = &config.limits;
    if limits.max_header_bytes == 0 {
        errors.push(ValidationError::new("limits.max_header_bytes", "must be greater than 0"));
    }
    if limits.input_high_watermark == 0 {
        errors.push(ValidationError::new("limits.input_high_watermark", "must be greater than 0"));
    }
    if limits.max_header_bytes > limits.input_high_watermark {
        errors.push(ValidationError::new(
            "limits.max_header_bytes",
            "must not exceed limits.input_high_watermark",
        ));
    }

    let observability = &config.observability;
    if !LOG_LEVELS.contains(&observability.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("'{}' is not one of {}", observability.log_level, LOG_LEVELS.join(", ")),
        ));
    }
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not an ip:port address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_upstream(field: &str, upstream: &UpstreamConfig, errors: &mut Vec<ValidationError>) {
    if upstream.host.is_empty() {
        errors.push(ValidationError::new(format!("{field}.host"), "must not be empty"));
    }
    if upstream.port == 0 {
        errors.push(ValidationError::new(format!("{field}.port"), "must not be 0"));
    }
    if !upstream.path.starts_with('/') {
        errors.push(ValidationError::new(format!("{field}.path"), "must start with '/'"));
    }
    for (name, value) in [("host", &upstream.host), ("path", &upstream.path), ("user_agent", &upstream.user_agent)] {
        let forbidden: &[char] = if name == "user_agent" {
            &['\r', '\n']
        } else {
            &['\r', '\n', ' ']
        };
        if value.contains(forbidden) {
            errors.push(ValidationError::new(
                format!("{field}.{name}"),
                "contains characters not allowed in a request head",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&GatewayConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = GatewayConfig::default();
        config.listener.bind_address = "localhost".into();
        config.listener.workers = 0;
        config.dns.nameserver = "dns.google".into();
        config.upstreams.joke_service.host.clear();
        config.upstreams.name_service.path = "api".into();
        config.observability.log_level = "loud".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "listener.workers",
                "dns.nameserver",
                "upstreams.name_service.path",
                "upstreams.joke_service.host",
                "observability.log_level",
            ]
        );
    }

    #[test]
    fn multiple_workers_need_reuse_port() {
        let mut config = GatewayConfig::default();
        config.listener.reuse_port = false;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "listener.reuse_port");

        config.listener.workers = 1;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn rejects_header_injection() {
        let mut config = GatewayConfig::default();
        config.upstreams.name_service.path = "/api/ HTTP/1.1\r\nX: y".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "upstreams.name_service.path");
    }
}
