//! Per-worker session settings derived from the configuration.

use crate::config::{GatewayConfig, UpstreamConfig};
use crate::http::{ParserLimits, UpstreamRequest};
use crate::net::ChannelOptions;
use crate::session::{Placeholders, Slot};

/// Where and what to ask one upstream service.
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    pub host: String,
    pub port: u16,
    pub request: UpstreamRequest,
}

impl UpstreamTarget {
    pub fn from_config(upstream: &UpstreamConfig) -> Self {
        Self {
            host: upstream.host.clone(),
            port: upstream.port,
            request: UpstreamRequest::get(upstream),
        }
    }
}

/// Everything a session needs that does not change between sessions.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    upstreams: [UpstreamTarget; 2],
    pub placeholders: Placeholders,
    pub server_name: String,
    pub limits: ParserLimits,
    pub client_channel: ChannelOptions,
    pub upstream_channel: ChannelOptions,
}

impl SessionSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        let limits = &config.limits;
        let base = ChannelOptions {
            input_high_watermark: limits.input_high_watermark,
            write_low_watermark: limits.write_low_watermark,
            ..ChannelOptions::default()
        };

        Self {
            upstreams: [
                UpstreamTarget::from_config(&config.upstreams.name_service),
                UpstreamTarget::from_config(&config.upstreams.joke_service),
            ],
            placeholders: Placeholders {
                name: config.response.placeholder_name.clone(),
                surname: config.response.placeholder_surname.clone(),
            },
            server_name: config.response.server_name.clone(),
            limits: ParserLimits {
                max_head_bytes: limits.max_header_bytes,
                max_body_bytes: limits.max_body_bytes,
            },
            client_channel: ChannelOptions {
                read_timeout: config.timeouts.client_idle(),
                ..base.clone()
            },
            upstream_channel: ChannelOptions {
                read_timeout: config.timeouts.upstream_idle(),
                connect_timeout: config.timeouts.upstream_connect(),
                ..base
            },
        }
    }

    pub fn upstream(&self, slot: Slot) -> &UpstreamTarget {
        &self.upstreams[slot.index()]
    }
}
