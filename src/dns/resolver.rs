//! Default resolver: static hosts, IP literals, then a single nameserver.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{LookupIpStrategy, NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;

use crate::config::DnsConfig;
use crate::dns::{DnsError, Resolve};

pub struct GatewayResolver {
    static_hosts: HashMap<String, IpAddr>,
    upstream: Option<TokioAsyncResolver>,
}

impl GatewayResolver {
    /// Build a resolver that queries `config.nameserver` over UDP/TCP.
    pub fn from_config(config: &DnsConfig) -> Result<Self, DnsError> {
        let nameserver: IpAddr = config
            .nameserver
            .parse()
            .map_err(|_| DnsError::InvalidNameserver(config.nameserver.clone()))?;

        let group = NameServerConfigGroup::from_ips_clear(&[nameserver], config.port, true);
        let resolver_config = ResolverConfig::from_parts(None, vec![], group);

        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_millis(config.timeout_ms);
        opts.attempts = config.attempts;
        opts.use_hosts_file = false;
        opts.ip_strategy = if config.ipv6_fallback {
            LookupIpStrategy::Ipv4thenIpv6
        } else {
            LookupIpStrategy::Ipv4Only
        };

        tracing::debug!(
            nameserver = %nameserver,
            port = config.port,
            timeout_ms = config.timeout_ms,
            attempts = config.attempts,
            "DNS resolver configured"
        );

        Ok(Self {
            static_hosts: normalize(&config.static_hosts),
            upstream: Some(TokioAsyncResolver::tokio(resolver_config, opts)),
        })
    }

    /// A resolver that only answers from `hosts` and IP literals.
    pub fn static_only(hosts: HashMap<String, IpAddr>) -> Self {
        Self {
            static_hosts: normalize(&hosts),
            upstream: None,
        }
    }
}

fn normalize(hosts: &HashMap<String, IpAddr>) -> HashMap<String, IpAddr> {
    hosts
        .iter()
        .map(|(host, ip)| (host.to_ascii_lowercase(), *ip))
        .collect()
}

#[async_trait]
impl Resolve for GatewayResolver {
    async fn resolve(&self, host: &str) -> Result<IpAddr, DnsError> {
        if let Some(ip) = self.static_hosts.get(&host.to_ascii_lowercase()) {
            return Ok(*ip);
        }
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }
        let Some(upstream) = &self.upstream else {
            return Err(DnsError::NoRecords(host.to_owned()));
        };

        let lookup = upstream.lookup_ip(host).await.map_err(|err| match err.kind() {
            ResolveErrorKind::NoRecordsFound { .. } => DnsError::NoRecords(host.to_owned()),
            _ => DnsError::Lookup {
                host: host.to_owned(),
                reason: err.to_string(),
            },
        })?;

        lookup
            .iter()
            .next()
            .ok_or_else(|| DnsError::NoRecords(host.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_hosts_are_case_insensitive() {
        let mut hosts = HashMap::new();
        hosts.insert("Names.Example".to_string(), "10.0.0.7".parse().unwrap());
        let resolver = GatewayResolver::static_only(hosts);

        assert_eq!(resolver.resolve("names.example").await.unwrap(), "10.0.0.7".parse::<IpAddr>().unwrap());
        assert_eq!(resolver.resolve("::1").await.unwrap(), "::1".parse::<IpAddr>().unwrap());
        assert_eq!(
            resolver.resolve("unknown.example").await,
            Err(DnsError::NoRecords("unknown.example".into()))
        );
    }

    #[test]
    fn rejects_bad_nameserver() {
        let config = DnsConfig {
            nameserver: "not-an-ip".into(),
            ..DnsConfig::default()
        };
        assert!(matches!(
            GatewayResolver::from_config(&config),
            Err(DnsError::InvalidNameserver(_))
        ));
    }

    #[tokio::test]
    async fn configured_resolver_prefers_static_entries() {
        let mut config = DnsConfig::default();
        config
            .static_hosts
            .insert("jokes.internal".into(), "192.0.2.10".parse().unwrap());
        let resolver = GatewayResolver::from_config(&config).unwrap();
        assert_eq!(
            resolver.resolve("jokes.internal").await.unwrap(),
            "192.0.2.10".parse::<IpAddr>().unwrap()
        );
    }
}
