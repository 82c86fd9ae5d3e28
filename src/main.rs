//! Joke Gateway
//!
//! Answers every HTTP request with a Chuck Norris style joke about a random
//! person, assembled from two upstream JSON services.
//!
//! ```text
//!                      ┌──────────────────────────── worker N ─────────────────────────────┐
//!                      │                                                                   │
//!     Client Request   │  ┌──────────┐    ┌──────────┐    ┌──────────────┐    ┌─────────┐ │
//!     ─────────────────┼─▶│ listener │───▶│ session  │───▶│ dns lookups  │───▶│ connect │─┼──▶ name service
//!                      │  └──────────┘    │  state   │    └──────────────┘    │  + GET  │─┼──▶ joke service
//!                      │                  │ machine  │◀───────────────────────│ replies │ │
//!     Client Response  │                  │          │                        └─────────┘ │
//!     ◀────────────────┼──────────────────│ compose  │                                    │
//!                      │                  └──────────┘                                    │
//!                      └───────────────────────────────────────────────────────────────────┘
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use joke_gateway::config::{load_or_default, validate_config, GatewayConfig};
use joke_gateway::lifecycle::{wait_for_termination, Termination};
use joke_gateway::observability::{init_logging, init_metrics};
use joke_gateway::Gateway;

const DEFAULT_PORT: u16 = 5000;

#[derive(Parser)]
#[command(name = "joke-gateway")]
#[command(about = "HTTP gateway serving jokes about random people", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    address: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Number of worker threads
    #[arg(short = 'n', long)]
    workers: Option<usize>,

    /// DNS server used to resolve the upstream services
    #[arg(long)]
    nameserver: Option<IpAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Command-line values win over the configuration file.
    fn apply(&self, config: &mut GatewayConfig) {
        if self.address.is_some() || self.port.is_some() {
            let current = config.listener.bind_address.parse::<SocketAddr>().ok();
            let ip = self
                .address
                .or(current.map(|addr| addr.ip()))
                .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
            let port = self.port.or(current.map(|addr| addr.port())).unwrap_or(DEFAULT_PORT);
            config.listener.bind_address = SocketAddr::new(ip, port).to_string();
        }
        if let Some(workers) = self.workers {
            config.listener.workers = workers;
        }
        if let Some(nameserver) = self.nameserver {
            config.dns.nameserver = nameserver.to_string();
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load configuration: {err}");
            return ExitCode::FAILURE;
        }
    };
    cli.apply(&mut config);
    if let Err(errors) = validate_config(&config) {
        eprintln!("Invalid configuration:");
        for error in errors {
            eprintln!("  {error}");
        }
        return ExitCode::FAILURE;
    }

    if let Err(err) = init_logging(&config.observability) {
        eprintln!("Failed to initialize logging: {err}");
        return ExitCode::FAILURE;
    }

    tracing::info!("joke-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        workers = config.listener.workers,
        nameserver = %config.dns.nameserver,
        name_service = %config.upstreams.name_service.host,
        joke_service = %config.upstreams.joke_service.host,
        "Configuration loaded"
    );

    // drives signal handling and the metrics exporter; sessions run on workers
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(error = %err, "Failed to build control runtime");
            return ExitCode::FAILURE;
        }
    };

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                let _guard = runtime.enter();
                if let Err(err) = init_metrics(addr) {
                    tracing::error!(error = %err, "Failed to start metrics endpoint");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let mut gateway = Gateway::new(config);
    let shutdown = gateway.shutdown_handle();
    if let Err(err) = gateway.start() {
        tracing::error!(error = %err, "Failed to start gateway");
        return ExitCode::FAILURE;
    }

    let reason = runtime.block_on(wait_for_termination(&shutdown));
    tracing::info!(reason = ?reason, "Shutting down");
    shutdown.trigger();
    gateway.stop();

    tracing::info!("Shutdown complete");
    match reason {
        Termination::WorkerFailure => ExitCode::FAILURE,
        Termination::Interrupt | Termination::Terminate => ExitCode::SUCCESS,
    }
}
