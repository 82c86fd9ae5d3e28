//! Process-level gateway: workers, listeners and the session registry.
//!
//! # Responsibilities
//! - Start the configured number of workers, one after another
//! - Make every worker listen on the same address
//! - Stop all workers and report sessions that did not drain
//!
//! # Design Decisions
//! - The first worker may bind port 0; later workers reuse whatever port it got
//! - A worker that fails to listen aborts startup and triggers shutdown
//! - Each worker gets its own resolver so DNS state never crosses threads

use std::net::{AddrParseError, SocketAddr};
use std::rc::Rc;
use std::sync::{mpsc, Arc};

use thiserror::Error;

use crate::config::GatewayConfig;
use crate::dns::{DnsError, GatewayResolver, Resolve};
use crate::lifecycle::Shutdown;
use crate::reactor::{Reactor, Worker, WorkerError};
use crate::service::GatewayWorker;
use crate::session::SessionRegistry;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid bind address {address}: {source}")]
    Address { address: String, source: AddrParseError },

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("failed to configure resolver: {0}")]
    Dns(#[from] DnsError),

    #[error("worker {worker} failed to listen: {reason}")]
    Listen { worker: usize, reason: String },

    #[error("gateway already started")]
    AlreadyStarted,
}

pub struct Gateway {
    config: Arc<GatewayConfig>,
    registry: SessionRegistry,
    shutdown: Shutdown,
    resolver: Option<Arc<dyn Resolve>>,
    workers: Vec<Worker<Rc<GatewayWorker>>>,
    local_addr: Option<SocketAddr>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config: Arc::new(config),
            registry: SessionRegistry::new(),
            shutdown: Shutdown::new(),
            resolver: None,
            workers: Vec::new(),
            local_addr: None,
        }
    }

    /// Use `resolver` on every worker instead of one built from `dns` config.
    pub fn with_resolver(config: GatewayConfig, resolver: Arc<dyn Resolve>) -> Self {
        let mut gateway = Self::new(config);
        gateway.resolver = Some(resolver);
        gateway
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Triggered when a worker fails; also usable to request a stop.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn running_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.is_running()).count()
    }

    /// Start every worker. Returns the address all of them listen on.
    pub fn start(&mut self) -> Result<SocketAddr, GatewayError> {
        if !self.workers.is_empty() {
            return Err(GatewayError::AlreadyStarted);
        }

        let address = &self.config.listener.bind_address;
        let mut addr: SocketAddr = address.parse().map_err(|source| GatewayError::Address {
            address: address.clone(),
            source,
        })?;

        for id in 0..self.config.listener.workers {
            match self.start_worker(id, addr) {
                Ok(bound) => addr = bound,
                Err(err) => {
                    tracing::error!(worker = id, error = %err, "Gateway startup failed");
                    self.stop();
                    return Err(err);
                }
            }
        }

        self.local_addr = Some(addr);
        tracing::info!(address = %addr, workers = self.workers.len(), "Gateway listening");
        Ok(addr)
    }

    fn start_worker(&mut self, id: usize, addr: SocketAddr) -> Result<SocketAddr, GatewayError> {
        let resolver = self.resolver_for_worker()?;
        let config = Arc::clone(&self.config);
        let registry = self.registry.clone();
        let (ready_tx, ready_rx) = mpsc::channel();

        let mut worker = Worker::with_prologue(id, resolver, move |reactor: &Rc<Reactor>| {
            let state = GatewayWorker::new(Rc::clone(reactor), &config, registry);
            match state.listen(addr) {
                Ok(bound) => {
                    let _ = ready_tx.send(Ok(bound));
                    Ok(state)
                }
                Err(err) => {
                    let reason = err.to_string();
                    let _ = ready_tx.send(Err(reason.clone()));
                    Err(WorkerError::Prologue { id, reason })
                }
            }
        })?;
        worker.set_epilogue(|_reactor, state: Rc<GatewayWorker>| state.close());
        worker.notify_on_failure(self.shutdown.clone());
        worker.start()?;

        let bound = match ready_rx.recv() {
            Ok(Ok(bound)) => bound,
            Ok(Err(reason)) => return Err(GatewayError::Listen { worker: id, reason }),
            Err(_) => {
                return Err(GatewayError::Listen {
                    worker: id,
                    reason: "worker exited before binding".into(),
                })
            }
        };
        self.workers.push(worker);
        Ok(bound)
    }

    fn resolver_for_worker(&self) -> Result<Arc<dyn Resolve>, GatewayError> {
        match &self.resolver {
            Some(resolver) => Ok(Arc::clone(resolver)),
            None => Ok(Arc::new(GatewayResolver::from_config(&self.config.dns)?)),
        }
    }

    /// Stop every worker. Each one frees its sessions before its thread exits.
    pub fn stop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        for mut worker in self.workers.drain(..) {
            if let Err(err) = worker.stop() {
                tracing::warn!(worker = worker.id(), error = %err, "Worker did not stop cleanly");
            }
        }
        if !self.registry.is_empty() {
            tracing::warn!(remaining = self.registry.len(), "Sessions left in registry after shutdown");
        }
        self.local_addr = None;
        tracing::info!("Gateway stopped");
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.stop();
    }
}
