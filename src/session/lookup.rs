//! DNS lookups that outlive nothing.
//!
//! A [`DnsRequest`] carries only a weak reference to its session. When the
//! session is torn down while the lookup is in flight, the late answer is
//! dropped instead of touching freed state.

use std::net::IpAddr;
use std::rc::Weak;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::dns::{DnsError, Resolve};
use crate::observability::metrics;
use crate::session::{GatewaySession, Slot};

#[derive(Debug)]
pub struct DnsRequest {
    session: Weak<GatewaySession>,
    slot: Slot,
}

impl DnsRequest {
    pub fn new(session: Weak<GatewaySession>, slot: Slot) -> Self {
        Self { session, slot }
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// Hand the result to the session. Returns false if the session is gone.
    pub fn complete(self, result: Result<IpAddr, DnsError>) -> bool {
        metrics::record_dns_lookup(if result.is_ok() { "resolved" } else { "failed" });
        match self.session.upgrade() {
            Some(session) => {
                session.on_resolved(self.slot, result);
                true
            }
            None => {
                tracing::debug!(slot = %self.slot, "Session gone before lookup finished, dropping result");
                false
            }
        }
    }
}

/// Resolve `host` on the current reactor and deliver the result to `request`.
pub(crate) fn spawn_lookup(request: DnsRequest, resolver: Arc<dyn Resolve>, host: String) -> JoinHandle<bool> {
    tokio::task::spawn_local(async move {
        let result = resolver.resolve(&host).await;
        request.complete(result)
    })
}
