//! Cross-worker registry of live sessions.
//!
//! # Responsibilities
//! - Record every open session with its worker and peer
//! - Let the service (and tests) observe how many sessions are live
//! - Wait for all sessions to drain
//!
//! # Design Decisions
//! - Only metadata lives here; the session itself never leaves its worker
//! - Removal is idempotent, so a session torn down twice is harmless

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::session::SessionId;

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub worker: usize,
    pub peer: SocketAddr,
    pub opened_at: Instant,
}

/// Shared, thread-safe session table keyed by [`SessionId`].
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<SessionId, SessionRecord>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: SessionId, record: SessionRecord) {
        self.sessions.insert(id, record);
    }

    /// Remove `id`, returning its record if it was still registered.
    pub fn remove(&self, id: SessionId) -> Option<SessionRecord> {
        self.sessions.remove(&id).map(|(_, record)| record)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Live sessions owned by `worker`.
    pub fn count_for_worker(&self, worker: usize) -> usize {
        self.sessions.iter().filter(|entry| entry.worker == worker).count()
    }

    /// Wait until no sessions remain. Returns false on timeout.
    pub async fn drained(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}
