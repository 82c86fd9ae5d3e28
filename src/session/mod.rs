//! Per-client gateway sessions.
//!
//! # Data Flow
//! ```text
//! Client request parsed
//!     → resolve both upstream hosts (lookup.rs)
//!     → connect to each upstream
//!     → send the fixed GET (settings.rs)
//!     → decode each JSON reply (replies.rs)
//!     → substitute the name into the joke (compose.rs)
//!     → write the text/plain response
//!     → removed from the worker table and registry.rs
//!
//! States:
//!     Start → ParsingClientRequest → ResolvingWebserverDomains
//!           → ConnectingToWebservers → RequestingFromWebservers → ClientResponse
//!     any stage → Error* (terminal, session removed)
//! ```
//!
//! # Design Decisions
//! - Sessions are confined to the worker that accepted the client
//! - The worker's table holds the only strong reference; everything
//!   asynchronous (DNS lookups, channel callbacks) holds a weak one
//! - Stage states are derived from the pending counters, so the two
//!   upstream fan-outs may progress in any interleaving

pub mod compose;
pub mod lookup;
pub mod orchestrator;
pub mod registry;
pub mod replies;
pub mod settings;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub use compose::{compose_joke, Placeholders};
pub use lookup::DnsRequest;
pub use orchestrator::{GatewaySession, SessionHost};
pub use registry::{SessionRecord, SessionRegistry};
pub use replies::{decode_reply, Reply, ReplyError};
pub use settings::{SessionSettings, UpstreamTarget};

/// Global atomic counter for session IDs.
static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a session, across all workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Generate a new unique session ID.
    pub fn new() -> Self {
        Self(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Start,
    ParsingClientRequest,
    ResolvingWebserverDomains,
    ConnectingToWebservers,
    RequestingFromWebservers,
    ClientResponse,
    ErrorResolvingDomain,
    ErrorConnectingToWs,
    ErrorRequestingFromWs,
    ErrorClientResponse,
}

impl SessionState {
    pub fn is_error(self) -> bool {
        matches!(
            self,
            SessionState::ErrorResolvingDomain
                | SessionState::ErrorConnectingToWs
                | SessionState::ErrorRequestingFromWs
                | SessionState::ErrorClientResponse
        )
    }

    /// True while upstream work is outstanding.
    pub fn is_fanning_out(self) -> bool {
        matches!(
            self,
            SessionState::ResolvingWebserverDomains
                | SessionState::ConnectingToWebservers
                | SessionState::RequestingFromWebservers
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Start => "start",
            SessionState::ParsingClientRequest => "parsing_client_request",
            SessionState::ResolvingWebserverDomains => "resolving_webserver_domains",
            SessionState::ConnectingToWebservers => "connecting_to_webservers",
            SessionState::RequestingFromWebservers => "requesting_from_webservers",
            SessionState::ClientResponse => "client_response",
            SessionState::ErrorResolvingDomain => "error_resolving_domain",
            SessionState::ErrorConnectingToWs => "error_connecting_to_ws",
            SessionState::ErrorRequestingFromWs => "error_requesting_from_ws",
            SessionState::ErrorClientResponse => "error_client_response",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two upstream services every session contacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    NameService,
    JokeService,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::NameService, Slot::JokeService];

    pub fn index(self) -> usize {
        match self {
            Slot::NameService => 0,
            Slot::JokeService => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Slot::NameService => "name_service",
            Slot::JokeService => "joke_service",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outstanding asynchronous work of one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pending {
    pub resolutions: u32,
    pub connections: u32,
    pub replies: u32,
}

impl Pending {
    pub fn total(&self) -> u32 {
        self.resolutions + self.connections + self.replies
    }

    /// The fan-out stage these counters describe.
    pub fn stage(&self) -> SessionState {
        if self.resolutions > 0 {
            SessionState::ResolvingWebserverDomains
        } else if self.connections > 0 {
            SessionState::ConnectingToWebservers
        } else {
            SessionState::RequestingFromWebservers
        }
    }
}
