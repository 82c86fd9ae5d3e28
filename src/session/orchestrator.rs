//! The per-client state machine tying one client to two upstreams.
//!
//! # Responsibilities
//! - Own the client protocol session and both upstream protocol sessions
//! - Count outstanding lookups, connects and replies, and derive the stage
//! - Map every upstream failure to the matching terminal state
//! - Compose and send the response exactly once
//!
//! # Design Decisions
//! - Callbacks arrive through small adapters holding a weak reference, so
//!   a torn-down session silently ignores whatever is still in flight
//! - Once a session is in a terminal or response state, upstream events no-op
//! - Failures close the client without writing an error response

use std::cell::RefCell;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use tokio::task::AbortHandle;

use crate::dns::{DnsError, Resolve};
use crate::http::{HttpError, HttpEvents, HttpSession, Message, MessageKind};
use crate::net::{Channel, ChannelOptions, TransportError};
use crate::observability::metrics;
use crate::session::lookup::{spawn_lookup, DnsRequest};
use crate::session::{compose_joke, decode_reply, Pending, Reply, SessionId, SessionSettings, SessionState, Slot};

/// What a session needs from the worker that owns it.
pub trait SessionHost {
    /// DNS context of the owning reactor.
    fn resolver(&self) -> Arc<dyn Resolve>;

    /// Start a non-blocking connect on the owning reactor.
    fn connect(&self, addr: SocketAddr, options: ChannelOptions) -> Result<Channel, TransportError>;

    /// Drop the session from every table. Returns false if it was already gone.
    fn remove_session(&self, id: SessionId) -> bool;
}

struct SessionInner {
    state: SessionState,
    client: Option<Rc<HttpSession>>,
    upstreams: [Option<Rc<HttpSession>>; 2],
    connected: [bool; 2],
    replied: [bool; 2],
    name: Option<String>,
    surname: Option<String>,
    joke: Option<String>,
    pending: Pending,
    responded: bool,
    lookups: Vec<AbortHandle>,
}

pub struct GatewaySession {
    id: SessionId,
    peer: SocketAddr,
    me: Weak<GatewaySession>,
    host: Weak<dyn SessionHost>,
    settings: Rc<SessionSettings>,
    span: tracing::Span,
    inner: RefCell<SessionInner>,
}

impl fmt::Debug for GatewaySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("GatewaySession")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &inner.state)
            .field("pending", &inner.pending)
            .field("replied", &inner.replied)
            .finish()
    }
}

fn settle(counter: &mut u32, name: &'static str) {
    match counter.checked_sub(1) {
        Some(n) => *counter = n,
        None => tracing::warn!(counter = name, "Pending counter already at zero"),
    }
}

impl GatewaySession {
    /// Take over an accepted client channel and start parsing its request.
    pub fn open(
        id: SessionId,
        channel: Channel,
        peer: SocketAddr,
        host: Weak<dyn SessionHost>,
        settings: Rc<SessionSettings>,
        worker: usize,
    ) -> Rc<Self> {
        let span = tracing::info_span!("session", id = %id, peer = %peer, worker);
        let session = Rc::new_cyclic(|me: &Weak<Self>| Self {
            id,
            peer,
            me: me.clone(),
            host,
            settings,
            span,
            inner: RefCell::new(SessionInner {
                state: SessionState::Start,
                client: None,
                upstreams: [None, None],
                connected: [false; 2],
                replied: [false; 2],
                name: None,
                surname: None,
                joke: None,
                pending: Pending::default(),
                responded: false,
                lookups: Vec::new(),
            }),
        });

        let events = ClientEvents {
            session: Rc::downgrade(&session),
        };
        let client = HttpSession::new(channel, MessageKind::Request, session.settings.limits, Box::new(events));
        {
            let mut inner = session.inner.borrow_mut();
            inner.client = Some(client);
            inner.state = SessionState::ParsingClientRequest;
        }
        session.span.in_scope(|| tracing::debug!("Session opened"));
        session
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        self.inner.borrow().state
    }

    pub fn pending(&self) -> Pending {
        self.inner.borrow().pending
    }

    pub fn name_replied(&self) -> bool {
        self.inner.borrow().replied[Slot::NameService.index()]
    }

    pub fn joke_replied(&self) -> bool {
        self.inner.borrow().replied[Slot::JokeService.index()]
    }

    pub fn has_responded(&self) -> bool {
        self.inner.borrow().responded
    }

    /// True while the session still owns a client or upstream connection.
    pub fn holds_connections(&self) -> bool {
        let inner = self.inner.borrow();
        inner.client.is_some() || inner.upstreams.iter().any(Option::is_some)
    }

    fn on_client_request(&self, request: Message) {
        let _enter = self.span.enter();
        if self.state() != SessionState::ParsingClientRequest {
            return;
        }
        let Some(host) = self.host.upgrade() else {
            return;
        };

        tracing::info!(
            method = request.head.method.as_deref().unwrap_or("-"),
            target = request.head.target.as_deref().unwrap_or("-"),
            "Client request received"
        );

        let resolver = host.resolver();
        self.inner.borrow_mut().state = SessionState::ResolvingWebserverDomains;
        for slot in Slot::ALL {
            self.inner.borrow_mut().pending.resolutions += 1;
            let target = self.settings.upstream(slot);
            tracing::debug!(slot = %slot, host = %target.host, "Resolving upstream");
            let lookup = spawn_lookup(
                DnsRequest::new(self.me.clone(), slot),
                Arc::clone(&resolver),
                target.host.clone(),
            );
            self.inner.borrow_mut().lookups.push(lookup.abort_handle());
        }
    }

    pub(crate) fn on_resolved(&self, slot: Slot, result: Result<IpAddr, DnsError>) {
        let _enter = self.span.enter();
        {
            let mut inner = self.inner.borrow_mut();
            if !inner.state.is_fanning_out() {
                tracing::debug!(slot = %slot, state = %inner.state, "Ignoring lookup result");
                return;
            }
            settle(&mut inner.pending.resolutions, "resolutions");
        }

        let ip = match result {
            Ok(ip) => ip,
            Err(err) => {
                tracing::warn!(slot = %slot, error = %err, "Upstream lookup failed");
                self.terminate(SessionState::ErrorResolvingDomain);
                return;
            }
        };

        let addr = SocketAddr::new(ip, self.settings.upstream(slot).port);
        tracing::debug!(slot = %slot, address = %addr, "Upstream resolved");
        self.connect_upstream(slot, addr);
    }

    fn connect_upstream(&self, slot: Slot, addr: SocketAddr) {
        let Some(host) = self.host.upgrade() else {
            return;
        };
        let channel = match host.connect(addr, self.settings.upstream_channel.clone()) {
            Ok(channel) => channel,
            Err(err) => {
                tracing::warn!(slot = %slot, address = %addr, error = %err, "Upstream connect failed");
                self.terminate(SessionState::ErrorConnectingToWs);
                return;
            }
        };

        let events = UpstreamEvents {
            session: self.me.clone(),
            slot,
        };
        let upstream = HttpSession::new(channel, MessageKind::Response, self.settings.limits, Box::new(events));

        let mut inner = self.inner.borrow_mut();
        inner.upstreams[slot.index()] = Some(upstream);
        inner.pending.connections += 1;
        let stage = inner.pending.stage();
        inner.state = stage;
    }

    fn on_upstream_connected(&self, slot: Slot) {
        let _enter = self.span.enter();
        let upstream = {
            let mut inner = self.inner.borrow_mut();
            if !inner.state.is_fanning_out() {
                return;
            }
            settle(&mut inner.pending.connections, "connections");
            inner.connected[slot.index()] = true;
            inner.upstreams[slot.index()].clone()
        };
        let Some(upstream) = upstream else {
            return;
        };

        match upstream.write_request(&self.settings.upstream(slot).request) {
            Ok(()) => {
                let mut inner = self.inner.borrow_mut();
                inner.pending.replies += 1;
                let stage = inner.pending.stage();
                inner.state = stage;
                tracing::debug!(slot = %slot, "Upstream request sent");
            }
            Err(err) => {
                tracing::warn!(slot = %slot, error = %err, "Failed to send upstream request");
                self.terminate(SessionState::ErrorRequestingFromWs);
            }
        }
    }

    fn on_upstream_reply(&self, slot: Slot, message: Message) {
        let _enter = self.span.enter();
        {
            let mut inner = self.inner.borrow_mut();
            if !inner.state.is_fanning_out() {
                return;
            }
            settle(&mut inner.pending.replies, "replies");
        }
        tracing::debug!(
            slot = %slot,
            status = message.head.status.unwrap_or_default(),
            bytes = message.body.len(),
            "Upstream reply received"
        );

        let reply = match decode_reply(slot, &message.body) {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(error = %err, "Upstream reply rejected");
                self.terminate(SessionState::ErrorClientResponse);
                return;
            }
        };

        let finished = {
            let mut inner = self.inner.borrow_mut();
            match reply {
                Reply::Name { name, surname } => {
                    inner.name = Some(name);
                    inner.surname = Some(surname);
                }
                Reply::Joke(joke) => inner.joke = Some(joke),
            }
            inner.replied[slot.index()] = true;
            let stage = inner.pending.stage();
            inner.state = stage;
            inner.upstreams[slot.index()].take()
        };
        // the upstream connection is no longer needed
        drop(finished);

        self.respond_if_ready();
    }

    fn respond_if_ready(&self) {
        let (client, body) = {
            let mut inner = self.inner.borrow_mut();
            if inner.responded || !inner.replied.iter().all(|replied| *replied) {
                return;
            }
            let (Some(name), Some(surname), Some(joke)) = (inner.name.take(), inner.surname.take(), inner.joke.take())
            else {
                drop(inner);
                self.terminate(SessionState::ErrorClientResponse);
                return;
            };
            inner.responded = true;
            (
                inner.client.clone(),
                compose_joke(&joke, &name, &surname, &self.settings.placeholders),
            )
        };

        let Some(client) = client else {
            self.terminate(SessionState::ErrorClientResponse);
            return;
        };

        tracing::info!(bytes = body.len(), "Sending joke to client");
        match client.write_response(body, &self.settings.server_name) {
            Ok(()) => self.inner.borrow_mut().state = SessionState::ClientResponse,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to write client response");
                self.terminate(SessionState::ErrorClientResponse);
            }
        }
    }

    fn on_client_ready_to_close(&self) {
        let _enter = self.span.enter();
        match self.state() {
            SessionState::ClientResponse => {
                if self.remove() {
                    tracing::info!("Session complete");
                    metrics::record_session_completed();
                }
            }
            SessionState::ParsingClientRequest => {
                if self.remove() {
                    tracing::debug!("Client closed without sending a request");
                }
            }
            _ => {}
        }
    }

    fn on_client_failure(&self, error: HttpError) {
        let _enter = self.span.enter();
        let state = self.state();
        if self.remove() {
            tracing::info!(state = %state, error = %error, "Client connection failed");
            metrics::record_session_failure("client_failure");
        }
    }

    fn on_upstream_ready_to_close(&self, slot: Slot) {
        let _enter = self.span.enter();
        let replied = {
            let inner = self.inner.borrow();
            if !inner.state.is_fanning_out() {
                return;
            }
            inner.replied[slot.index()]
        };
        if !replied {
            tracing::warn!(slot = %slot, "Upstream closed before replying");
            self.terminate(SessionState::ErrorRequestingFromWs);
        }
    }

    fn on_upstream_failure(&self, slot: Slot, error: HttpError) {
        let _enter = self.span.enter();
        let state = {
            let inner = self.inner.borrow();
            if !inner.state.is_fanning_out() {
                return;
            }
            if inner.connected[slot.index()] {
                SessionState::ErrorRequestingFromWs
            } else {
                SessionState::ErrorConnectingToWs
            }
        };
        tracing::warn!(slot = %slot, error = %error, "Upstream exchange failed");
        self.terminate(state);
    }

    /// Enter a terminal state and tear the session down. The first failure wins.
    fn terminate(&self, state: SessionState) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.state.is_error() {
                return;
            }
            inner.state = state;
        }
        tracing::warn!(state = %state, "Session failed, closing client connection");
        metrics::record_session_failure(state.as_str());
        self.remove();
    }

    /// Leave the host's tables, cancel outstanding lookups and close every
    /// connection this session owns.
    fn remove(&self) -> bool {
        let removed = self.host.upgrade().is_some_and(|host| host.remove_session(self.id));
        let released = {
            let mut inner = self.inner.borrow_mut();
            for lookup in inner.lookups.drain(..) {
                lookup.abort();
            }
            let client = inner.client.take();
            let upstreams = [inner.upstreams[0].take(), inner.upstreams[1].take()];
            (client, upstreams)
        };
        drop(released);
        removed
    }
}

struct ClientEvents {
    session: Weak<GatewaySession>,
}

impl HttpEvents for ClientEvents {
    fn on_message_complete(&self, _http: &HttpSession, message: Message) {
        if let Some(session) = self.session.upgrade() {
            session.on_client_request(message);
        }
    }

    fn on_ready_to_close(&self, _http: &HttpSession) {
        if let Some(session) = self.session.upgrade() {
            session.on_client_ready_to_close();
        }
    }

    fn on_failure(&self, _http: &HttpSession, error: HttpError) {
        if let Some(session) = self.session.upgrade() {
            session.on_client_failure(error);
        }
    }
}

struct UpstreamEvents {
    session: Weak<GatewaySession>,
    slot: Slot,
}

impl HttpEvents for UpstreamEvents {
    fn on_connected(&self, _http: &HttpSession) {
        if let Some(session) = self.session.upgrade() {
            session.on_upstream_connected(self.slot);
        }
    }

    fn on_message_complete(&self, _http: &HttpSession, message: Message) {
        if let Some(session) = self.session.upgrade() {
            session.on_upstream_reply(self.slot, message);
        }
    }

    fn on_ready_to_close(&self, _http: &HttpSession) {
        if let Some(session) = self.session.upgrade() {
            session.on_upstream_ready_to_close(self.slot);
        }
    }

    fn on_failure(&self, _http: &HttpSession, error: HttpError) {
        if let Some(session) = self.session.upgrade() {
            session.on_upstream_failure(self.slot, error);
        }
    }
}
