//! The gateway state living on one worker thread.
//!
//! # Responsibilities
//! - Own the worker's listener and its table of live sessions
//! - Turn accepted connections into sessions
//! - Act as the [`SessionHost`] for those sessions
//! - Free every session when the worker stops

use std::cell::RefCell;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Instant;

use crate::config::GatewayConfig;
use crate::dns::Resolve;
use crate::net::{
    AcceptParams, Channel, ChannelHandler, ChannelOptions, Listener, ListenerOptions, TcpTransport, Transport,
    TransportError,
};
use crate::observability::metrics;
use crate::reactor::Reactor;
use crate::session::{GatewaySession, SessionHost, SessionId, SessionRecord, SessionRegistry, SessionSettings};

pub struct GatewayWorker {
    me: Weak<GatewayWorker>,
    reactor: Rc<Reactor>,
    transport: TcpTransport,
    settings: Rc<SessionSettings>,
    registry: SessionRegistry,
    sessions: RefCell<HashMap<SessionId, Rc<GatewaySession>>>,
    listener: RefCell<Option<Listener>>,
}

impl GatewayWorker {
    pub fn new(reactor: Rc<Reactor>, config: &GatewayConfig, registry: SessionRegistry) -> Rc<Self> {
        let transport = TcpTransport::new(ListenerOptions {
            backlog: config.listener.backlog,
            max_connections: config.listener.max_connections,
            reuse_port: config.listener.reuse_port,
        });
        let settings = Rc::new(SessionSettings::from_config(config));

        Rc::new_cyclic(|me: &Weak<Self>| Self {
            me: me.clone(),
            reactor,
            transport,
            settings,
            registry,
            sessions: RefCell::new(HashMap::new()),
            listener: RefCell::new(None),
        })
    }

    pub fn id(&self) -> usize {
        self.reactor.id()
    }

    /// Start accepting on `addr`. Returns the bound address.
    pub fn listen(&self, addr: SocketAddr) -> Result<SocketAddr, TransportError> {
        let handler: Weak<dyn ChannelHandler> = self.me.clone();
        let listener = self.transport.listen(addr, handler)?;
        let local = listener.local_addr();
        *self.listener.borrow_mut() = Some(listener);
        tracing::info!(worker = self.id(), address = %local, transport = self.transport.name(), "Worker listening");
        Ok(local)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.borrow().as_ref().map(Listener::local_addr)
    }

    /// Hand a connected client channel to a new session.
    pub fn open_session(&self, channel: Channel, peer: SocketAddr) -> SessionId {
        let id = SessionId::new();
        let host: Weak<dyn SessionHost> = self.me.clone();
        let session = GatewaySession::open(id, channel, peer, host, Rc::clone(&self.settings), self.id());

        self.registry.insert(
            id,
            SessionRecord {
                worker: self.id(),
                peer,
                opened_at: Instant::now(),
            },
        );
        self.sessions.borrow_mut().insert(id, session);
        metrics::record_session_opened();
        id
    }

    pub fn session(&self, id: SessionId) -> Option<Rc<GatewaySession>> {
        self.sessions.borrow().get(&id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.borrow().len()
    }

    /// Stop accepting and free every live session.
    pub fn close(&self) {
        let listener = self.listener.borrow_mut().take();
        drop(listener);

        let sessions: Vec<_> = self.sessions.borrow_mut().drain().collect();
        let count = sessions.len();
        for (id, _) in &sessions {
            if let Some(record) = self.registry.remove(*id) {
                metrics::record_session_closed(record.opened_at.elapsed());
            }
        }
        drop(sessions);
        tracing::info!(worker = self.id(), sessions = count, "Worker closed");
    }
}

impl ChannelHandler for GatewayWorker {
    fn on_accept(&self, _listener: &Listener, params: AcceptParams) {
        let peer = params.peer_addr;
        match self.transport.accept(params, self.settings.client_channel.clone()) {
            Ok(channel) => {
                let id = self.open_session(channel, peer);
                tracing::debug!(worker = self.id(), session = %id, peer = %peer, "Client accepted");
            }
            Err(err) => {
                tracing::warn!(worker = self.id(), peer = %peer, error = %err, "Failed to set up client channel");
            }
        }
    }
}

impl SessionHost for GatewayWorker {
    fn resolver(&self) -> Arc<dyn Resolve> {
        Arc::clone(self.reactor.resolver())
    }

    fn connect(&self, addr: SocketAddr, options: ChannelOptions) -> Result<Channel, TransportError> {
        self.transport.connect(addr, options)
    }

    fn remove_session(&self, id: SessionId) -> bool {
        let removed = self.sessions.borrow_mut().remove(&id);
        let Some(session) = removed else {
            return false;
        };
        if let Some(record) = self.registry.remove(id) {
            metrics::record_session_closed(record.opened_at.elapsed());
        }
        tracing::debug!(worker = self.id(), session = %id, state = %session.state(), "Session removed");
        true
    }
}
