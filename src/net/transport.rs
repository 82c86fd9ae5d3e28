//! Transport abstraction over listening, connecting and accepting.
//!
//! A transport turns addresses and raw accepted sockets into [`Channel`]s
//! driven by the current reactor. Protocol code only ever talks to
//! channels, so a different stream type can be slotted in behind the trait.

use std::io;
use std::net::SocketAddr;
use std::rc::Weak;

use thiserror::Error;
use tokio::net::TcpSocket;

use crate::net::channel::{Channel, ChannelHandler, ChannelOptions};
use crate::net::listener::{AcceptParams, Listener, ListenerOptions};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no reactor is bound to the current thread")]
    NoReactor,

    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    #[error("channel is not connected yet")]
    NotConnected,

    #[error("channel is shut down for writing")]
    Shutdown,

    #[error("channel failed")]
    Failed,

    #[error("cannot drain {requested} bytes, only {available} buffered")]
    DrainOverflow { requested: usize, available: usize },
}

/// Uniform listen/connect/accept over a concrete stream type.
pub trait Transport {
    fn name(&self) -> &'static str;

    /// Bind a listening endpoint whose accepts go to `handler`.
    fn listen(&self, addr: SocketAddr, handler: Weak<dyn ChannelHandler>) -> Result<Listener, TransportError>;

    /// Begin a non-blocking connect.
    ///
    /// `Ok` means the connect is in progress; the channel later reports
    /// `CONNECTED` or `ERROR`. Immediate failures come back as `Err`.
    fn connect(&self, addr: SocketAddr, options: ChannelOptions) -> Result<Channel, TransportError>;

    /// Wrap an accepted socket in a channel.
    fn accept(&self, params: AcceptParams, options: ChannelOptions) -> Result<Channel, TransportError>;
}

/// Plain TCP.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    listener: ListenerOptions,
}

impl TcpTransport {
    pub fn new(listener: ListenerOptions) -> Self {
        Self { listener }
    }
}

impl Transport for TcpTransport {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn listen(&self, addr: SocketAddr, handler: Weak<dyn ChannelHandler>) -> Result<Listener, TransportError> {
        Listener::bind(addr, &self.listener, handler)
    }

    fn connect(&self, addr: SocketAddr, options: ChannelOptions) -> Result<Channel, TransportError> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        tracing::trace!(transport = self.name(), peer_addr = %addr, "Connecting");
        Channel::connecting(socket.connect(addr), addr, options)
    }

    fn accept(&self, params: AcceptParams, options: ChannelOptions) -> Result<Channel, TransportError> {
        if let Err(err) = params.stream.set_nodelay(true) {
            tracing::debug!(peer_addr = %params.peer_addr, error = %err, "Failed to set TCP_NODELAY");
        }
        Channel::accepted(params.stream, params.peer_addr, options, params.permit)
    }
}
