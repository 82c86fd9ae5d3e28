//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind to the configured address with address/port reuse
//! - Accept incoming TCP connections on the current reactor
//! - Enforce max_connections limit via semaphore
//! - Hand each accepted socket to the bound [`ChannelHandler::on_accept`]

use std::cell::RefCell;
use std::fmt;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;

use crate::net::channel::ChannelHandler;
use crate::net::transport::TransportError;
use crate::reactor;

/// Pause after a failed accept (e.g. descriptor exhaustion).
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Socket-level listener settings.
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    /// Pending connection queue length passed to `listen(2)`.
    pub backlog: u32,
    /// Concurrent accepted connections before accept waits.
    pub max_connections: usize,
    /// Allow several workers to bind the same port.
    pub reuse_port: bool,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            backlog: 100,
            max_connections: 10_000,
            reuse_port: true,
        }
    }
}

/// Everything known about one accepted connection.
pub struct AcceptParams {
    pub stream: TcpStream,
    pub peer_addr: SocketAddr,
    pub local_addr: SocketAddr,
    pub permit: ConnectionPermit,
}

impl fmt::Debug for AcceptParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceptParams")
            .field("peer_addr", &self.peer_addr)
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

struct ListenerCore {
    local_addr: SocketAddr,
    connection_limit: Arc<Semaphore>,
    handler: Weak<dyn ChannelHandler>,
    driver: RefCell<Option<AbortHandle>>,
}

impl Drop for ListenerCore {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.get_mut().take() {
            driver.abort();
        }
        tracing::debug!(address = %self.local_addr, "Listener closed");
    }
}

/// A bounded TCP listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections wait in the kernel backlog until a slot becomes available.
/// Dropping the listener stops accepting.
pub struct Listener {
    core: Rc<ListenerCore>,
}

impl Listener {
    /// Bind `addr` and start accepting on the current reactor.
    pub fn bind(
        addr: SocketAddr,
        options: &ListenerOptions,
        handler: Weak<dyn ChannelHandler>,
    ) -> Result<Self, TransportError> {
        if reactor::current().is_none() {
            return Err(TransportError::NoReactor);
        }

        let bind_err = |source| TransportError::Bind { addr, source };
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_err)?;

        socket.set_reuseaddr(true).map_err(bind_err)?;
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        socket.set_reuseport(options.reuse_port).map_err(bind_err)?;
        socket.bind(addr).map_err(bind_err)?;
        let listener = socket.listen(options.backlog).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        tracing::info!(
            address = %local_addr,
            max_connections = options.max_connections,
            backlog = options.backlog,
            "Listener bound"
        );

        let connection_limit = Arc::new(Semaphore::new(options.max_connections));
        let core = Rc::new(ListenerCore {
            local_addr,
            connection_limit: Arc::clone(&connection_limit),
            handler,
            driver: RefCell::new(None),
        });

        let task = tokio::task::spawn_local(accept_loop(Rc::downgrade(&core), listener, connection_limit));
        *core.driver.borrow_mut() = Some(task.abort_handle());

        Ok(Self { core })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.core.local_addr
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.core.connection_limit.available_permits()
    }
}

async fn accept_loop(core: Weak<ListenerCore>, listener: TcpListener, limit: Arc<Semaphore>) {
    loop {
        // Acquire permit first (backpressure)
        let Ok(permit) = Arc::clone(&limit).acquire_owned().await else {
            return;
        };

        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                tracing::warn!(error = %err, "Accept failed");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };

        let Some(strong) = core.upgrade() else {
            return;
        };
        let local_addr = stream.local_addr().unwrap_or(strong.local_addr);

        tracing::debug!(
            peer_addr = %peer_addr,
            available_permits = limit.available_permits(),
            "Connection accepted"
        );

        let params = AcceptParams {
            stream,
            peer_addr,
            local_addr,
            permit: ConnectionPermit { _permit: permit },
        };

        let handler = strong.handler.upgrade();
        let listener = Listener { core: strong };
        match handler {
            Some(handler) => handler.on_accept(&listener, params),
            None => tracing::debug!(peer_addr = %peer_addr, "No accept handler bound, dropping connection"),
        }
        drop(listener);
        if core.strong_count() == 0 {
            return;
        }
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::testing::with_reactor;
    use std::cell::Cell;

    struct CountingAcceptor {
        accepted: Cell<usize>,
        held: RefCell<Vec<AcceptParams>>,
    }

    impl ChannelHandler for CountingAcceptor {
        fn on_accept(&self, listener: &Listener, params: AcceptParams) {
            assert_eq!(params.local_addr.port(), listener.local_addr().port());
            self.accepted.set(self.accepted.get() + 1);
            self.held.borrow_mut().push(params);
        }
    }

    #[tokio::test]
    async fn accepts_and_enforces_limit() {
        with_reactor(|| async {
            let acceptor = Rc::new(CountingAcceptor {
                accepted: Cell::new(0),
                held: RefCell::new(Vec::new()),
            });
            let handler: Rc<dyn ChannelHandler> = acceptor.clone();
            let options = ListenerOptions {
                max_connections: 1,
                ..ListenerOptions::default()
            };
            let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), &options, Rc::downgrade(&handler)).unwrap();
            let addr = listener.local_addr();
            assert_ne!(addr.port(), 0);

            let _first = TcpStream::connect(addr).await.unwrap();
            let _second = TcpStream::connect(addr).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;

            // the second connection waits for a permit
            assert_eq!(acceptor.accepted.get(), 1);
            assert_eq!(listener.available_permits(), 0);

            acceptor.held.borrow_mut().clear();
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert_eq!(acceptor.accepted.get(), 2);
        })
        .await;
    }

    #[tokio::test]
    async fn reuse_port_allows_second_bind() {
        with_reactor(|| async {
            let acceptor: Rc<dyn ChannelHandler> = Rc::new(CountingAcceptor {
                accepted: Cell::new(0),
                held: RefCell::new(Vec::new()),
            });
            let options = ListenerOptions::default();
            let first = Listener::bind("127.0.0.1:0".parse().unwrap(), &options, Rc::downgrade(&acceptor)).unwrap();
            let second = Listener::bind(first.local_addr(), &options, Rc::downgrade(&acceptor));
            if cfg!(all(unix, not(any(target_os = "solaris", target_os = "illumos")))) {
                assert_eq!(second.unwrap().local_addr(), first.local_addr());
            }
        })
        .await;
    }
}
