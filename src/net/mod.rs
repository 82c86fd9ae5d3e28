//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → transport.rs (accepted socket → Channel)
//!     → channel.rs (buffered I/O driven on the reactor)
//!     → ChannelHandler callbacks into the HTTP layer
//!
//! Outbound connection
//!     → transport.rs connect (in progress)
//!     → channel.rs (CONNECTED | ERROR)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Channels are thread-confined and never cross reactors
//! - Events are edge notifications; buffers are the source of truth

pub mod channel;
pub mod listener;
pub mod transport;

pub use channel::{Channel, ChannelEvents, ChannelHandler, ChannelOptions};
pub use listener::{AcceptParams, ConnectionPermit, Listener, ListenerOptions};
pub use transport::{TcpTransport, Transport, TransportError};
