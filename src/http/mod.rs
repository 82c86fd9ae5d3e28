//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Channel input
//!     → session.rs (readiness, close decisions, event translation)
//!     → decoder.rs (buffer offsets, drain points, body accumulation)
//!     → parser.rs (byte-level HTTP/1.x state machine)
//!     → HttpEvents::on_message_complete
//!
//! Outbound
//!     request.rs  → fixed upstream GET
//!     response.rs → HTTP/1.0 200 text/plain head
//! ```

pub mod decoder;
pub mod parser;
pub mod request;
pub mod response;
pub mod session;

pub use decoder::{HttpState, Message, MessageDecoder, Step};
pub use parser::{Boundary, HttpParser, MessageHead, MessageKind, ParseError, ParserLimits};
pub use request::UpstreamRequest;
pub use session::{HttpError, HttpEvents, HttpSession};
