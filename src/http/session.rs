//! One HTTP exchange bound to one channel.
//!
//! # Responsibilities
//! - Feed channel input through a [`MessageDecoder`], draining consumed bytes
//! - Decide when the exchange is finished and the channel may close
//! - Translate channel events into [`HttpEvents`] for the owner
//! - Write upstream requests and client responses
//!
//! # Data Flow
//! ```text
//! Channel readable ─→ ready to close? ─yes→ on_ready_to_close
//!                          │ no
//!                          ↓
//!                  decoder.step loop ─→ Drain / Complete ─→ on_message_complete
//!
//! Channel event: CONNECTED → on_connected
//!                EOF       → ready to close? / finish body / on_failure
//!                ERROR     → on_failure
//!                TIMEOUT   → on_failure
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use bytes::Bytes;
use chrono::Utc;
use thiserror::Error;

use crate::http::decoder::{HttpState, Message, MessageDecoder, Step};
use crate::http::parser::{MessageKind, ParseError, ParserLimits};
use crate::http::request::UpstreamRequest;
use crate::http::response::encode_head;
use crate::net::{Channel, ChannelEvents, ChannelHandler, TransportError};

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("malformed message: {0}")]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("connection failed")]
    ChannelFailed,

    #[error("read timed out")]
    Timeout,
}

/// Notifications delivered to whoever owns an [`HttpSession`].
pub trait HttpEvents {
    /// An outbound connection completed.
    fn on_connected(&self, _session: &HttpSession) {}

    /// A full message was received.
    fn on_message_complete(&self, session: &HttpSession, message: Message);

    /// The exchange is over and the connection may be released.
    fn on_ready_to_close(&self, _session: &HttpSession) {}

    /// The exchange cannot continue.
    fn on_failure(&self, session: &HttpSession, error: HttpError);
}

pub struct HttpSession {
    channel: Channel,
    decoder: RefCell<MessageDecoder>,
    events: Box<dyn HttpEvents>,
    connected: Cell<bool>,
}

impl fmt::Debug for HttpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSession")
            .field("channel", &self.channel)
            .field("state", &self.state())
            .field("connected", &self.connected.get())
            .finish()
    }
}

impl HttpSession {
    /// Take ownership of `channel` and start handling its events.
    pub fn new(channel: Channel, kind: MessageKind, limits: ParserLimits, events: Box<dyn HttpEvents>) -> Rc<Self> {
        Rc::new_cyclic(|me: &Weak<Self>| {
            let handler: Weak<dyn ChannelHandler> = me.clone();
            channel.set_handler(handler);
            Self {
                channel,
                decoder: RefCell::new(MessageDecoder::new(kind, limits)),
                events,
                connected: Cell::new(false),
            }
        })
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn state(&self) -> HttpState {
        self.decoder.borrow().state()
    }

    /// True once an outbound connect has completed.
    pub fn is_connected(&self) -> bool {
        self.connected.get()
    }

    /// Queue an upstream request.
    pub fn write_request(&self, request: &UpstreamRequest) -> Result<(), HttpError> {
        self.channel.write_bytes(request.to_bytes())?;
        Ok(())
    }

    /// Queue a `200 OK` text response; `body` is handed over without copying.
    pub fn write_response(&self, body: String, server_name: &str) -> Result<(), HttpError> {
        let body = Bytes::from(body);
        let head = encode_head(body.len(), server_name, Utc::now());
        self.channel.write_bytes(head.freeze())?;
        self.channel.write_bytes(body)?;
        Ok(())
    }

    /// Fires `on_ready_to_close` and returns true when the exchange is over:
    /// the peer closed before a message began, or the message completed and
    /// all output has been written.
    fn check_ready_to_close(&self, channel: &Channel) -> bool {
        let state = self.state();
        let ready = (channel.is_eof() && state == HttpState::MessageBegin)
            || (state == HttpState::MessageComplete && channel.output_len() == 0);
        if ready {
            self.events.on_ready_to_close(self);
        }
        ready
    }

    fn process_input(&self, channel: &Channel) {
        loop {
            let step = {
                let input = channel.input();
                self.decoder.borrow_mut().step(&input)
            };
            match step {
                Ok(Step::NeedMore) => return,
                Ok(Step::Advanced) => {}
                Ok(Step::Drain(n)) => {
                    if let Err(err) = channel.drain_input(n) {
                        self.events.on_failure(self, err.into());
                        return;
                    }
                }
                Ok(Step::Complete(n)) => {
                    if let Err(err) = channel.drain_input(n) {
                        self.events.on_failure(self, err.into());
                        return;
                    }
                    let message = self.decoder.borrow_mut().take_message();
                    self.events.on_message_complete(self, message);
                    return;
                }
                Err(err) => {
                    self.events.on_failure(self, err.into());
                    return;
                }
            }
        }
    }
}

impl ChannelHandler for HttpSession {
    fn on_readable(&self, channel: &Channel) {
        if self.check_ready_to_close(channel) || channel.input_len() == 0 {
            return;
        }
        self.process_input(channel);
    }

    fn on_writable(&self, channel: &Channel) {
        self.check_ready_to_close(channel);
    }

    fn on_event(&self, channel: &Channel, events: ChannelEvents) {
        if events.contains(ChannelEvents::ERROR) {
            self.events.on_failure(self, HttpError::ChannelFailed);
        } else if events.contains(ChannelEvents::CONNECTED) {
            self.connected.set(true);
            self.events.on_connected(self);
        } else if events.contains(ChannelEvents::EOF) {
            if self.check_ready_to_close(channel) {
                return;
            }
            let finished = self.decoder.borrow_mut().finish();
            match finished {
                Ok(true) => self.process_input(channel),
                Ok(false) => {}
                Err(err) => self.events.on_failure(self, err.into()),
            }
        } else if events.contains(ChannelEvents::TIMEOUT | ChannelEvents::READING) {
            self.events.on_failure(self, HttpError::Timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::testing::with_reactor;
    use crate::net::ChannelOptions;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[derive(Default)]
    struct Log {
        messages: RefCell<Vec<Message>>,
        ready: Cell<usize>,
        failures: RefCell<Vec<String>>,
    }

    struct Forward(Rc<Log>);

    impl HttpEvents for Forward {
        fn on_message_complete(&self, _session: &HttpSession, message: Message) {
            self.0.messages.borrow_mut().push(message);
        }

        fn on_ready_to_close(&self, _session: &HttpSession) {
            self.0.ready.set(self.0.ready.get() + 1);
        }

        fn on_failure(&self, _session: &HttpSession, error: HttpError) {
            self.0.failures.borrow_mut().push(error.to_string());
        }
    }

    fn session(kind: MessageKind, stream: tokio::io::DuplexStream) -> (Rc<HttpSession>, Rc<Log>) {
        let log = Rc::new(Log::default());
        let channel = Channel::from_stream(stream, None, ChannelOptions::default()).unwrap();
        let session = HttpSession::new(channel, kind, ParserLimits::default(), Box::new(Forward(Rc::clone(&log))));
        (session, log)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    #[tokio::test]
    async fn request_split_across_reads() {
        with_reactor(|| async {
            let (mut peer, stream) = duplex(4096);
            let (session, log) = session(MessageKind::Request, stream);

            for part in [&b"GET /jo"[..], b"ke HTTP/1.1\r\nHo", b"st: x\r\n", b"\r", b"\n"] {
                peer.write_all(part).await.unwrap();
                settle().await;
            }

            let messages = log.messages.borrow();
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].head.target.as_deref(), Some("/joke"));
            assert_eq!(session.state(), HttpState::MessageComplete);
            assert_eq!(session.channel().input_len(), 0);
        })
        .await;
    }

    #[tokio::test]
    async fn response_reaches_peer_intact() {
        with_reactor(|| async {
            let (mut peer, stream) = duplex(4096);
            let (session, log) = session(MessageKind::Request, stream);

            peer.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
            settle().await;
            assert_eq!(log.messages.borrow().len(), 1);

            session.write_response("hello".to_string(), "Test/1.0").unwrap();
            settle().await;
            // message complete and output flushed
            assert!(log.ready.get() >= 1);
            drop(session);

            let mut raw = Vec::new();
            peer.read_to_end(&mut raw).await.unwrap();
            let text = String::from_utf8(raw).unwrap();
            let (head, body) = text.split_once("\r\n\r\n").unwrap();
            assert!(head.starts_with("HTTP/1.0 200 OK\r\n"));
            assert!(head.contains("Content-Type: text/plain\r\n"));
            assert!(head.contains("Content-Length: 5\r\n"));
            assert!(head.contains("Server: Test/1.0\r\n"));
            assert!(head.contains("\r\nDate: "));
            assert_eq!(body, "hello");
        })
        .await;
    }

    #[tokio::test]
    async fn eof_before_any_bytes_is_ready_to_close() {
        with_reactor(|| async {
            let (peer, stream) = duplex(64);
            let (_session, log) = session(MessageKind::Request, stream);
            drop(peer);
            settle().await;
            assert_eq!(log.ready.get(), 1);
            assert!(log.failures.borrow().is_empty());
        })
        .await;
    }

    #[tokio::test]
    async fn eof_mid_request_fails() {
        with_reactor(|| async {
            let (mut peer, stream) = duplex(64);
            let (_session, log) = session(MessageKind::Request, stream);
            peer.write_all(b"GET / HTTP/1.1\r\nHost").await.unwrap();
            settle().await;
            drop(peer);
            settle().await;
            assert_eq!(log.ready.get(), 0);
            assert_eq!(log.failures.borrow().len(), 1);
            assert!(log.failures.borrow()[0].contains("before the message was complete"));
        })
        .await;
    }

    #[tokio::test]
    async fn eof_completes_close_delimited_response() {
        with_reactor(|| async {
            let (mut peer, stream) = duplex(256);
            let (_session, log) = session(MessageKind::Response, stream);
            peer.write_all(b"HTTP/1.0 200 OK\r\n\r\n{\"ok\":true}").await.unwrap();
            settle().await;
            assert!(log.messages.borrow().is_empty());
            drop(peer);
            settle().await;
            let messages = log.messages.borrow();
            assert_eq!(messages.len(), 1);
            assert_eq!(&messages[0].body[..], b"{\"ok\":true}");
        })
        .await;
    }

    #[tokio::test]
    async fn malformed_input_fails() {
        with_reactor(|| async {
            let (mut peer, stream) = duplex(64);
            let (_session, log) = session(MessageKind::Response, stream);
            peer.write_all(b"SPDY/9 nonsense\r\n").await.unwrap();
            settle().await;
            assert_eq!(log.failures.borrow().len(), 1);
        })
        .await;
    }
}
