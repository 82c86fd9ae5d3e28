//! Buffered duplex channels and the event dispatch contract.
//!
//! # Responsibilities
//! - Own the input and output buffers of one connected byte stream
//! - Drive the stream on the current reactor (read, flush, half-close)
//! - Report readiness to the bound [`ChannelHandler`]
//!
//! # Design Decisions
//! - The driver task only holds a weak reference to the channel; dropping the
//!   owning [`Channel`] aborts the driver and closes the stream
//! - Handlers run to completion on the reactor thread and may freely write,
//!   drain or drop the channel from inside a callback
//! - `ERROR` is terminal: the driver exits right after dispatching it

use std::cell::{Cell, Ref, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::ops::BitOr;
use std::rc::{Rc, Weak};
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tokio::time::{sleep_until, Instant};

use crate::net::listener::{AcceptParams, ConnectionPermit, Listener};
use crate::net::transport::TransportError;
use crate::reactor;

/// Size of a single socket read.
const READ_CHUNK: usize = 16 * 1024;

/// Default memory limit for the input buffer (16 MiB).
pub const DEFAULT_INPUT_HIGH_WATERMARK: usize = 16 * 1024 * 1024;

/// Set of readiness conditions reported through [`ChannelHandler::on_event`].
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelEvents(u8);

impl ChannelEvents {
    pub const NONE: Self = Self(0x00);
    pub const READING: Self = Self(0x01);
    pub const WRITING: Self = Self(0x02);
    pub const CONNECTED: Self = Self(0x04);
    pub const EOF: Self = Self(0x08);
    pub const ERROR: Self = Self(0x10);
    pub const TIMEOUT: Self = Self(0x20);

    /// Returns true if every bit of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ChannelEvents {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for ChannelEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(ChannelEvents, &str); 6] = [
            (ChannelEvents::READING, "READING"),
            (ChannelEvents::WRITING, "WRITING"),
            (ChannelEvents::CONNECTED, "CONNECTED"),
            (ChannelEvents::EOF, "EOF"),
            (ChannelEvents::ERROR, "ERROR"),
            (ChannelEvents::TIMEOUT, "TIMEOUT"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", set.join("|"))
        }
    }
}

/// Callbacks a protocol layer registers on a channel or listener.
///
/// All callbacks are optional. They are invoked from the reactor thread that
/// owns the channel and never re-entered while one is running.
pub trait ChannelHandler {
    /// A listener accepted a new low-level connection.
    fn on_accept(&self, _listener: &Listener, _params: AcceptParams) {}

    /// New bytes were appended to the input buffer.
    fn on_readable(&self, _channel: &Channel) {}

    /// The output buffer drained to or below the write low watermark.
    fn on_writable(&self, _channel: &Channel) {}

    /// Connection state changed (connected, EOF, error, timeout).
    fn on_event(&self, _channel: &Channel, _events: ChannelEvents) {}
}

/// Per-channel tuning.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Read inactivity timeout; `None` disables it.
    pub read_timeout: Option<Duration>,
    /// Deadline for an outbound connect to complete.
    pub connect_timeout: Option<Duration>,
    /// Reading pauses while this many bytes are buffered.
    pub input_high_watermark: usize,
    /// `on_writable` fires once the output buffer is at or below this size.
    pub write_low_watermark: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            read_timeout: None,
            connect_timeout: None,
            input_high_watermark: DEFAULT_INPUT_HIGH_WATERMARK,
            write_low_watermark: 0,
        }
    }
}

/// Pending output, kept as a queue of shared chunks so that large bodies are
/// handed over without copying.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    chunks: VecDeque<Bytes>,
    len: usize,
}

impl OutputBuffer {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate over the queued chunks in send order.
    pub fn chunks(&self) -> impl Iterator<Item = &Bytes> {
        self.chunks.iter()
    }

    fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.chunks.push_back(chunk);
    }

    fn front(&self) -> Option<Bytes> {
        self.chunks.front().cloned()
    }

    fn consume(&mut self, mut n: usize) {
        self.len = self.len.saturating_sub(n);
        while n > 0 {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            if n < front.len() {
                front.advance(n);
                break;
            }
            n -= front.len();
            self.chunks.pop_front();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connecting,
    Open,
    /// Half-close requested; output is flushed first.
    Closing,
    HalfClosed,
    Failed,
}

struct ChannelCore {
    input: RefCell<BytesMut>,
    output: RefCell<OutputBuffer>,
    eof: Cell<bool>,
    phase: Cell<Phase>,
    peer_addr: Option<SocketAddr>,
    options: ChannelOptions,
    handler: RefCell<Option<Weak<dyn ChannelHandler>>>,
    wake: Rc<Notify>,
    driver: RefCell<Option<AbortHandle>>,
    _permit: Option<ConnectionPermit>,
}

impl Drop for ChannelCore {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.get_mut().take() {
            driver.abort();
        }
    }
}

/// Handle to one connected duplex byte stream.
///
/// Exactly one owner holds a `Channel`; dropping it closes the stream and
/// discards anything still buffered.
pub struct Channel {
    core: Rc<ChannelCore>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("peer_addr", &self.core.peer_addr)
            .field("phase", &self.core.phase.get())
            .field("eof", &self.core.eof.get())
            .field("input_len", &self.input_len())
            .field("output_len", &self.output_len())
            .finish()
    }
}

impl Channel {
    /// Drive an already connected stream on the current reactor.
    ///
    /// Any `AsyncRead + AsyncWrite` stream can back a channel; the TCP
    /// transport uses this for accepted sockets.
    pub fn from_stream<S>(stream: S, peer_addr: Option<SocketAddr>, options: ChannelOptions) -> Result<Self, TransportError>
    where
        S: AsyncRead + AsyncWrite + 'static,
    {
        Self::spawn(async move { Ok(stream) }, false, peer_addr, options, None)
    }

    pub(crate) fn accepted<S>(
        stream: S,
        peer_addr: SocketAddr,
        options: ChannelOptions,
        permit: ConnectionPermit,
    ) -> Result<Self, TransportError>
    where
        S: AsyncRead + AsyncWrite + 'static,
    {
        Self::spawn(async move { Ok(stream) }, false, Some(peer_addr), options, Some(permit))
    }

    /// Start an outbound connection; `CONNECTED` or `ERROR` follows.
    pub(crate) fn connecting<F, S>(connect: F, peer_addr: SocketAddr, options: ChannelOptions) -> Result<Self, TransportError>
    where
        F: Future<Output = io::Result<S>> + 'static,
        S: AsyncRead + AsyncWrite + 'static,
    {
        Self::spawn(connect, true, Some(peer_addr), options, None)
    }

    fn spawn<F, S>(
        establish: F,
        connecting: bool,
        peer_addr: Option<SocketAddr>,
        options: ChannelOptions,
        permit: Option<ConnectionPermit>,
    ) -> Result<Self, TransportError>
    where
        F: Future<Output = io::Result<S>> + 'static,
        S: AsyncRead + AsyncWrite + 'static,
    {
        if reactor::current().is_none() {
            return Err(TransportError::NoReactor);
        }

        let wake = Rc::new(Notify::new());
        let core = Rc::new(ChannelCore {
            input: RefCell::new(BytesMut::new()),
            output: RefCell::new(OutputBuffer::default()),
            eof: Cell::new(false),
            phase: Cell::new(if connecting { Phase::Connecting } else { Phase::Open }),
            peer_addr,
            options,
            handler: RefCell::new(None),
            wake: Rc::clone(&wake),
            driver: RefCell::new(None),
            _permit: permit,
        });

        let task = tokio::task::spawn_local(drive(Rc::downgrade(&core), wake, establish, connecting));
        *core.driver.borrow_mut() = Some(task.abort_handle());

        Ok(Self { core })
    }

    /// Bind the protocol layer that receives this channel's events.
    pub fn set_handler(&self, handler: Weak<dyn ChannelHandler>) {
        *self.core.handler.borrow_mut() = Some(handler);
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.core.peer_addr
    }

    /// True once the peer closed its write side.
    pub fn is_eof(&self) -> bool {
        self.core.eof.get()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.core.phase.get(), Phase::Open | Phase::Closing | Phase::HalfClosed)
    }

    /// Bytes received and not yet drained.
    pub fn input(&self) -> Ref<'_, BytesMut> {
        self.core.input.borrow()
    }

    pub fn input_len(&self) -> usize {
        self.core.input.borrow().len()
    }

    /// Bytes queued and not yet accepted by the stream.
    pub fn output(&self) -> Ref<'_, OutputBuffer> {
        self.core.output.borrow()
    }

    pub fn output_len(&self) -> usize {
        self.core.output.borrow().len()
    }

    pub fn write_low_watermark(&self) -> usize {
        self.core.options.write_low_watermark
    }

    /// Copy up to `buf.len()` buffered input bytes out, removing them.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut input = self.core.input.borrow_mut();
        let n = buf.len().min(input.len());
        buf[..n].copy_from_slice(&input[..n]);
        input.advance(n);
        drop(input);
        if n > 0 {
            self.core.wake.notify_one();
        }
        n
    }

    /// Queue a copy of `data` for sending.
    pub fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        self.write_bytes(Bytes::copy_from_slice(data))
    }

    /// Queue `data` for sending without copying; the chunk is released once
    /// fully written.
    pub fn write_bytes(&self, data: Bytes) -> Result<(), TransportError> {
        match self.core.phase.get() {
            Phase::Connecting | Phase::Open => {}
            Phase::Closing | Phase::HalfClosed => return Err(TransportError::Shutdown),
            Phase::Failed => return Err(TransportError::Failed),
        }
        self.core.output.borrow_mut().push(data);
        self.core.wake.notify_one();
        Ok(())
    }

    /// Half-close the write side once pending output has been flushed.
    pub fn shutdown(&self) -> Result<(), TransportError> {
        match self.core.phase.get() {
            Phase::Open => {
                self.core.phase.set(Phase::Closing);
                self.core.wake.notify_one();
                Ok(())
            }
            Phase::Connecting => Err(TransportError::NotConnected),
            Phase::Closing | Phase::HalfClosed => Err(TransportError::Shutdown),
            Phase::Failed => Err(TransportError::Failed),
        }
    }

    /// Discard `n` consumed bytes from the front of the input buffer.
    pub fn drain_input(&self, n: usize) -> Result<(), TransportError> {
        let mut input = self.core.input.borrow_mut();
        if n > input.len() {
            return Err(TransportError::DrainOverflow {
                requested: n,
                available: input.len(),
            });
        }
        input.advance(n);
        drop(input);
        self.core.wake.notify_one();
        Ok(())
    }
}

/// Runs `f` against the bound handler. Returns false once the channel is gone.
fn dispatch<F>(core: &Weak<ChannelCore>, f: F) -> bool
where
    F: FnOnce(&dyn ChannelHandler, &Channel),
{
    let Some(strong) = core.upgrade() else {
        return false;
    };
    let handler = strong.handler.borrow().as_ref().and_then(Weak::upgrade);
    let channel = Channel { core: strong };
    if let Some(handler) = handler {
        f(handler.as_ref(), &channel);
    }
    drop(channel);
    core.strong_count() > 0
}

fn fail(core: &Weak<ChannelCore>, direction: ChannelEvents, err: &io::Error) {
    if let Some(strong) = core.upgrade() {
        tracing::debug!(peer_addr = ?strong.peer_addr, error = %err, "Channel failed");
        strong.phase.set(Phase::Failed);
    }
    dispatch(core, |handler, channel| {
        handler.on_event(channel, ChannelEvents::ERROR | direction)
    });
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365)
}

async fn write_chunk<W>(writer: &mut W, chunk: Option<Bytes>) -> io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    match chunk {
        Some(chunk) => match writer.write(&chunk).await? {
            0 => Err(io::Error::new(io::ErrorKind::WriteZero, "stream accepted no bytes")),
            n => Ok(n),
        },
        None => std::future::pending().await,
    }
}

async fn drive<F, S>(core: Weak<ChannelCore>, wake: Rc<Notify>, establish: F, connecting: bool)
where
    F: Future<Output = io::Result<S>>,
    S: AsyncRead + AsyncWrite,
{
    let Some(options) = core.upgrade().map(|c| c.options.clone()) else {
        return;
    };

    let established = match (connecting, options.connect_timeout) {
        (true, Some(limit)) => match tokio::time::timeout(limit, establish).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
        },
        _ => establish.await,
    };

    let stream = match established {
        Ok(stream) => stream,
        Err(err) => {
            fail(&core, ChannelEvents::WRITING, &err);
            return;
        }
    };

    if connecting {
        if let Some(strong) = core.upgrade() {
            strong.phase.set(Phase::Open);
        }
        tracing::trace!("Channel connected");
        let alive = dispatch(&core, |handler, channel| {
            handler.on_event(channel, ChannelEvents::CONNECTED | ChannelEvents::WRITING)
        });
        if !alive {
            return;
        }
    }

    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut scratch = vec![0u8; READ_CHUNK];
    let mut read_deadline = options.read_timeout.map(|t| Instant::now() + t);

    loop {
        let Some(strong) = core.upgrade() else {
            return;
        };
        let phase = strong.phase.get();
        let reading = !strong.eof.get() && strong.input.borrow().len() < options.input_high_watermark;
        let pending = strong.output.borrow().front();
        drop(strong);

        if phase == Phase::Closing && pending.is_none() {
            if let Err(err) = writer.shutdown().await {
                fail(&core, ChannelEvents::WRITING, &err);
                return;
            }
            if let Some(strong) = core.upgrade() {
                strong.phase.set(Phase::HalfClosed);
            }
            continue;
        }

        let timed = reading && read_deadline.is_some();
        let deadline = read_deadline.unwrap_or_else(far_future);
        let writing = pending.is_some();

        tokio::select! {
            result = reader.read(&mut scratch), if reading => match result {
                Ok(0) => {
                    if let Some(strong) = core.upgrade() {
                        strong.eof.set(true);
                    }
                    let alive = dispatch(&core, |handler, channel| {
                        handler.on_event(channel, ChannelEvents::EOF | ChannelEvents::READING)
                    });
                    if !alive {
                        return;
                    }
                }
                Ok(n) => {
                    match core.upgrade() {
                        Some(strong) => strong.input.borrow_mut().extend_from_slice(&scratch[..n]),
                        None => return,
                    }
                    read_deadline = options.read_timeout.map(|t| Instant::now() + t);
                    if !dispatch(&core, |handler, channel| handler.on_readable(channel)) {
                        return;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => {
                    fail(&core, ChannelEvents::READING, &err);
                    return;
                }
            },
            result = write_chunk(&mut writer, pending), if writing => match result {
                Ok(n) => {
                    let Some(strong) = core.upgrade() else {
                        return;
                    };
                    let drained = {
                        let mut output = strong.output.borrow_mut();
                        output.consume(n);
                        output.len() <= options.write_low_watermark
                    };
                    drop(strong);
                    if drained && !dispatch(&core, |handler, channel| handler.on_writable(channel)) {
                        return;
                    }
                }
                Err(err) => {
                    fail(&core, ChannelEvents::WRITING, &err);
                    return;
                }
            },
            () = wake.notified() => {}
            () = sleep_until(deadline), if timed => {
                read_deadline = options.read_timeout.map(|t| Instant::now() + t);
                let alive = dispatch(&core, |handler, channel| {
                    handler.on_event(channel, ChannelEvents::TIMEOUT | ChannelEvents::READING)
                });
                if !alive {
                    return;
                }
            }
        }
    }
}
