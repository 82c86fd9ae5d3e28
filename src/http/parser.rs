//! Incremental, pausable HTTP/1.x message parser.
//!
//! # Responsibilities
//! - Parse a request or response head (start line + headers) byte by byte
//! - Decode bodies framed by Content-Length, chunked encoding or EOF
//! - Stop at every message boundary so the caller can react before the
//!   next byte is consumed
//!
//! # Design Decisions
//! - Input may arrive split at any byte; parser state carries across calls
//! - The LF that ends the header block is reported but left unconsumed;
//!   the caller feeds that single byte back to continue
//! - One message per parser; bytes after completion are never consumed

use bytes::BytesMut;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid start line")]
    StartLine,

    #[error("invalid header line")]
    HeaderLine,

    #[error("invalid content length")]
    ContentLength,

    #[error("unsupported transfer encoding")]
    TransferEncoding,

    #[error("invalid chunk framing")]
    Chunk,

    #[error("message head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("message body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("unexpected byte {0:#04x} at end of header block")]
    HeaderTerminator(u8),

    #[error("connection closed before the message was complete")]
    Incomplete,
}

/// Which side of the exchange is being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
}

/// Points at which the parser pauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    MessageBegin,
    HeadersComplete,
    MessageComplete,
}

/// Result of one [`HttpParser::execute`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes consumed from the slice passed in.
    pub consumed: usize,
    /// Boundary reached, if the call stopped at one.
    pub boundary: Option<Boundary>,
}

impl Progress {
    fn paused(consumed: usize, boundary: Boundary) -> Self {
        Self {
            consumed,
            boundary: Some(boundary),
        }
    }
}

/// Size limits applied while parsing.
#[derive(Debug, Clone, Copy)]
pub struct ParserLimits {
    pub max_head_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_head_bytes: 64 * 1024,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Parsed start line and headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHead {
    pub method: Option<String>,
    pub target: Option<String>,
    pub status: Option<u16>,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl MessageHead {
    /// First value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    NoBody,
    Length(usize),
    Chunked,
    UntilEof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    StartLine,
    HeaderLine,
    /// Waiting to consume the LF that ended the header block.
    HeadersLf,
    Body(usize),
    ChunkSize,
    ChunkExtension,
    ChunkSizeLf,
    ChunkData(usize),
    ChunkDataCr,
    ChunkDataLf,
    Trailer,
    UntilEof,
    Done,
}

/// Byte-oriented HTTP/1.x parser for a single message.
#[derive(Debug)]
pub struct HttpParser {
    kind: MessageKind,
    limits: ParserLimits,
    state: State,
    line: Vec<u8>,
    head_bytes: usize,
    head: MessageHead,
    framing: Framing,
    body_bytes: usize,
    chunk_size: usize,
    chunk_digits: usize,
}

impl HttpParser {
    pub fn new(kind: MessageKind, limits: ParserLimits) -> Self {
        Self {
            kind,
            limits,
            state: State::Idle,
            line: Vec::new(),
            head_bytes: 0,
            head: MessageHead::default(),
            framing: Framing::NoBody,
            body_bytes: 0,
            chunk_size: 0,
            chunk_digits: 0,
        }
    }

    pub fn head(&self) -> &MessageHead {
        &self.head
    }

    pub fn take_head(&mut self) -> MessageHead {
        std::mem::take(&mut self.head)
    }

    pub fn is_complete(&self) -> bool {
        self.state == State::Done
    }

    /// Feed `data`, appending decoded body bytes to `body`.
    ///
    /// Returns after consuming all of `data` or at the first boundary.
    pub fn execute(&mut self, data: &[u8], body: &mut BytesMut) -> Result<Progress, ParseError> {
        let mut pos = 0;

        while pos < data.len() {
            let byte = data[pos];
            match self.state {
                State::Idle => {
                    if byte == b'\r' || byte == b'\n' {
                        pos += 1;
                        continue;
                    }
                    self.state = State::StartLine;
                    return Ok(Progress::paused(pos, Boundary::MessageBegin));
                }
                State::StartLine | State::HeaderLine => {
                    self.count_head_byte()?;
                    if byte != b'\n' {
                        self.line.push(byte);
                        pos += 1;
                        continue;
                    }
                    if self.state == State::HeaderLine && matches!(self.line.as_slice(), [] | [b'\r']) {
                        self.line.clear();
                        self.framing = self.framing()?;
                        self.state = State::HeadersLf;
                        return Ok(Progress::paused(pos, Boundary::HeadersComplete));
                    }
                    self.finish_line()?;
                    pos += 1;
                }
                State::HeadersLf => {
                    if byte != b'\n' {
                        return Err(ParseError::HeaderTerminator(byte));
                    }
                    pos += 1;
                    self.state = match self.framing {
                        Framing::NoBody | Framing::Length(0) => State::Done,
                        Framing::Length(n) => State::Body(n),
                        Framing::Chunked => State::ChunkSize,
                        Framing::UntilEof => State::UntilEof,
                    };
                    if self.state == State::Done {
                        return Ok(Progress::paused(pos, Boundary::MessageComplete));
                    }
                }
                State::Body(remaining) => {
                    let take = remaining.min(data.len() - pos);
                    self.append_body(body, &data[pos..pos + take])?;
                    pos += take;
                    if take == remaining {
                        self.state = State::Done;
                        return Ok(Progress::paused(pos, Boundary::MessageComplete));
                    }
                    self.state = State::Body(remaining - take);
                }
                State::ChunkSize => {
                    pos += 1;
                    match byte {
                        b'0'..=b'9' | b'a'..=b'f' | b'A'..=b'F' => {
                            let digit = (byte as char).to_digit(16).unwrap_or(0) as usize;
                            self.chunk_size = self
                                .chunk_size
                                .checked_mul(16)
                                .and_then(|size| size.checked_add(digit))
                                .ok_or(ParseError::Chunk)?;
                            self.chunk_digits += 1;
                        }
                        b';' | b' ' | b'\t' if self.chunk_digits > 0 => self.state = State::ChunkExtension,
                        b'\r' if self.chunk_digits > 0 => self.state = State::ChunkSizeLf,
                        b'\n' if self.chunk_digits > 0 => self.start_chunk(),
                        _ => return Err(ParseError::Chunk),
                    }
                }
                State::ChunkExtension => {
                    pos += 1;
                    match byte {
                        b'\r' => self.state = State::ChunkSizeLf,
                        b'\n' => self.start_chunk(),
                        _ => {}
                    }
                }
                State::ChunkSizeLf => {
                    if byte != b'\n' {
                        return Err(ParseError::Chunk);
                    }
                    pos += 1;
                    self.start_chunk();
                }
                State::ChunkData(remaining) => {
                    let take = remaining.min(data.len() - pos);
                    self.append_body(body, &data[pos..pos + take])?;
                    pos += take;
                    self.state = if take == remaining {
                        State::ChunkDataCr
                    } else {
                        State::ChunkData(remaining - take)
                    };
                }
                State::ChunkDataCr => {
                    pos += 1;
                    match byte {
                        b'\r' => self.state = State::ChunkDataLf,
                        b'\n' => self.next_chunk(),
                        _ => return Err(ParseError::Chunk),
                    }
                }
                State::ChunkDataLf => {
                    if byte != b'\n' {
                        return Err(ParseError::Chunk);
                    }
                    pos += 1;
                    self.next_chunk();
                }
                State::Trailer => {
                    self.count_head_byte()?;
                    pos += 1;
                    if byte != b'\n' {
                        self.line.push(byte);
                        continue;
                    }
                    let blank = matches!(self.line.as_slice(), [] | [b'\r']);
                    self.line.clear();
                    if blank {
                        self.state = State::Done;
                        return Ok(Progress::paused(pos, Boundary::MessageComplete));
                    }
                }
                State::UntilEof => {
                    self.append_body(body, &data[pos..])?;
                    pos = data.len();
                }
                State::Done => break,
            }
        }

        Ok(Progress {
            consumed: pos,
            boundary: None,
        })
    }

    /// Signal end of input.
    ///
    /// Completes an EOF-delimited body. Returns `Ok(None)` when no message
    /// was in progress or it already completed.
    pub fn finish(&mut self) -> Result<Option<Boundary>, ParseError> {
        match self.state {
            State::Idle | State::Done => Ok(None),
            State::UntilEof => {
                self.state = State::Done;
                Ok(Some(Boundary::MessageComplete))
            }
            _ => Err(ParseError::Incomplete),
        }
    }

    fn count_head_byte(&mut self) -> Result<(), ParseError> {
        self.head_bytes += 1;
        if self.head_bytes > self.limits.max_head_bytes {
            return Err(ParseError::HeadTooLarge(self.limits.max_head_bytes));
        }
        Ok(())
    }

    fn append_body(&mut self, body: &mut BytesMut, bytes: &[u8]) -> Result<(), ParseError> {
        self.body_bytes += bytes.len();
        if self.body_bytes > self.limits.max_body_bytes {
            return Err(ParseError::BodyTooLarge(self.limits.max_body_bytes));
        }
        body.extend_from_slice(bytes);
        Ok(())
    }

    fn start_chunk(&mut self) {
        self.state = if self.chunk_size == 0 {
            State::Trailer
        } else {
            State::ChunkData(self.chunk_size)
        };
    }

    fn next_chunk(&mut self) {
        self.chunk_size = 0;
        self.chunk_digits = 0;
        self.state = State::ChunkSize;
    }

    fn finish_line(&mut self) -> Result<(), ParseError> {
        let mut line = std::mem::take(&mut self.line);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        let text = String::from_utf8_lossy(&line);

        if self.state == State::StartLine {
            match self.kind {
                MessageKind::Request => self.parse_request_line(&text)?,
                MessageKind::Response => self.parse_status_line(&text)?,
            }
            self.state = State::HeaderLine;
            return Ok(());
        }

        if text.starts_with([' ', '\t']) {
            // obsolete line folding continues the previous value
            let (_, value) = self.head.headers.last_mut().ok_or(ParseError::HeaderLine)?;
            value.push(' ');
            value.push_str(text.trim());
            return Ok(());
        }

        let (name, value) = text.split_once(':').ok_or(ParseError::HeaderLine)?;
        if name.is_empty() || name.contains(|c: char| c.is_whitespace()) {
            return Err(ParseError::HeaderLine);
        }
        self.head.headers.push((name.to_string(), value.trim().to_string()));
        Ok(())
    }

    fn parse_request_line(&mut self, line: &str) -> Result<(), ParseError> {
        let mut parts = line.split(' ');
        let (Some(method), Some(target), Some(version), None) = (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ParseError::StartLine);
        };
        if method.is_empty() || !method.bytes().all(|b| b.is_ascii_alphabetic()) || target.is_empty() {
            return Err(ParseError::StartLine);
        }
        if !version.starts_with("HTTP/1.") {
            return Err(ParseError::StartLine);
        }
        self.head.method = Some(method.to_string());
        self.head.target = Some(target.to_string());
        self.head.version = version.to_string();
        Ok(())
    }

    fn parse_status_line(&mut self, line: &str) -> Result<(), ParseError> {
        let mut parts = line.splitn(3, ' ');
        let (Some(version), Some(code)) = (parts.next(), parts.next()) else {
            return Err(ParseError::StartLine);
        };
        if !version.starts_with("HTTP/1.") || code.len() != 3 {
            return Err(ParseError::StartLine);
        }
        let status = code.parse::<u16>().map_err(|_| ParseError::StartLine)?;
        self.head.status = Some(status);
        self.head.version = version.to_string();
        Ok(())
    }

    fn framing(&self) -> Result<Framing, ParseError> {
        if let Some(status) = self.head.status {
            if (100..200).contains(&status) || status == 204 || status == 304 {
                return Ok(Framing::NoBody);
            }
        }

        if let Some(encoding) = self.head.header("transfer-encoding") {
            let last = encoding.rsplit(',').next().unwrap_or_default().trim();
            if last.eq_ignore_ascii_case("chunked") {
                return Ok(Framing::Chunked);
            }
            return match self.kind {
                MessageKind::Response => Ok(Framing::UntilEof),
                MessageKind::Request => Err(ParseError::TransferEncoding),
            };
        }

        let mut length = None;
        for (_, value) in self
            .head
            .headers
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case("content-length"))
        {
            if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ParseError::ContentLength);
            }
            let parsed = value.parse::<usize>().map_err(|_| ParseError::ContentLength)?;
            if length.is_some_and(|previous| previous != parsed) {
                return Err(ParseError::ContentLength);
            }
            length = Some(parsed);
        }

        match (length, self.kind) {
            (Some(n), _) if n > self.limits.max_body_bytes => Err(ParseError::BodyTooLarge(self.limits.max_body_bytes)),
            (Some(n), _) => Ok(Framing::Length(n)),
            (None, MessageKind::Request) => Ok(Framing::NoBody),
            (None, MessageKind::Response) => Ok(Framing::UntilEof),
        }
    }
}
