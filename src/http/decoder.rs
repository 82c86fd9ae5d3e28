//! Session-level message decoding over a growing input buffer.
//!
//! [`MessageDecoder`] sits between a channel's input buffer and the
//! [`HttpParser`]. It tracks how much of the buffer has been parsed, tells
//! the caller when consumed bytes may be drained, and collects the body.
//!
//! ```text
//! MessageBegin → ParseBegin → HeadersComplete → BodyParse → MessageComplete
//!                                   │ drain head bytes            │ drain rest
//! ```
//!
//! The decoder never touches the buffer itself, so the same sequence of
//! transitions results whether a message arrives in one read or one byte at
//! a time.

use bytes::{Bytes, BytesMut};

use crate::http::parser::{Boundary, HttpParser, MessageHead, MessageKind, ParseError, ParserLimits};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpState {
    MessageBegin,
    ParseBegin,
    HeadersComplete,
    BodyParse,
    MessageComplete,
}

/// What the caller should do after one [`MessageDecoder::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Everything buffered has been parsed; wait for more input.
    NeedMore,
    /// State changed; call `step` again.
    Advanced,
    /// Drain `n` consumed bytes from the input buffer, then call `step` again.
    Drain(usize),
    /// The message is complete; drain `n` bytes and take the message.
    Complete(usize),
}

/// A fully received message.
#[derive(Debug, Clone)]
pub struct Message {
    pub head: MessageHead,
    pub body: Bytes,
}

#[derive(Debug)]
pub struct MessageDecoder {
    parser: HttpParser,
    state: HttpState,
    offset: usize,
    body: BytesMut,
    delivered: bool,
}

impl MessageDecoder {
    pub fn new(kind: MessageKind, limits: ParserLimits) -> Self {
        Self {
            parser: HttpParser::new(kind, limits),
            state: HttpState::MessageBegin,
            offset: 0,
            body: BytesMut::new(),
            delivered: false,
        }
    }

    pub fn state(&self) -> HttpState {
        self.state
    }

    /// Bytes at the front of the input buffer already parsed but not drained.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Body bytes decoded so far.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Advance over `input`, the channel's whole input buffer.
    pub fn step(&mut self, input: &[u8]) -> Result<Step, ParseError> {
        match self.state {
            HttpState::MessageBegin | HttpState::ParseBegin | HttpState::BodyParse => {
                let before = self.state;
                self.parse(input)?;
                Ok(if self.state != before {
                    Step::Advanced
                } else if before == HttpState::MessageBegin && self.offset > 0 {
                    // blank lines ahead of the start line
                    Step::Drain(std::mem::take(&mut self.offset))
                } else {
                    Step::NeedMore
                })
            }
            HttpState::HeadersComplete => {
                self.state = HttpState::BodyParse;
                Ok(Step::Drain(std::mem::take(&mut self.offset)))
            }
            HttpState::MessageComplete if !self.delivered => {
                self.delivered = true;
                Ok(Step::Complete(std::mem::take(&mut self.offset)))
            }
            // bytes after a complete message are discarded
            HttpState::MessageComplete if input.is_empty() => Ok(Step::NeedMore),
            HttpState::MessageComplete => Ok(Step::Drain(input.len())),
        }
    }

    /// Input ended. Returns true if that completed the message.
    pub fn finish(&mut self) -> Result<bool, ParseError> {
        match self.state {
            HttpState::MessageBegin | HttpState::MessageComplete => Ok(false),
            _ => match self.parser.finish()? {
                Some(Boundary::MessageComplete) => {
                    self.state = HttpState::MessageComplete;
                    Ok(true)
                }
                _ => Err(ParseError::Incomplete),
            },
        }
    }

    /// Take the completed message, leaving an empty head and body behind.
    pub fn take_message(&mut self) -> Message {
        Message {
            head: self.parser.take_head(),
            body: self.body.split().freeze(),
        }
    }

    fn parse(&mut self, input: &[u8]) -> Result<(), ParseError> {
        let pending = input.get(self.offset..).unwrap_or_default();
        if pending.is_empty() {
            return Ok(());
        }

        let progress = self.parser.execute(pending, &mut self.body)?;
        self.offset += progress.consumed;

        match progress.boundary {
            None => {}
            Some(Boundary::MessageBegin) => self.state = HttpState::ParseBegin,
            Some(Boundary::MessageComplete) => self.state = HttpState::MessageComplete,
            Some(Boundary::HeadersComplete) => {
                self.state = HttpState::HeadersComplete;
                // the parser stopped on the final LF of the head; feed it alone
                let terminator = &pending[progress.consumed..progress.consumed + 1];
                let adjust = self.parser.execute(terminator, &mut self.body)?;
                self.offset += adjust.consumed;
                if adjust.boundary == Some(Boundary::MessageComplete) {
                    self.state = HttpState::MessageComplete;
                }
            }
        }
        Ok(())
    }
}
