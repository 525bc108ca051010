//! Client-side view of a connection to a pserver.

use std::mem;

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::auth::{AUTH_ACCEPTED, AUTH_REJECTED, AuthOutcome, AuthReply, AuthRequest};
use crate::error::ProtocolError;
use crate::line::{self, Limits};
use crate::request::{Command, Request};
use crate::response::Response;

/// A unit of server output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UpstreamFrame {
    /// The verdict on the authentication block.
    Auth(AuthReply),
    /// One response frame.
    Response(Response),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    AwaitingVerdict,
    Responses,
}

/// Decodes server output and encodes client input.
#[derive(Debug)]
pub struct UpstreamCodec {
    state: State,
    limits: Limits,
    reply: BytesMut,
    messages: Vec<String>,
}

impl UpstreamCodec {
    /// Creates a codec that expects an authentication verdict first.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::AwaitingVerdict,
            limits: Limits::default(),
            reply: BytesMut::new(),
            messages: Vec::new(),
        }
    }

    /// Caps the size of a single file transmission.
    #[must_use]
    pub fn with_max_file_len(mut self, max_file_len: usize) -> Self {
        self.limits.file = max_file_len;
        self
    }

    fn finish(&mut self, outcome: AuthOutcome) -> UpstreamFrame {
        self.state = State::Responses;
        UpstreamFrame::Auth(AuthReply::new(
            outcome,
            mem::take(&mut self.messages),
            mem::take(&mut self.reply).freeze(),
        ))
    }

    fn decode_verdict(&mut self, src: &mut BytesMut) -> Result<Option<UpstreamFrame>, ProtocolError> {
        while let Some(len) = line::line_len(src, self.limits.line)? {
            let raw = src.split_to(len);
            self.reply.extend_from_slice(&raw);
            let text = line::strip_newline(&raw);
            if text == AUTH_ACCEPTED.as_bytes() {
                return Ok(Some(self.finish(AuthOutcome::Accepted)));
            }
            if text == AUTH_REJECTED.as_bytes() {
                return Ok(Some(self.finish(AuthOutcome::Rejected)));
            }
            match line::split_keyword(text) {
                (b"error", rest) => {
                    self.messages.push(line::lossy(rest).trim().to_owned());
                    return Ok(Some(self.finish(AuthOutcome::Failed)));
                }
                (b"E", rest) => self.messages.push(line::lossy(rest)),
                _ => self.messages.push(line::lossy(text)),
            }
        }
        Ok(None)
    }
}

impl Default for UpstreamCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for UpstreamCodec {
    type Item = UpstreamFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.state {
            State::AwaitingVerdict => self.decode_verdict(src),
            State::Responses => Ok(Response::decode(src, self.limits)?.map(UpstreamFrame::Response)),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        match self.state {
            State::AwaitingVerdict if !self.reply.is_empty() || !src.is_empty() => {
                // Servers print a diagnostic and hang up when they refuse the
                // handshake itself.
                if !src.is_empty() {
                    let rest = src.split();
                    self.messages.push(line::lossy(&rest));
                    self.reply.extend_from_slice(&rest);
                }
                Ok(Some(self.finish(AuthOutcome::Failed)))
            }
            _ if src.is_empty() => Ok(None),
            _ => Err(ProtocolError::TruncatedFrame { context: "response" }),
        }
    }
}

impl Encoder<&AuthRequest> for UpstreamCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &AuthRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.raw().len());
        dst.put_slice(item.raw());
        Ok(())
    }
}

impl Encoder<&Request> for UpstreamCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.raw().len());
        dst.put_slice(item.raw());
        Ok(())
    }
}

impl Encoder<&Command> for UpstreamCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode_into(dst);
        Ok(())
    }
}

impl Encoder<Bytes> for UpstreamCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len());
        dst.put_slice(&item);
        Ok(())
    }
}
