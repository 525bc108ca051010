//! crates/protocol/src/codec/client.rs
//!
//! Server-side view of a client connection.

use std::mem;

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::auth::{AuthMode, AuthRequest};
use crate::error::ProtocolError;
use crate::line::{self, Limits, Shape};
use crate::request::{Command, Request, RequestEffect};
use crate::response::Response;

/// Lines in an authentication block after the `BEGIN` marker.
const AUTH_BLOCK: Shape = Shape {
    extra_lines: 4,
    transmission: false,
};

/// A unit of client input.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ClientFrame {
    /// The authentication block opening the connection.
    Auth(AuthRequest),
    /// A complete command or session directive.
    Command(Command),
    /// Opaque bytes following a stream switch.
    Raw(Bytes),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Handshake,
    Requests,
    Passthrough,
}

/// Decodes client input and encodes server output.
///
/// The decoder walks through three states: the authentication block, the
/// request stream, and, after `Gzip-stream` or another stream switch, opaque
/// passthrough. Argument requests are buffered until the command that
/// consumes them arrives, so every decoded [`ClientFrame::Command`] is
/// complete.
#[derive(Debug)]
pub struct ClientCodec {
    state: State,
    limits: Limits,
    pending: Vec<Request>,
    pending_len: usize,
}

impl ClientCodec {
    /// Creates a codec expecting an authentication block.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Handshake,
            limits: Limits::default(),
            pending: Vec::new(),
            pending_len: 0,
        }
    }

    /// Creates a codec for a connection that is already authenticated.
    #[must_use]
    pub fn authenticated() -> Self {
        Self {
            state: State::Requests,
            ..Self::new()
        }
    }

    /// Caps the size of a single file transmission.
    #[must_use]
    pub fn with_max_file_len(mut self, max_file_len: usize) -> Self {
        self.limits.file = max_file_len;
        self
    }

    /// Caps the bytes of one command, counting every request it carries.
    #[must_use]
    pub fn with_max_command_len(mut self, max_command_len: usize) -> Self {
        self.limits.command = max_command_len;
        self
    }

    fn accumulate(&mut self, request: Request) -> Result<(), ProtocolError> {
        self.pending_len += request.raw().len();
        if self.pending_len > self.limits.command {
            let length = self.pending_len;
            self.pending.clear();
            self.pending_len = 0;
            return Err(ProtocolError::CommandTooLarge {
                length,
                limit: self.limits.command,
            });
        }
        self.pending.push(request);
        Ok(())
    }

    fn decode_auth(&mut self, src: &mut BytesMut) -> Result<Option<ClientFrame>, ProtocolError> {
        let Some(first) = line::line_len(src, self.limits.line)? else {
            return Ok(None);
        };
        let marker = line::strip_newline(&src[..first]);
        let Some(mode) = AuthMode::from_begin_marker(marker) else {
            if marker.starts_with(b"BEGIN ") {
                return Err(ProtocolError::UnsupportedAuth {
                    method: line::lossy(marker),
                });
            }
            return Err(ProtocolError::MalformedAuth {
                expected: "BEGIN AUTH REQUEST",
                found: line::lossy(marker),
            });
        };
        let Some(extent) = line::measure(src, AUTH_BLOCK, self.limits, "authentication block")? else {
            return Ok(None);
        };

        let raw = src.split_to(extent.total).freeze();
        let (root, user, scrambled, end) = {
            let mut lines = line::header_lines(&raw, raw.len()).map(line::strip_newline).skip(1);
            let mut next = || String::from_utf8_lossy(lines.next().unwrap_or_default()).into_owned();
            (next(), next(), next(), next())
        };
        if end != mode.end_marker() {
            return Err(ProtocolError::MalformedAuth {
                expected: mode.end_marker(),
                found: end,
            });
        }

        self.state = State::Requests;
        Ok(Some(ClientFrame::Auth(AuthRequest::from_parts(
            mode, root, user, scrambled, raw,
        ))))
    }
}

impl Default for ClientCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ClientCodec {
    type Item = ClientFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::Handshake => return self.decode_auth(src),
                State::Passthrough => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(ClientFrame::Raw(src.split().freeze())));
                }
                State::Requests => {
                    let Some(request) = Request::decode(src, self.limits)? else {
                        return Ok(None);
                    };
                    match request.effect() {
                        RequestEffect::Accumulate => self.accumulate(request)?,
                        RequestEffect::SessionDirective => {
                            return Ok(Some(ClientFrame::Command(Command::from_parts_unchecked(
                                vec![request],
                            ))));
                        }
                        effect @ (RequestEffect::Command | RequestEffect::StreamSwitch) => {
                            if effect == RequestEffect::StreamSwitch {
                                self.state = State::Passthrough;
                            }
                            self.accumulate(request)?;
                            self.pending_len = 0;
                            let requests = mem::take(&mut self.pending);
                            return Ok(Some(ClientFrame::Command(Command::from_parts_unchecked(
                                requests,
                            ))));
                        }
                    }
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            // Argument requests without a command have nothing to run.
            self.pending.clear();
            self.pending_len = 0;
            return Ok(None);
        }
        Err(ProtocolError::TruncatedFrame {
            context: match self.state {
                State::Handshake => "authentication block",
                State::Requests | State::Passthrough => "request",
            },
        })
    }
}

impl Encoder<&Response> for ClientCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &Response, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.raw().len());
        dst.put_slice(item.raw());
        Ok(())
    }
}

impl Encoder<Bytes> for ClientCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len());
        dst.put_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUTH: &[u8] = b"BEGIN AUTH REQUEST\n/cvsroot\nanoncvs\nAy=0=a%0bZ\nEND AUTH REQUEST\n";

    fn decode_all(codec: &mut ClientCodec, input: &[u8]) -> Vec<ClientFrame> {
        let mut buf = BytesMut::from(input);
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn decodes_auth_then_commands() {
        let mut input = AUTH.to_vec();
        input.extend_from_slice(b"Root /cvsroot\nArgument module-A\nco\n");
        let frames = decode_all(&mut ClientCodec::new(), &input);
        assert_eq!(frames.len(), 3);

        let ClientFrame::Auth(auth) = &frames[0] else {
            panic!("expected auth, got {:?}", frames[0]);
        };
        assert_eq!(auth.mode(), AuthMode::Auth);
        assert_eq!(auth.root(), "/cvsroot");
        assert_eq!(auth.user(), "anoncvs");
        assert_eq!(&auth.raw()[..], AUTH);

        let ClientFrame::Command(root) = &frames[1] else {
            panic!("expected directive");
        };
        assert!(root.is_directive());
        let ClientFrame::Command(co) = &frames[2] else {
            panic!("expected command");
        };
        assert_eq!(co.name(), "co");
        assert_eq!(co.arguments(), vec!["module-A"]);
    }

    #[test]
    fn directives_are_not_held_back_by_pending_arguments() {
        let mut codec = ClientCodec::authenticated();
        let frames = decode_all(&mut codec, b"Argument -A\nGlobal_option -q\nupdate\n");
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], ClientFrame::Command(c) if c.name() == "Global_option"));
        assert!(matches!(&frames[1], ClientFrame::Command(c) if c.requests().len() == 2));
    }

    #[test]
    fn verification_request_is_accepted() {
        let frames = decode_all(
            &mut ClientCodec::new(),
            b"BEGIN VERIFICATION REQUEST\n/r\nu\nA\nEND VERIFICATION REQUEST\n",
        );
        assert!(matches!(&frames[0], ClientFrame::Auth(a) if a.mode() == AuthMode::Verify));
    }

    #[test]
    fn gssapi_is_unsupported() {
        let mut buf = BytesMut::from(&b"BEGIN GSSAPI REQUEST\n"[..]);
        assert!(matches!(
            ClientCodec::new().decode(&mut buf),
            Err(ProtocolError::UnsupportedAuth { .. })
        ));
    }

    #[test]
    fn rejects_garbage_before_auth() {
        let mut buf = BytesMut::from(&b"GET / HTTP/1.0\n"[..]);
        assert!(matches!(
            ClientCodec::new().decode(&mut buf),
            Err(ProtocolError::MalformedAuth { .. })
        ));
    }

    #[test]
    fn mismatched_end_marker_is_malformed() {
        let mut buf =
            BytesMut::from(&b"BEGIN AUTH REQUEST\n/r\nu\nA\nEND VERIFICATION REQUEST\n"[..]);
        assert!(matches!(
            ClientCodec::new().decode(&mut buf),
            Err(ProtocolError::MalformedAuth {
                expected: "END AUTH REQUEST",
                ..
            })
        ));
    }

    #[test]
    fn stream_switch_turns_input_opaque() {
        let mut codec = ClientCodec::authenticated();
        let frames = decode_all(&mut codec, b"Gzip-stream 6\n\x78\x9c\x01\x02co\n");
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], ClientFrame::Command(c) if c.switches_stream()));
        assert_eq!(frames[1], ClientFrame::Raw(Bytes::from_static(b"\x78\x9c\x01\x02co\n")));
        let mut more = BytesMut::from(&b"Argument x\n"[..]);
        assert_eq!(
            codec.decode(&mut more).unwrap(),
            Some(ClientFrame::Raw(Bytes::from_static(b"Argument x\n")))
        );
    }

    #[test]
    fn oversized_command_is_refused_before_it_completes() {
        let mut codec = ClientCodec::authenticated().with_max_command_len(64);
        let mut buf = BytesMut::new();
        for _ in 0..8 {
            buf.extend_from_slice(b"Argument some-long-file-name.c\n");
        }
        buf.extend_from_slice(b"update\n");
        let mut decoded = 0;
        let err = loop {
            match codec.decode(&mut buf) {
                Ok(Some(_)) => decoded += 1,
                Ok(None) => panic!("cap was never enforced"),
                Err(err) => break err,
            }
        };
        assert_eq!(decoded, 0);
        assert!(matches!(err, ProtocolError::CommandTooLarge { limit: 64, .. }));
        assert!(err.is_malformed());
    }

    #[test]
    fn command_cap_counts_file_transmissions() {
        let mut codec = ClientCodec::authenticated()
            .with_max_file_len(32)
            .with_max_command_len(48);
        let mut buf = BytesMut::from(&b"Modified a\nu=rw,g=r,o=r\n40\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::PayloadTooLarge { length: 40, limit: 32 })
        ));

        let mut codec = ClientCodec::authenticated().with_max_command_len(48);
        let mut input = b"Modified a\nu=rw,g=r,o=r\n20\n".to_vec();
        input.extend_from_slice(&[b'x'; 20]);
        input.extend_from_slice(b"Argument a\nci\n");
        let mut buf = BytesMut::from(&input[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::CommandTooLarge { limit: 48, .. })
        ));
    }

    #[test]
    fn command_cap_resets_between_commands() {
        let mut codec = ClientCodec::authenticated().with_max_command_len(40);
        let frames = decode_all(&mut codec, b"Argument a\nArgument b\nco\nArgument c\nArgument d\nco\n");
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn eof_inside_a_request_is_truncation() {
        let mut codec = ClientCodec::authenticated();
        let mut buf = BytesMut::from(&b"Argument unfinished"[..]);
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(ProtocolError::TruncatedFrame { context: "request" })
        ));
    }

    #[test]
    fn eof_after_dangling_arguments_is_clean() {
        let mut codec = ClientCodec::authenticated();
        let mut buf = BytesMut::from(&b"Argument x\n"[..]);
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn encodes_responses_verbatim() {
        let mut codec = ClientCodec::new();
        let mut dst = BytesMut::new();
        codec.encode(&Response::stderr("x"), &mut dst).unwrap();
        codec.encode(Bytes::from_static(b"ok\n"), &mut dst).unwrap();
        assert_eq!(&dst[..], b"E x\nok\n");
    }
}
