//! Client requests and the commands they assemble into.

mod table;


use std::borrow::Cow;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::line::{self, Limits};

pub use table::{RequestEffect, RequestSpec, known_requests, lookup_request};

/// One request frame exactly as the client sent it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Request {
    spec: &'static RequestSpec,
    raw: Bytes,
    header_end: usize,
}

impl Request {
    pub(crate) fn decode(src: &mut BytesMut, limits: Limits) -> Result<Option<Self>, ProtocolError> {
        let Some(first) = line::line_len(src, limits.line)? else {
            return Ok(None);
        };
        let spec = spec_for_line(&src[..first])?;
        let Some(extent) = line::measure(src, spec.shape(), limits, spec.name())? else {
            return Ok(None);
        };
        if src.len() < extent.total {
            src.reserve(extent.total - src.len());
            return Ok(None);
        }

        Ok(Some(Self {
            spec,
            raw: src.split_to(extent.total).freeze(),
            header_end: extent.header_end,
        }))
    }

    /// Parses exactly one complete request frame.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut buf = BytesMut::from(bytes);
        let request = Self::decode(&mut buf, Limits::default())?.ok_or(
            ProtocolError::TruncatedFrame {
                context: "request",
            },
        )?;
        if !buf.is_empty() {
            return Err(ProtocolError::MalformedLine {
                line: line::lossy(&buf),
            });
        }
        Ok(request)
    }

    /// Builds a single-line request such as `Argument -r1.2` or `co`.
    pub fn new(name: &str, argument: Option<&str>) -> Result<Self, ProtocolError> {
        let mut raw = BytesMut::with_capacity(name.len() + argument.map_or(0, str::len) + 2);
        raw.put_slice(name.as_bytes());
        if let Some(argument) = argument {
            raw.put_u8(b' ');
            raw.put_slice(argument.as_bytes());
        }
        raw.put_u8(b'\n');
        Self::parse(&raw)
    }

    /// Table entry for the keyword.
    #[must_use]
    pub const fn spec(&self) -> &'static RequestSpec {
        self.spec
    }

    /// Request keyword.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.spec.name()
    }

    /// Effect on server state.
    #[must_use]
    pub const fn effect(&self) -> RequestEffect {
        self.spec.effect()
    }

    /// Text following the keyword on the first line.
    #[must_use]
    pub fn argument(&self) -> &[u8] {
        self.line(0).map_or(&[][..], |first| line::split_keyword(first).1)
    }

    /// [`Request::argument`] decoded lossily.
    #[must_use]
    pub fn argument_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.argument())
    }

    /// Header line `index` without its terminator; line 0 holds the keyword.
    #[must_use]
    pub fn line(&self, index: usize) -> Option<&[u8]> {
        line::header_lines(&self.raw, self.header_end)
            .nth(index)
            .map(line::strip_newline)
    }

    /// Contents of the file transmission, if the request carries one.
    #[must_use]
    pub fn file(&self) -> Option<&[u8]> {
        self.spec.carries_file().then(|| &self.raw[self.header_end..])
    }

    /// Wire bytes of the frame.
    #[must_use]
    pub const fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Returns a copy with header line `index` replaced.
    #[must_use]
    pub fn with_line(&self, index: usize, replacement: &[u8]) -> Self {
        let (raw, header_end) = line::replace_line(&self.raw, self.header_end, index, replacement);
        Self {
            spec: self.spec,
            raw,
            header_end,
        }
    }

    /// Returns a copy with a different argument on the keyword line.
    #[must_use]
    pub fn with_argument(&self, argument: &[u8]) -> Self {
        let mut first = Vec::with_capacity(self.name().len() + argument.len() + 1);
        first.extend_from_slice(self.name().as_bytes());
        first.push(b' ');
        first.extend_from_slice(argument);
        self.with_line(0, &first)
    }
}

fn spec_for_line(first: &[u8]) -> Result<&'static RequestSpec, ProtocolError> {
    let (keyword, _) = line::split_keyword(first);
    if keyword.is_empty() {
        return Err(ProtocolError::MalformedLine {
            line: line::lossy(first),
        });
    }
    lookup_request(keyword).ok_or_else(|| ProtocolError::UnknownRequest {
        keyword: line::lossy(keyword),
    })
}

/// A command together with the argument requests that precede it.
///
/// The last request, the terminator, is a command, a stream switch or a
/// session directive; every earlier request accumulates state for it. A
/// session directive always forms a command of its own.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Command {
    requests: Vec<Request>,
}

impl Command {
    /// Groups requests into a command, checking the terminator rules.
    #[must_use]
    pub fn from_requests(requests: Vec<Request>) -> Option<Self> {
        let (last, rest) = requests.split_last()?;
        let valid = match last.effect() {
            RequestEffect::Accumulate => false,
            RequestEffect::SessionDirective => rest.is_empty(),
            RequestEffect::Command | RequestEffect::StreamSwitch => rest
                .iter()
                .all(|request| request.effect() == RequestEffect::Accumulate),
        };
        valid.then_some(Self { requests })
    }

    /// Parses a byte sequence holding exactly one command.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut buf = BytesMut::from(bytes);
        let mut requests = Vec::new();
        while !buf.is_empty() {
            let request = Request::decode(&mut buf, Limits::default())?.ok_or(
                ProtocolError::TruncatedFrame {
                    context: "command",
                },
            )?;
            requests.push(request);
        }
        Self::from_requests(requests).ok_or_else(|| ProtocolError::MalformedLine {
            line: line::lossy(bytes),
        })
    }

    pub(crate) const fn from_parts_unchecked(requests: Vec<Request>) -> Self {
        Self { requests }
    }

    /// The request that ends the command.
    #[must_use]
    pub fn terminator(&self) -> &Request {
        // Constructors guarantee at least one request.
        &self.requests[self.requests.len() - 1]
    }

    /// Keyword of the terminator.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.terminator().name()
    }

    /// Every request in wire order.
    #[must_use]
    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    /// Reports whether the command is a lone session directive.
    #[must_use]
    pub fn is_directive(&self) -> bool {
        self.terminator().effect() == RequestEffect::SessionDirective
    }

    /// Reports whether the server answers with a response stream.
    #[must_use]
    pub fn expects_response(&self) -> bool {
        self.terminator().spec().expects_response()
    }

    /// Reports whether the command switches the connection to an opaque stream.
    #[must_use]
    pub fn switches_stream(&self) -> bool {
        self.terminator().spec().switches_stream()
    }

    /// Reports whether any request in the command uses keyword `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.requests.iter().any(|request| request.name() == name)
    }

    /// Command arguments with `Argumentx` continuations joined by newlines.
    #[must_use]
    pub fn arguments(&self) -> Vec<String> {
        let mut arguments: Vec<String> = Vec::new();
        for request in &self.requests {
            match request.name() {
                "Argument" => arguments.push(request.argument_text().into_owned()),
                "Argumentx" => {
                    if let Some(last) = arguments.last_mut() {
                        last.push('\n');
                        last.push_str(&request.argument_text());
                    }
                }
                _ => {}
            }
        }
        arguments
    }

    /// Repository paths named by the command's `Directory` requests.
    pub fn repositories(&self) -> impl Iterator<Item = Cow<'_, str>> {
        self.requests
            .iter()
            .filter(|request| request.name() == "Directory")
            .filter_map(|request| request.line(1).map(String::from_utf8_lossy))
    }

    /// Short human readable form for logs, such as `co -r1.2 module`.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut summary = String::from(self.name());
        if self.is_directive() {
            summary.push(' ');
            summary.push_str(&self.terminator().argument_text());
            return summary;
        }
        for argument in self.arguments() {
            summary.push(' ');
            summary.push_str(argument.lines().next().unwrap_or_default());
        }
        summary
    }

    /// Total wire size of the command.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.requests.iter().map(|request| request.raw().len()).sum()
    }

    /// Appends the wire form of the command to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        for request in &self.requests {
            dst.put_slice(request.raw());
        }
    }
}
