//! Server responses.

mod table;

use std::borrow::Cow;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::line::{self, Limits};

pub use table::{ResponseKind, ResponseSpec, lookup_response};
use table::UNKNOWN_RESPONSE;

/// How a response stream ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Terminal<'a> {
    /// `ok`.
    Ok,
    /// `error <code> <text>`; either part may be empty.
    Error {
        /// Errno style code.
        code: Cow<'a, str>,
        /// Message text.
        text: Cow<'a, str>,
    },
}

/// One response frame exactly as the server sent it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Response {
    spec: &'static ResponseSpec,
    raw: Bytes,
    header_end: usize,
}

impl Response {
    pub(crate) fn decode(src: &mut BytesMut, limits: Limits) -> Result<Option<Self>, ProtocolError> {
        let Some(first) = line::line_len(src, limits.line)? else {
            return Ok(None);
        };
        let (keyword, _) = line::split_keyword(&src[..first]);
        // Servers newer than this table still relay, one line at a time.
        let spec = lookup_response(keyword).unwrap_or(&UNKNOWN_RESPONSE);
        let Some(extent) = line::measure(src, spec.shape(), limits, "response")? else {
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

    /// Parses exactly one complete response frame.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut buf = BytesMut::from(bytes);
        let response = Self::decode(&mut buf, Limits::default())?.ok_or(
            ProtocolError::TruncatedFrame {
                context: "response",
            },
        )?;
        if !buf.is_empty() {
            return Err(ProtocolError::MalformedLine {
                line: line::lossy(&buf),
            });
        }
        Ok(response)
    }

    fn single_line(keyword: &'static str, rest: &[&str]) -> Self {
        let mut raw = BytesMut::with_capacity(keyword.len() + rest.iter().map(|p| p.len() + 1).sum::<usize>() + 1);
        raw.put_slice(keyword.as_bytes());
        for part in rest {
            raw.put_u8(b' ');
            raw.put_slice(part.as_bytes());
        }
        raw.put_u8(b'\n');
        let header_end = raw.len();
        Self {
            spec: lookup_response(keyword.as_bytes()).unwrap_or(&UNKNOWN_RESPONSE),
            raw: raw.freeze(),
            header_end,
        }
    }

    /// The `ok` terminator.
    #[must_use]
    pub fn ok() -> Self {
        Self::single_line("ok", &[])
    }

    /// An `error` terminator with an empty code, as servers send after a
    /// command fails.
    #[must_use]
    pub fn error(text: &str) -> Self {
        Self::single_line("error", &["", text])
    }

    /// An `error` terminator with an explicit code.
    #[must_use]
    pub fn error_with_code(code: &str, text: &str) -> Self {
        Self::single_line("error", &[code, text])
    }

    /// An `E` line.
    #[must_use]
    pub fn stderr(text: &str) -> Self {
        Self::single_line("E", &[text])
    }

    /// Table entry for the keyword.
    #[must_use]
    pub const fn spec(&self) -> &'static ResponseSpec {
        self.spec
    }

    /// Response keyword as sent, including keywords missing from the table.
    #[must_use]
    pub fn name(&self) -> &str {
        if !self.spec.name().is_empty() {
            return self.spec.name();
        }
        self.line(0)
            .map(|first| line::split_keyword(first).0)
            .and_then(|keyword| std::str::from_utf8(keyword).ok())
            .unwrap_or_default()
    }

    /// Role in the stream.
    #[must_use]
    pub const fn kind(&self) -> ResponseKind {
        self.spec.kind()
    }

    /// Reports whether this response ends the command's response stream.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.spec.is_terminal()
    }

    /// Decoded terminator, if this is one.
    #[must_use]
    pub fn terminal(&self) -> Option<Terminal<'_>> {
        match self.kind() {
            ResponseKind::Ok => Some(Terminal::Ok),
            ResponseKind::Error => {
                let argument = self.argument();
                let (code, text) = match memchr::memchr(b' ', argument) {
                    Some(index) => (&argument[..index], &argument[index + 1..]),
                    None => (argument, &[][..]),
                };
                Some(Terminal::Error {
                    code: String::from_utf8_lossy(code),
                    text: String::from_utf8_lossy(text),
                })
            }
            _ => None,
        }
    }

    /// Text following the keyword on the first line.
    #[must_use]
    pub fn argument(&self) -> &[u8] {
        self.line(0).map_or(&[][..], |first| line::split_keyword(first).1)
    }

    /// [`Response::argument`] decoded lossily.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.argument())
    }

    /// Header line `index` without its terminator.
    #[must_use]
    pub fn line(&self, index: usize) -> Option<&[u8]> {
        line::header_lines(&self.raw, self.header_end)
            .nth(index)
            .map(line::strip_newline)
    }

    /// Repository path on header line 1 of path-bearing responses.
    #[must_use]
    pub fn repository(&self) -> Option<&[u8]> {
        if self.spec.names_repository() {
            self.line(1)
        } else {
            None
        }
    }

    /// File transmission contents, if any.
    #[must_use]
    pub fn file(&self) -> Option<&[u8]> {
        self.spec.carries_file().then(|| &self.raw[self.header_end..])
    }

    /// Request names listed by a `Valid-requests` response.
    #[must_use]
    pub fn valid_requests(&self) -> Option<Vec<String>> {
        (self.kind() == ResponseKind::ValidRequests).then(|| {
            self.text()
                .split_ascii_whitespace()
                .map(str::to_owned)
                .collect()
        })
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
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Vec<Response> {
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(response) = Response::decode(&mut buf, Limits::default()).unwrap() {
            out.push(response);
        }
        assert!(buf.is_empty());
        out
    }

    #[test]
    fn updated_file_containing_ok_is_not_terminal() {
        let input = b"Updated mod/\n/cvsroot/mod/a.txt\n/a.txt/1.3///\nu=rw,g=r,o=r\n6\nok\nok\nok\n";
        let responses = decode_all(input);
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].name(), "Updated");
        assert!(!responses[0].is_terminal());
        assert_eq!(responses[0].file(), Some(&b"ok\nok\n"[..]));
        assert_eq!(responses[0].repository(), Some(&b"/cvsroot/mod/a.txt"[..]));
        assert_eq!(responses[1].terminal(), Some(Terminal::Ok));
    }

    #[test]
    fn error_terminal_splits_code_and_text() {
        let response = Response::parse(b"error 0 cannot open lock file\n").unwrap();
        assert_eq!(
            response.terminal(),
            Some(Terminal::Error {
                code: "0".into(),
                text: "cannot open lock file".into()
            })
        );

        let bare = Response::parse(b"error  \n").unwrap();
        assert_eq!(
            bare.terminal(),
            Some(Terminal::Error {
                code: "".into(),
                text: "".into()
            })
        );
    }

    #[test]
    fn constructors_match_wire_format() {
        assert_eq!(&Response::ok().raw()[..], b"ok\n");
        assert_eq!(&Response::error("lost").raw()[..], b"error  lost\n");
        assert_eq!(&Response::error_with_code("0", "down").raw()[..], b"error 0 down\n");
        assert_eq!(&Response::stderr("hi").raw()[..], b"E hi\n");
        assert!(Response::error("x").is_terminal());
    }

    #[test]
    fn unknown_keywords_decode_as_single_lines() {
        let responses = decode_all(b"Future-thing a b\nM hello\n");
        assert_eq!(responses[0].name(), "Future-thing");
        assert_eq!(responses[0].kind(), ResponseKind::Other);
        assert_eq!(responses[1].kind(), ResponseKind::Stdout);
    }

    #[test]
    fn mbinary_carries_file() {
        let responses = decode_all(b"Mbinary\n3\n\x00\x01\x02ok\n");
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].file(), Some(&[0u8, 1, 2][..]));
    }

    #[test]
    fn template_has_one_extra_line_and_file() {
        let responses = decode_all(b"Template d/\n/r/d/\n2\nhiok\n");
        assert_eq!(responses[0].file(), Some(&b"hi"[..]));
        assert_eq!(responses[1].kind(), ResponseKind::Ok);
    }

    #[test]
    fn valid_requests_lists_names() {
        let response = Response::parse(b"Valid-requests Root Directory co update\n").unwrap();
        assert_eq!(
            response.valid_requests().unwrap(),
            vec!["Root", "Directory", "co", "update"]
        );
        assert_eq!(Response::ok().valid_requests(), None);
    }

    #[test]
    fn checked_in_spans_three_lines() {
        let responses = decode_all(b"Checked-in ./\n/cvsroot/m/f\n/f/1.2///\nok\n");
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].line(2), Some(&b"/f/1.2///"[..]));
    }
}
