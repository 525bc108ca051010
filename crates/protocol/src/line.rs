//! crates/protocol/src/line.rs
//!
//! Line framing shared by the request and response decoders.
//!
//! Every pserver frame is a header of one or more `\n`-terminated lines,
//! optionally followed by a file transmission: a line holding the byte count
//! (prefixed with `z` when the data is compressed) and exactly that many raw
//! bytes. The helpers here measure frames without consuming input so a
//! decoder can return `Ok(None)` and resume once more bytes arrive.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Longest line accepted before a terminator must appear.
pub const MAX_LINE_LEN: usize = 1 << 20;

/// Largest file transmission accepted by default.
pub const MAX_FILE_LEN: usize = 1 << 30;

/// Largest command, arguments and file transmissions included, a client may
/// queue up by default.
pub const MAX_COMMAND_LEN: usize = 1 << 30;

/// Size limits applied while measuring frames.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Limits {
    pub(crate) line: usize,
    pub(crate) file: usize,
    pub(crate) command: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            line: MAX_LINE_LEN,
            file: MAX_FILE_LEN,
            command: MAX_COMMAND_LEN,
        }
    }
}

/// Byte offsets of a frame whose header lines are all buffered.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Extent {
    /// End of the header lines, including the file length line if any.
    pub(crate) header_end: usize,
    /// End of the whole frame. May exceed the buffered length.
    pub(crate) total: usize,
}

/// Shape of a frame as described by a request or response table entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub(crate) struct Shape {
    pub(crate) extra_lines: u8,
    pub(crate) transmission: bool,
}

/// Returns the length of the first line in `buf`, terminator included.
pub(crate) fn line_len(buf: &[u8], limit: usize) -> Result<Option<usize>, ProtocolError> {
    match memchr::memchr(b'\n', buf) {
        Some(index) if index < limit => Ok(Some(index + 1)),
        Some(_) => Err(ProtocolError::LineTooLong { limit }),
        None if buf.len() >= limit => Err(ProtocolError::LineTooLong { limit }),
        None => Ok(None),
    }
}

/// Measures a frame with the given shape at the start of `buf`.
///
/// Returns `Ok(None)` while header lines are still missing. Once the header is
/// complete the returned [`Extent`] tells the caller how many bytes the
/// whole frame needs.
pub(crate) fn measure(
    buf: &[u8],
    shape: Shape,
    limits: Limits,
    context: &'static str,
) -> Result<Option<Extent>, ProtocolError> {
    let lines = 1 + usize::from(shape.extra_lines) + usize::from(shape.transmission);
    let mut end = 0;
    let mut last_start = 0;
    for _ in 0..lines {
        let Some(len) = line_len(&buf[end..], limits.line)? else {
            return Ok(None);
        };
        last_start = end;
        end += len;
    }

    if !shape.transmission {
        return Ok(Some(Extent {
            header_end: end,
            total: end,
        }));
    }

    let length = parse_file_length(strip_newline(&buf[last_start..end]), context, limits.file)?;
    Ok(Some(Extent {
        header_end: end,
        total: end + length.len,
    }))
}

/// Parsed file transmission length line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct FileLength {
    /// Number of bytes that follow the length line.
    pub(crate) len: usize,
    /// Whether the bytes are zlib-compressed (`z` prefix).
    pub(crate) compressed: bool,
}

pub(crate) fn parse_file_length(
    text: &[u8],
    context: &'static str,
    limit: usize,
) -> Result<FileLength, ProtocolError> {
    let invalid = || ProtocolError::InvalidLength {
        context,
        field: lossy(text),
    };
    let (compressed, digits) = match text.split_first() {
        Some((b'z', rest)) => (true, rest),
        _ => (false, text),
    };
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }

    let mut value: u64 = 0;
    for digit in digits {
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(u64::from(digit - b'0')))
            .ok_or_else(invalid)?;
    }
    match usize::try_from(value) {
        Ok(len) if len <= limit => Ok(FileLength { len, compressed }),
        _ => Err(ProtocolError::PayloadTooLarge {
            length: value,
            limit,
        }),
    }
}

/// Drops the trailing `\n` of a line, if present.
pub(crate) fn strip_newline(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\n").unwrap_or(line)
}

/// Splits a header line into its keyword and argument.
///
/// The argument is everything after the first space; it is empty when the
/// line holds only a keyword.
pub(crate) fn split_keyword(line: &[u8]) -> (&[u8], &[u8]) {
    let line = strip_newline(line);
    match memchr::memchr(b' ', line) {
        Some(index) => (&line[..index], &line[index + 1..]),
        None => (line, &[]),
    }
}

pub(crate) fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Iterates over the header lines of a frame, terminators included.
pub(crate) fn header_lines(raw: &[u8], header_end: usize) -> impl Iterator<Item = &[u8]> {
    raw[..header_end].split_inclusive(|byte| *byte == b'\n')
}

/// Rebuilds a frame with header line `index` replaced by `replacement`.
///
/// `replacement` excludes the terminator. The file transmission, if any, is
/// copied unchanged. Returns the new bytes and the new header end.
pub(crate) fn replace_line(
    raw: &[u8],
    header_end: usize,
    index: usize,
    replacement: &[u8],
) -> (Bytes, usize) {
    let mut out = BytesMut::with_capacity(raw.len() + replacement.len());
    for (position, line) in header_lines(raw, header_end).enumerate() {
        if position == index {
            out.put_slice(replacement);
            out.put_u8(b'\n');
        } else {
            out.put_slice(line);
        }
    }
    let new_header_end = out.len();
    out.put_slice(&raw[header_end..]);
    (out.freeze(), new_header_end)
}
