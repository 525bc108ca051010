//! crates/protocol/src/error.rs
//!
//! Error type shared by every decoder in the crate.

use std::io;

use thiserror::Error;

/// Errors produced while framing or parsing the pserver protocol.
///
/// Every variant except [`ProtocolError::Io`] describes input that violates
/// the protocol grammar. Callers never try to repair such input; the
/// connection that produced it is torn down instead.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A request line started with a keyword the protocol does not define.
    #[error("unknown request keyword {keyword:?}")]
    UnknownRequest {
        /// The offending keyword, lossily decoded.
        keyword: String,
    },
    /// The authentication block did not follow the expected layout.
    #[error("malformed authentication handshake: expected {expected}, found {found:?}")]
    MalformedAuth {
        /// What the decoder was waiting for.
        expected: &'static str,
        /// The line that arrived instead.
        found: String,
    },
    /// The client asked for an authentication method the proxy cannot relay.
    #[error("unsupported authentication method {method:?}")]
    UnsupportedAuth {
        /// The `BEGIN ...` line naming the method.
        method: String,
    },
    /// A line could not be interpreted as a request or response.
    #[error("malformed protocol line {line:?}")]
    MalformedLine {
        /// The offending line, lossily decoded.
        line: String,
    },
    /// A file transmission length line was not a decimal byte count.
    #[error("invalid file length {field:?} in {context}")]
    InvalidLength {
        /// Frame being decoded.
        context: &'static str,
        /// Text of the length line.
        field: String,
    },
    /// No line terminator appeared within the accepted line length.
    #[error("line exceeds {limit} bytes without a terminator")]
    LineTooLong {
        /// Maximum accepted line length.
        limit: usize,
    },
    /// A file transmission announced more bytes than the codec accepts.
    #[error("file transmission of {length} bytes exceeds limit of {limit}")]
    PayloadTooLarge {
        /// Announced length.
        length: u64,
        /// Configured limit.
        limit: usize,
    },
    /// Requests buffered for one command outgrew the codec's limit.
    #[error("command of at least {length} bytes exceeds limit of {limit}")]
    CommandTooLarge {
        /// Bytes buffered when the limit was crossed.
        length: usize,
        /// Configured limit.
        limit: usize,
    },
    /// The stream ended in the middle of a frame.
    #[error("stream ended inside {context}")]
    TruncatedFrame {
        /// Frame being decoded when the stream ended.
        context: &'static str,
    },
    /// Underlying transport failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Reports whether the error describes malformed protocol data rather than
    /// a transport failure.
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}

impl From<ProtocolError> for io::Error {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(inner) => inner,
            other => Self::new(io::ErrorKind::InvalidData, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_not_malformed() {
        let err = ProtocolError::from(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(!err.is_malformed());
    }

    #[test]
    fn grammar_errors_convert_to_invalid_data() {
        let err = ProtocolError::UnknownRequest {
            keyword: "frobnicate".to_owned(),
        };
        assert!(err.is_malformed());
        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidData);
        assert!(io_err.to_string().contains("frobnicate"));
    }

    #[test]
    fn io_conversion_unwraps_transport_errors() {
        let err = ProtocolError::Io(io::Error::from(io::ErrorKind::ConnectionReset));
        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::ConnectionReset);
    }
}
