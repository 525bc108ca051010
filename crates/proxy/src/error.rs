//! crates/proxy/src/error.rs
//!
//! Failure taxonomy for proxy sessions.
//!
//! Every error a session can hit maps onto one [`ProxyError`] variant. The
//! variant decides what happens next: local failures fall back to the
//! remote master, everything else ends the session. [`ProxyError::client_message`]
//! supplies the protocol-level text the client sees, which never includes
//! internal detail such as socket errors.

use std::fmt;
use std::io;
use std::time::Duration;

use protocol::{AuthReply, ProtocolError};
use thiserror::Error;

/// Which upstream a link or failure belongs to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum UpstreamKind {
    /// The local repository mirror.
    Local,
    /// The authoritative remote master.
    Remote,
}

impl UpstreamKind {
    /// Lowercase label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for UpstreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side of the session that produced malformed protocol data.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Origin {
    /// The connected CVS client.
    Client,
    /// One of the upstream servers.
    Upstream(UpstreamKind),
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => f.write_str("client"),
            Self::Upstream(kind) => write!(f, "{kind} upstream"),
        }
    }
}

/// Errors raised while proxying a session.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// A frame violated the pserver grammar.
    #[error("malformed protocol data from {origin}: {source}")]
    MalformedProtocolData {
        /// Who sent the frame.
        origin: Origin,
        /// The codec's diagnosis.
        #[source]
        source: ProtocolError,
    },
    /// An upstream could not be reached or dropped the connection.
    #[error("{kind} upstream {endpoint} unavailable: {source}")]
    UpstreamUnavailable {
        /// Affected upstream.
        kind: UpstreamKind,
        /// `host:port` of the upstream.
        endpoint: String,
        /// Underlying transport failure.
        #[source]
        source: io::Error,
    },
    /// An upstream refused the session's credentials.
    #[error("{kind} upstream rejected credentials for user '{user}'")]
    UpstreamAuthRejected {
        /// Affected upstream.
        kind: UpstreamKind,
        /// User name that was refused.
        user: String,
        /// The upstream's verdict, relayed verbatim to the client.
        reply: AuthReply,
    },
    /// The mirror is behind the master for this command.
    #[error("local mirror is stale for '{command}': {detail}")]
    LocalStale {
        /// Summary of the command.
        command: String,
        /// What gave the staleness away.
        detail: String,
    },
    /// The mirror does not carry what the command asked for.
    #[error("local mirror cannot serve '{command}': {detail}")]
    LocalNotFound {
        /// Summary of the command.
        command: String,
        /// The mirror's complaint.
        detail: String,
    },
    /// The mirror did not finish a response within the speculative window.
    #[error("local mirror did not answer within {0:?}")]
    LocalTimeout(Duration),
    /// The master went silent mid-response.
    #[error("remote master sent nothing for {0:?}")]
    RemoteTimeout(Duration),
    /// The client did not authenticate in time.
    #[error("client did not authenticate within {0:?}")]
    HandshakeTimeout(Duration),
    /// The client hung up.
    #[error("client disconnected")]
    ClientDisconnected,
    /// Writing to or reading from the client socket failed.
    #[error("client connection failed: {0}")]
    Client(#[source] io::Error),
}

impl ProxyError {
    /// Wraps a client-side codec failure, separating I/O from bad input.
    pub(crate) fn from_client(error: ProtocolError) -> Self {
        match error {
            ProtocolError::Io(error) => Self::Client(error),
            source => Self::MalformedProtocolData {
                origin: Origin::Client,
                source,
            },
        }
    }

    /// Wraps a codec failure on an upstream link.
    pub(crate) fn from_upstream(kind: UpstreamKind, endpoint: &str, error: ProtocolError) -> Self {
        match error {
            ProtocolError::Io(source) => Self::UpstreamUnavailable {
                kind,
                endpoint: endpoint.to_owned(),
                source,
            },
            source => Self::MalformedProtocolData {
                origin: Origin::Upstream(kind),
                source,
            },
        }
    }

    /// Builds an availability error from a plain message.
    pub(crate) fn unavailable(kind: UpstreamKind, endpoint: &str, message: &str) -> Self {
        Self::UpstreamUnavailable {
            kind,
            endpoint: endpoint.to_owned(),
            source: io::Error::other(message.to_owned()),
        }
    }

    /// Upstream the failure belongs to, if any.
    #[must_use]
    pub const fn upstream(&self) -> Option<UpstreamKind> {
        match self {
            Self::MalformedProtocolData {
                origin: Origin::Upstream(kind),
                ..
            }
            | Self::UpstreamUnavailable { kind, .. }
            | Self::UpstreamAuthRejected { kind, .. } => Some(*kind),
            Self::LocalStale { .. } | Self::LocalNotFound { .. } | Self::LocalTimeout(_) => {
                Some(UpstreamKind::Local)
            }
            Self::RemoteTimeout(_) => Some(UpstreamKind::Remote),
            Self::MalformedProtocolData { .. }
            | Self::HandshakeTimeout(_)
            | Self::ClientDisconnected
            | Self::Client(_) => None,
        }
    }

    /// Reports whether the error ends the session.
    ///
    /// Failures attributed to the local mirror are recoverable with a
    /// remote fallback. Once the proxy has committed to a local response
    /// the session treats them as fatal instead.
    #[must_use]
    pub const fn is_session_fatal(&self) -> bool {
        !matches!(self.upstream(), Some(UpstreamKind::Local))
    }

    /// Text for the protocol-level error line sent to the client.
    ///
    /// Returns `None` for client-side failures, which get no fabricated
    /// response, and for auth rejections, which relay the remote's reply.
    #[must_use]
    pub const fn client_message(&self) -> Option<&'static str> {
        match self {
            Self::MalformedProtocolData {
                origin: Origin::Client,
                ..
            }
            | Self::HandshakeTimeout(_)
            | Self::ClientDisconnected
            | Self::Client(_)
            | Self::UpstreamAuthRejected { .. } => None,
            Self::RemoteTimeout(_) => Some("cvs-proxy: timed out waiting for the repository server"),
            Self::MalformedProtocolData { .. } => {
                Some("cvs-proxy: repository server sent an unreadable response")
            }
            Self::UpstreamUnavailable { .. }
            | Self::LocalStale { .. }
            | Self::LocalNotFound { .. }
            | Self::LocalTimeout(_) => Some("cvs-proxy: repository server unavailable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_failures_are_recoverable() {
        let stale = ProxyError::LocalStale {
            command: "co module-A".into(),
            detail: "no such tag".into(),
        };
        assert!(!stale.is_session_fatal());
        assert!(!ProxyError::LocalTimeout(Duration::from_millis(10)).is_session_fatal());
        assert!(!ProxyError::unavailable(UpstreamKind::Local, "mirror:2401", "refused").is_session_fatal());
    }

    #[test]
    fn remote_and_client_failures_are_fatal() {
        assert!(ProxyError::RemoteTimeout(Duration::from_secs(1)).is_session_fatal());
        assert!(ProxyError::ClientDisconnected.is_session_fatal());
        assert!(ProxyError::unavailable(UpstreamKind::Remote, "master:2401", "refused").is_session_fatal());
    }

    #[test]
    fn client_codec_errors_split_io_from_malformed() {
        let io = ProxyError::from_client(ProtocolError::Io(io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(matches!(io, ProxyError::Client(_)));

        let malformed = ProxyError::from_client(ProtocolError::UnknownRequest {
            keyword: "Bogus".into(),
        });
        assert!(matches!(
            malformed,
            ProxyError::MalformedProtocolData {
                origin: Origin::Client,
                ..
            }
        ));
        assert_eq!(malformed.client_message(), None);
    }

    #[test]
    fn client_message_hides_internal_detail() {
        let error = ProxyError::unavailable(UpstreamKind::Remote, "master:2401", "connection refused");
        let message = error.client_message().unwrap();
        assert!(!message.contains("refused"));
        assert!(!message.contains("master"));
        assert!(error.to_string().contains("master:2401"));
    }

    #[test]
    fn upstream_malformed_data_names_the_upstream() {
        let error = ProxyError::from_upstream(
            UpstreamKind::Remote,
            "master:2401",
            ProtocolError::LineTooLong { limit: 8 },
        );
        assert_eq!(error.upstream(), Some(UpstreamKind::Remote));
        assert!(error.to_string().starts_with("malformed protocol data from remote upstream"));
    }
}
