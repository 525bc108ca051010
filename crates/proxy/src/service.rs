//! Listen port lookup for the `cvspserver` service.

use dns_lookup::{AddrInfoHints, SockType, getaddrinfo};
use tracing::debug;

use crate::config::DEFAULT_PSERVER_PORT;

/// Service name registered for the CVS password server.
pub const PSERVER_SERVICE: &str = "cvspserver";

/// Port of the `cvspserver` service, falling back to 2401 when the
/// service database has no entry.
#[must_use]
pub fn pserver_port() -> u16 {
    resolve_service_port(PSERVER_SERVICE).unwrap_or_else(|| {
        debug!(
            service = PSERVER_SERVICE,
            port = DEFAULT_PSERVER_PORT,
            "service not in the services database; using the default port"
        );
        DEFAULT_PSERVER_PORT
    })
}

/// Looks up the TCP port of a named service.
#[must_use]
pub fn resolve_service_port(service: &str) -> Option<u16> {
    let hints = AddrInfoHints {
        socktype: SockType::Stream.into(),
        ..AddrInfoHints::default()
    };
    getaddrinfo(None, Some(service), Some(hints))
        .ok()?
        .filter_map(Result::ok)
        .map(|info| info.sockaddr.port())
        .find(|port| *port != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_service_has_no_port() {
        assert_eq!(resolve_service_port("cvs-proxy-no-such-service"), None);
    }

    #[test]
    fn numeric_service_resolves_to_itself() {
        assert_eq!(resolve_service_port("2402"), Some(2402));
    }

    #[test]
    fn pserver_port_is_never_zero() {
        assert_ne!(pserver_port(), 0);
    }
}
