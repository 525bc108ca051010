//! Upstream endpoint addresses of the form `host[:port][/root]`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Port a pserver listens on when none is given.
pub const DEFAULT_PSERVER_PORT: u16 = 2401;

/// Network location of an upstream pserver, with an optional repository root.
///
/// ```
/// use proxy::Endpoint;
///
/// let endpoint: Endpoint = "mirror.example.org:2402/srv/cvs".parse().unwrap();
/// assert_eq!(endpoint.host(), "mirror.example.org");
/// assert_eq!(endpoint.port(), 2402);
/// assert_eq!(endpoint.root(), Some("/srv/cvs"));
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Endpoint {
    host: String,
    port: u16,
    root: Option<String>,
}

/// Reasons an endpoint string is rejected.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum EndpointError {
    /// Nothing but whitespace.
    #[error("endpoint is empty")]
    Empty,
    /// The host part is missing.
    #[error("endpoint '{0}' has no host")]
    MissingHost(String),
    /// An IPv6 literal is missing its closing bracket.
    #[error("endpoint '{0}' has an unterminated '[' in its host")]
    UnterminatedBracket(String),
    /// The port is not a number in `1..=65535`.
    #[error("endpoint port '{0}' is not a valid TCP port")]
    InvalidPort(String),
    /// Trailing characters after an IPv6 literal.
    #[error("unexpected '{0}' after the endpoint host")]
    TrailingGarbage(String),
}

impl Endpoint {
    /// Creates an endpoint without a repository root.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            root: None,
        }
    }

    /// Attaches the repository root this upstream serves.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = Some(normalize_root(&root.into()));
        self
    }

    /// Host name or address literal, without brackets.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Repository root on the upstream, if one was given.
    #[must_use]
    pub fn root(&self) -> Option<&str> {
        self.root.as_deref()
    }

    /// `host:port`, with IPv6 literals bracketed.
    #[must_use]
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())?;
        if let Some(root) = &self.root {
            f.write_str(root)?;
        }
        Ok(())
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input.is_empty() {
            return Err(EndpointError::Empty);
        }

        let (host, port, rest) = if let Some(bracketed) = input.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| EndpointError::UnterminatedBracket(input.to_owned()))?;
            let (port, rest) = match after.strip_prefix(':') {
                Some(tail) => split_root(tail),
                None if after.is_empty() || after.starts_with('/') => ("", after),
                None => return Err(EndpointError::TrailingGarbage(after.to_owned())),
            };
            (host, port, rest)
        } else {
            let (authority, rest) = split_root(input);
            match authority.split_once(':') {
                // More than one colon is a bare IPv6 literal with no port.
                Some((host, port)) if !port.contains(':') => (host, port, rest),
                _ => (authority, "", rest),
            }
        };

        if host.is_empty() {
            return Err(EndpointError::MissingHost(input.to_owned()));
        }
        let port = if port.is_empty() {
            DEFAULT_PSERVER_PORT
        } else {
            match port.parse::<u16>() {
                Ok(port) if port != 0 => port,
                _ => return Err(EndpointError::InvalidPort(port.to_owned())),
            }
        };

        let endpoint = Self::new(host, port);
        Ok(if rest.is_empty() {
            endpoint
        } else {
            endpoint.with_root(rest)
        })
    }
}

/// Splits `authority/root` at the first slash, keeping the slash on the root.
fn split_root(input: &str) -> (&str, &str) {
    input.find('/').map_or((input, ""), |index| input.split_at(index))
}

fn normalize_root(root: &str) -> String {
    match root.trim_end_matches('/') {
        "" => "/".to_owned(),
        trimmed => trimmed.to_owned(),
    }
}
