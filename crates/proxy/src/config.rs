//! crates/proxy/src/config.rs
//!
//! Proxy configuration.
//!
//! [`ProxyConfig`] is immutable once built and shared by every session
//! through an [`Arc`](std::sync::Arc). Values come from three layers, each
//! overriding the previous one: built-in defaults, an optional
//! [`ConfigFile`], and command-line flags applied to the
//! [`ProxyConfigBuilder`].

mod endpoint;
mod error;
mod file;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

pub use endpoint::{DEFAULT_PSERVER_PORT, Endpoint, EndpointError};
pub use error::{ConfigError, ConfigErrorKind};
pub use file::ConfigFile;

use crate::error::UpstreamKind;
use crate::service;

/// Speculative window for a local mirror response.
pub const DEFAULT_LOCAL_TIMEOUT: Duration = Duration::from_millis(10_000);
/// Bound on connecting to and authenticating with an upstream.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Longest silence tolerated from the remote master mid-response.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(300);
/// Time a client has to send its authentication block.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
/// Bytes of local output held back before the proxy commits to it.
pub const DEFAULT_SPECULATIVE_BUFFER_LIMIT: usize = 32 * 1024 * 1024;
/// Concurrent client sessions.
pub const DEFAULT_MAX_CONNECTIONS: usize = 200;
/// Largest single file transmission accepted from either side.
pub const DEFAULT_MAX_FILE_SIZE: usize = 256 * 1024 * 1024;
/// Largest command a client may send, file transmissions included.
pub const DEFAULT_MAX_COMMAND_SIZE: usize = 512 * 1024 * 1024;

/// Login used against an upstream in place of the client's.
#[derive(Clone, Eq, PartialEq)]
pub struct Credentials {
    user: String,
    password: String,
}

impl Credentials {
    /// Creates credentials from a user name and clear-text password.
    #[must_use]
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// User name.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Clear-text password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where one upstream lives and how to log in to it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UpstreamConfig {
    endpoint: Endpoint,
    credentials: Option<Credentials>,
}

impl UpstreamConfig {
    /// Creates an upstream that reuses the client's login.
    #[must_use]
    pub const fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            credentials: None,
        }
    }

    /// Sets the login used when credentials are not passed through.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Network location.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Configured login, if any.
    #[must_use]
    pub const fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }
}

/// Validated settings shared by the acceptor and every session.
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    listen_address: IpAddr,
    listen_port: Option<u16>,
    local: Option<UpstreamConfig>,
    remote: UpstreamConfig,
    local_timeout: Duration,
    connect_timeout: Duration,
    remote_timeout: Duration,
    handshake_timeout: Duration,
    credentials_passthrough: bool,
    speculative_buffer_limit: usize,
    max_connections: usize,
    max_file_size: usize,
    max_command_size: usize,
}

impl ProxyConfig {
    /// Starts a builder with every setting at its default.
    #[must_use]
    pub fn builder() -> ProxyConfigBuilder {
        ProxyConfigBuilder::default()
    }

    /// Address the listener binds.
    #[must_use]
    pub const fn listen_address(&self) -> IpAddr {
        self.listen_address
    }

    /// Explicitly configured listen port.
    #[must_use]
    pub const fn listen_port(&self) -> Option<u16> {
        self.listen_port
    }

    /// Socket address to bind, resolving the `cvspserver` service when no
    /// port was configured.
    #[must_use]
    pub fn bind_address(&self) -> SocketAddr {
        let port = self.listen_port.unwrap_or_else(service::pserver_port);
        SocketAddr::new(self.listen_address, port)
    }

    /// Upstream settings for `kind`. `None` only for an unconfigured mirror.
    #[must_use]
    pub const fn upstream(&self, kind: UpstreamKind) -> Option<&UpstreamConfig> {
        match kind {
            UpstreamKind::Local => self.local.as_ref(),
            UpstreamKind::Remote => Some(&self.remote),
        }
    }

    /// The local mirror, if configured.
    #[must_use]
    pub const fn local(&self) -> Option<&UpstreamConfig> {
        self.local.as_ref()
    }

    /// The remote master.
    #[must_use]
    pub const fn remote(&self) -> &UpstreamConfig {
        &self.remote
    }

    /// Speculative window for local responses.
    #[must_use]
    pub const fn local_timeout(&self) -> Duration {
        self.local_timeout
    }

    /// Bound on connecting to and authenticating with an upstream.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Inactivity limit while relaying from the remote master.
    #[must_use]
    pub const fn remote_timeout(&self) -> Duration {
        self.remote_timeout
    }

    /// Time a client has to authenticate.
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Whether the client's auth block is relayed unchanged to upstreams.
    #[must_use]
    pub const fn credentials_passthrough(&self) -> bool {
        self.credentials_passthrough
    }

    /// Bytes of local output buffered before committing to it.
    #[must_use]
    pub const fn speculative_buffer_limit(&self) -> usize {
        self.speculative_buffer_limit
    }

    /// Maximum concurrent sessions.
    #[must_use]
    pub const fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Cap on one file transmission, in either direction.
    #[must_use]
    pub const fn max_file_size(&self) -> usize {
        self.max_file_size
    }

    /// Cap on the bytes of one client command.
    #[must_use]
    pub const fn max_command_size(&self) -> usize {
        self.max_command_size
    }
}

/// Builder for [`ProxyConfig`].
///
/// ```
/// use std::time::Duration;
/// use proxy::{Endpoint, ProxyConfig};
///
/// let config = ProxyConfig::builder()
///     .remote(Endpoint::new("master.example.org", 2401))
///     .local(Endpoint::new("127.0.0.1", 2402))
///     .local_timeout(Duration::from_millis(250))
///     .build()
///     .unwrap();
/// assert_eq!(config.local_timeout(), Duration::from_millis(250));
/// assert!(config.credentials_passthrough());
/// ```
#[derive(Clone, Debug, Default)]
pub struct ProxyConfigBuilder {
    listen_address: Option<IpAddr>,
    listen_port: Option<u16>,
    local: Option<Endpoint>,
    local_credentials: Option<Credentials>,
    remote: Option<Endpoint>,
    remote_credentials: Option<Credentials>,
    local_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    remote_timeout: Option<Duration>,
    handshake_timeout: Option<Duration>,
    credentials_passthrough: Option<bool>,
    speculative_buffer_limit: Option<usize>,
    max_connections: Option<usize>,
    max_file_size: Option<usize>,
    max_command_size: Option<usize>,
}

impl ProxyConfigBuilder {
    /// Address to listen on. Defaults to all IPv4 interfaces.
    pub fn listen_address(mut self, address: IpAddr) -> Self {
        self.listen_address = Some(address);
        self
    }

    /// Port to listen on. Port 0 asks the OS for any free port.
    pub fn listen_port(mut self, port: u16) -> Self {
        self.listen_port = Some(port);
        self
    }

    /// Local mirror endpoint.
    pub fn local(mut self, endpoint: Endpoint) -> Self {
        self.local = Some(endpoint);
        self
    }

    /// Login for the local mirror.
    pub fn local_credentials(mut self, credentials: Credentials) -> Self {
        self.local_credentials = Some(credentials);
        self
    }

    /// Remote master endpoint. Required.
    pub fn remote(mut self, endpoint: Endpoint) -> Self {
        self.remote = Some(endpoint);
        self
    }

    /// Login for the remote master.
    pub fn remote_credentials(mut self, credentials: Credentials) -> Self {
        self.remote_credentials = Some(credentials);
        self
    }

    /// Speculative window for local responses.
    pub fn local_timeout(mut self, timeout: Duration) -> Self {
        self.local_timeout = Some(timeout);
        self
    }

    /// Upstream connect and auth bound.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Remote inactivity limit.
    pub fn remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = Some(timeout);
        self
    }

    /// Client authentication deadline.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    /// Relay the client's auth block unchanged.
    pub fn credentials_passthrough(mut self, enabled: bool) -> Self {
        self.credentials_passthrough = Some(enabled);
        self
    }

    /// Local output held back before committing.
    pub fn speculative_buffer_limit(mut self, bytes: usize) -> Self {
        self.speculative_buffer_limit = Some(bytes);
        self
    }

    /// Concurrent session limit.
    pub fn max_connections(mut self, limit: usize) -> Self {
        self.max_connections = Some(limit);
        self
    }

    /// Largest file transmission accepted.
    pub fn max_file_size(mut self, bytes: usize) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    /// Largest client command accepted.
    pub fn max_command_size(mut self, bytes: usize) -> Self {
        self.max_command_size = Some(bytes);
        self
    }

    /// Validates the settings.
    pub fn build(self) -> Result<ProxyConfig, ConfigError> {
        let remote = self
            .remote
            .ok_or_else(|| ConfigError::validation_error("no remote repository endpoint configured"))?;

        let local_timeout = self.local_timeout.unwrap_or(DEFAULT_LOCAL_TIMEOUT);
        let connect_timeout = self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let remote_timeout = self.remote_timeout.unwrap_or(DEFAULT_REMOTE_TIMEOUT);
        let handshake_timeout = self.handshake_timeout.unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT);
        for (name, value) in [
            ("local timeout", local_timeout),
            ("connect timeout", connect_timeout),
            ("remote timeout", remote_timeout),
            ("handshake timeout", handshake_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::validation_error(format!("{name} must be positive")));
            }
        }

        let max_connections = self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS);
        if max_connections == 0 {
            return Err(ConfigError::validation_error("max connections must be at least 1"));
        }
        let speculative_buffer_limit = self
            .speculative_buffer_limit
            .unwrap_or(DEFAULT_SPECULATIVE_BUFFER_LIMIT);
        if speculative_buffer_limit == 0 {
            return Err(ConfigError::validation_error("speculative buffer must be at least 1 byte"));
        }

        let max_file_size = self.max_file_size.unwrap_or(DEFAULT_MAX_FILE_SIZE);
        let max_command_size = self.max_command_size.unwrap_or(DEFAULT_MAX_COMMAND_SIZE);
        if max_file_size == 0 || max_command_size == 0 {
            return Err(ConfigError::validation_error("size limits must be at least 1 byte"));
        }
        if max_command_size < max_file_size {
            return Err(ConfigError::validation_error(
                "max command size must not be smaller than max file size",
            ));
        }

        let with_credentials = |endpoint, credentials: Option<Credentials>| {
            let upstream = UpstreamConfig::new(endpoint);
            match credentials {
                Some(credentials) => upstream.with_credentials(credentials),
                None => upstream,
            }
        };

        Ok(ProxyConfig {
            listen_address: self
                .listen_address
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            listen_port: self.listen_port,
            local: self
                .local
                .map(|endpoint| with_credentials(endpoint, self.local_credentials)),
            remote: with_credentials(remote, self.remote_credentials),
            local_timeout,
            connect_timeout,
            remote_timeout,
            handshake_timeout,
            credentials_passthrough: self.credentials_passthrough.unwrap_or(true),
            speculative_buffer_limit,
            max_connections,
            max_file_size,
            max_command_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> Endpoint {
        Endpoint::new("master.example.org", 2401)
    }

    #[test]
    fn defaults_apply() {
        let config = ProxyConfig::builder().remote(remote()).build().unwrap();
        assert_eq!(config.local_timeout(), DEFAULT_LOCAL_TIMEOUT);
        assert_eq!(config.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.remote_timeout(), DEFAULT_REMOTE_TIMEOUT);
        assert_eq!(config.max_connections(), DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.speculative_buffer_limit(), DEFAULT_SPECULATIVE_BUFFER_LIMIT);
        assert_eq!(config.max_file_size(), DEFAULT_MAX_FILE_SIZE);
        assert_eq!(config.max_command_size(), DEFAULT_MAX_COMMAND_SIZE);
        assert!(config.credentials_passthrough());
        assert!(config.local().is_none());
        assert_eq!(config.listen_address(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.listen_port(), None);
    }

    #[test]
    fn remote_is_required() {
        let error = ProxyConfig::builder()
            .local(Endpoint::new("mirror", 2401))
            .build()
            .unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::Validation);
        assert!(error.message().contains("remote"));
    }

    #[test]
    fn zero_values_are_rejected() {
        let error = ProxyConfig::builder()
            .remote(remote())
            .local_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert_eq!(error.message(), "local timeout must be positive");

        assert!(
            ProxyConfig::builder()
                .remote(remote())
                .max_connections(0)
                .build()
                .is_err()
        );
    }

    #[test]
    fn command_size_must_cover_a_file() {
        let error = ProxyConfig::builder()
            .remote(remote())
            .max_file_size(4096)
            .max_command_size(1024)
            .build()
            .unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::Validation);
        assert!(error.message().contains("max command size"));
    }

    #[test]
    fn credentials_attach_to_their_upstream() {
        let config = ProxyConfig::builder()
            .remote(remote())
            .local(Endpoint::new("mirror", 2402))
            .local_credentials(Credentials::new("reader", "secret"))
            .build()
            .unwrap();
        let local = config.upstream(UpstreamKind::Local).unwrap();
        assert_eq!(local.credentials().map(Credentials::user), Some("reader"));
        assert!(config.remote().credentials().is_none());
    }

    #[test]
    fn explicit_port_is_used_for_binding() {
        let config = ProxyConfig::builder()
            .remote(remote())
            .listen_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .listen_port(3401)
            .build()
            .unwrap();
        assert_eq!(config.bind_address(), "127.0.0.1:3401".parse().unwrap());
    }

    #[test]
    fn credentials_debug_hides_password() {
        let rendered = format!("{:?}", Credentials::new("anon", "hunter2"));
        assert!(rendered.contains("anon"));
        assert!(!rendered.contains("hunter2"));
    }
}
