//! crates/proxy/src/config/file.rs
//!
//! Parser for the proxy's INI-style configuration file.
//!
//! ```text
//! # global settings
//! port = 2401
//! local timeout = 5000
//!
//! [local]
//! endpoint = 127.0.0.1:2402/srv/cvs-mirror
//!
//! [remote]
//! endpoint = cvs.example.org/cvsroot
//! user = anonymous
//! password =
//! ```

use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use tracing::warn;

use super::endpoint::Endpoint;
use super::error::ConfigError;
use super::{Credentials, ProxyConfigBuilder};

/// Settings read from a configuration file. Every field is optional so
/// the command line can fill or override it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigFile {
    port: Option<u16>,
    address: Option<IpAddr>,
    max_connections: Option<usize>,
    local_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    remote_timeout: Option<Duration>,
    handshake_timeout: Option<Duration>,
    credentials_passthrough: Option<bool>,
    speculative_buffer: Option<usize>,
    max_file_size: Option<usize>,
    max_command_size: Option<usize>,
    local: SectionConfig,
    remote: SectionConfig,
}

/// One `[local]` or `[remote]` section.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct SectionConfig {
    endpoint: Option<Endpoint>,
    user: Option<String>,
    password: Option<String>,
}

impl SectionConfig {
    fn credentials(&self) -> Option<Credentials> {
        self.user
            .as_ref()
            .map(|user| Credentials::new(user.clone(), self.password.clone().unwrap_or_default()))
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
enum Section {
    Global,
    Local,
    Remote,
}

impl ConfigFile {
    /// Parses a configuration file from the given path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|error| ConfigError::io_error(path, error))?;
        Self::parse(&contents, path)
    }

    /// Parses configuration text. `path` is only used in diagnostics.
    pub fn parse(input: &str, path: &Path) -> Result<Self, ConfigError> {
        Parser::new(input, path).parse()
    }

    /// Listen port, if set.
    #[must_use]
    pub const fn port(&self) -> Option<u16> {
        self.port
    }

    /// Local mirror endpoint, if set.
    #[must_use]
    pub const fn local_endpoint(&self) -> Option<&Endpoint> {
        self.local.endpoint.as_ref()
    }

    /// Remote master endpoint, if set.
    #[must_use]
    pub const fn remote_endpoint(&self) -> Option<&Endpoint> {
        self.remote.endpoint.as_ref()
    }

    /// Seeds a builder with every value the file sets.
    pub fn into_builder(self) -> ProxyConfigBuilder {
        let mut builder = ProxyConfigBuilder::default();
        if let Some(port) = self.port {
            builder = builder.listen_port(port);
        }
        if let Some(address) = self.address {
            builder = builder.listen_address(address);
        }
        if let Some(limit) = self.max_connections {
            builder = builder.max_connections(limit);
        }
        if let Some(timeout) = self.local_timeout {
            builder = builder.local_timeout(timeout);
        }
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(timeout) = self.remote_timeout {
            builder = builder.remote_timeout(timeout);
        }
        if let Some(timeout) = self.handshake_timeout {
            builder = builder.handshake_timeout(timeout);
        }
        if let Some(enabled) = self.credentials_passthrough {
            builder = builder.credentials_passthrough(enabled);
        }
        if let Some(bytes) = self.speculative_buffer {
            builder = builder.speculative_buffer_limit(bytes);
        }
        if let Some(bytes) = self.max_file_size {
            builder = builder.max_file_size(bytes);
        }
        if let Some(bytes) = self.max_command_size {
            builder = builder.max_command_size(bytes);
        }
        if let Some(credentials) = self.local.credentials() {
            builder = builder.local_credentials(credentials);
        }
        if let Some(credentials) = self.remote.credentials() {
            builder = builder.remote_credentials(credentials);
        }
        if let Some(endpoint) = self.local.endpoint {
            builder = builder.local(endpoint);
        }
        if let Some(endpoint) = self.remote.endpoint {
            builder = builder.remote(endpoint);
        }
        builder
    }
}

struct Parser<'a> {
    input: &'a str,
    path: &'a Path,
    line_number: usize,
}

impl<'a> Parser<'a> {
    const fn new(input: &'a str, path: &'a Path) -> Self {
        Self {
            input,
            path,
            line_number: 0,
        }
    }

    fn parse(&mut self) -> Result<ConfigFile, ConfigError> {
        let mut config = ConfigFile::default();
        let mut section = Section::Global;
        let mut seen = HashMap::new();

        for line in self.input.lines() {
            self.line_number += 1;
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            if trimmed.starts_with('[') {
                section = self.parse_header(trimmed)?;
                if let Some(previous) = seen.insert(section, self.line_number) {
                    return Err(self.error(format!(
                        "duplicate section (previously defined at line {previous})"
                    )));
                }
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| self.error("expected 'key = value' format"))?;
            let key = normalize_key(key);
            let value = value.trim();

            match section {
                Section::Global => self.parse_global(&mut config, &key, value)?,
                Section::Local => self.parse_upstream(&mut config.local, &key, value)?,
                Section::Remote => self.parse_upstream(&mut config.remote, &key, value)?,
            }
        }

        Ok(config)
    }

    fn parse_header(&self, trimmed: &str) -> Result<Section, ConfigError> {
        let end = trimmed
            .find(']')
            .ok_or_else(|| self.error("unterminated section header"))?;

        let trailing = trimmed[end + 1..].trim();
        if !trailing.is_empty() && !trailing.starts_with('#') && !trailing.starts_with(';') {
            return Err(self.error("unexpected content after section header"));
        }

        match trimmed[1..end].trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Section::Local),
            "remote" => Ok(Section::Remote),
            "" => Err(self.error("section name must be non-empty")),
            other => Err(self.error(format!(
                "unknown section '{other}' (expected [local] or [remote])"
            ))),
        }
    }

    fn parse_global(&self, config: &mut ConfigFile, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "port" => {
                config.port = Some(value.parse().map_err(|_| self.error("invalid port number"))?);
            }
            "address" => {
                config.address = Some(
                    value
                        .parse()
                        .map_err(|_| self.error(format!("invalid listen address '{value}'")))?,
                );
            }
            "max connections" => {
                let limit: usize = self.parse_number(key, value)?;
                if limit == 0 {
                    return Err(self.invalid("max connections must be at least 1"));
                }
                config.max_connections = Some(limit);
            }
            "local timeout" => {
                config.local_timeout = Some(Duration::from_millis(self.parse_positive(key, value)?));
            }
            "connect timeout" => {
                config.connect_timeout = Some(Duration::from_secs(self.parse_positive(key, value)?));
            }
            "remote timeout" => {
                config.remote_timeout = Some(Duration::from_secs(self.parse_positive(key, value)?));
            }
            "handshake timeout" => {
                config.handshake_timeout = Some(Duration::from_secs(self.parse_positive(key, value)?));
            }
            "credentials passthrough" => {
                config.credentials_passthrough = Some(self.parse_bool(value)?);
            }
            "speculative buffer" => {
                config.speculative_buffer = Some(self.parse_positive::<usize>(key, value)?);
            }
            "max file size" => {
                config.max_file_size = Some(self.parse_positive::<usize>(key, value)?);
            }
            "max command size" => {
                config.max_command_size = Some(self.parse_positive::<usize>(key, value)?);
            }
            _ => self.ignore(key),
        }
        Ok(())
    }

    fn parse_upstream(&self, section: &mut SectionConfig, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "endpoint" => {
                section.endpoint = Some(value.parse().map_err(|error| self.invalid(format!("{error}")))?);
            }
            "user" => {
                if value.is_empty() {
                    return Err(self.invalid("user must not be empty"));
                }
                section.user = Some(value.to_owned());
            }
            "password" => section.password = Some(value.to_owned()),
            _ => self.ignore(key),
        }
        Ok(())
    }

    fn parse_bool(&self, value: &str) -> Result<bool, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "yes" | "true" | "1" => Ok(true),
            "no" | "false" | "0" => Ok(false),
            _ => Err(self.error(format!("invalid boolean value '{value}'"))),
        }
    }

    fn parse_number<T: std::str::FromStr>(&self, key: &str, value: &str) -> Result<T, ConfigError> {
        value
            .parse()
            .map_err(|_| self.error(format!("invalid value '{value}' for '{key}'")))
    }

    fn parse_positive<T>(&self, key: &str, value: &str) -> Result<T, ConfigError>
    where
        T: std::str::FromStr + Default + PartialEq,
    {
        let number: T = self.parse_number(key, value)?;
        if number == T::default() {
            return Err(self.invalid(format!("'{key}' must be positive")));
        }
        Ok(number)
    }

    fn ignore(&self, key: &str) {
        warn!(
            path = %self.path.display(),
            line = self.line_number,
            key,
            "ignoring unknown configuration key"
        );
    }

    fn error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::parse_error(self.path, self.line_number, message)
    }

    fn invalid(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::file_validation_error(self.path, self.line_number, message)
    }
}

/// Lowercases a key and folds `_`, `-` and runs of whitespace to one space.
fn normalize_key(key: &str) -> String {
    key.split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|word| !word.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
