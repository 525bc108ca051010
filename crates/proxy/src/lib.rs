#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `proxy` implements a transparent CVS pserver proxy. Clients connect to it
//! as if it were the master repository. Read-only commands are first tried
//! against a nearby mirror and replayed against the master when the mirror
//! turns out to be stale, missing the data, or too slow; everything else goes
//! straight to the master. The client never sees output from both.
//!
//! # Design
//!
//! - [`ProxyListener`] accepts connections, enforces the connection limit and
//!   spawns one [`Session`] task per client.
//! - A [`Session`] owns the client stream and lazily opened links to both
//!   upstreams through [`UpstreamManager`]. Each command passes through
//!   [`classify`], which decides between relaying it to the master and
//!   speculating on the mirror.
//! - Speculative output is buffered until the mirror's response is complete
//!   and judged good; only then is it released to the client.
//! - Once either side switches to a compressed or encrypted stream the
//!   session becomes a byte tunnel to the master.
//! - [`run`] is the command-line front end behind the `cvs-proxy` binary.
//!
//! # Invariants
//!
//! - Responses reach the client in the order its commands were issued.
//! - A command's response comes from exactly one upstream.
//! - Directives (`Root`, `valid-responses`, `UseUnchanged`, ...) are replayed
//!   on every upstream before its first command, in the order received.
//!
//! # Examples
//!
//! ```
//! use proxy::{Endpoint, ProxyConfig};
//!
//! let remote: Endpoint = "cvs.example.org/cvsroot".parse().unwrap();
//! let config = ProxyConfig::builder().remote(remote).build().unwrap();
//! assert!(config.local().is_none());
//! ```

mod classifier;
mod cli;
mod config;
mod context;
mod error;
mod listener;
mod service;
mod session;
mod upstream;

pub use classifier::{Classification, READ_ONLY_COMMANDS, classify};
pub use cli::{
    MAX_EXIT_CODE, PROGRAM_NAME, SOCKET_IO_EXIT_CODE, USAGE_EXIT_CODE, exit_code_from, run,
};
pub use config::{
    ConfigError, ConfigErrorKind, ConfigFile, Credentials, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_LOCAL_TIMEOUT, DEFAULT_MAX_COMMAND_SIZE,
    DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_FILE_SIZE, DEFAULT_PSERVER_PORT, DEFAULT_REMOTE_TIMEOUT,
    DEFAULT_SPECULATIVE_BUFFER_LIMIT, Endpoint, EndpointError, ProxyConfig, ProxyConfigBuilder, UpstreamConfig,
};
pub use context::SessionContext;
pub use error::{Origin, ProxyError, UpstreamKind};
pub use listener::{ProxyContext, ProxyListener};
pub use service::{PSERVER_SERVICE, pserver_port, resolve_service_port};
pub use session::{Session, SessionState, SessionSummary};
pub use upstream::{UpstreamLink, UpstreamManager};
