#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `logging` turns the proxy's `-v`/`-q` command line flags into a
//! [`tracing_subscriber`] filter and installs a formatted subscriber writing
//! to standard error.
//!
//! # Design
//!
//! Diagnostics are grouped by the module that emits them. Each group is a
//! [`LogArea`] with its own level, so `-v` can open up session routing
//! decisions without drowning the output in per-frame wire traces. `RUST_LOG`
//! overrides the computed filter entirely.
//!
//! # Examples
//!
//! ```
//! use logging::{LogArea, VerbosityConfig};
//! use tracing::Level;
//!
//! let config = VerbosityConfig::from_verbose_level(1);
//! assert_eq!(config.level(LogArea::Session), Level::DEBUG);
//! assert!(config.directives().contains("proxy::session=debug"));
//! ```

mod config;
mod subscriber;

pub use config::{LogArea, VerbosityConfig};
pub use subscriber::{filter_for, init_tracing};
