//! crates/logging/src/subscriber.rs
//! Installation of the global tracing subscriber.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

use crate::config::VerbosityConfig;

/// Builds the filter for `config`, unless `RUST_LOG` supplies one.
#[must_use]
pub fn filter_for(config: &VerbosityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.directives()))
}

/// Installs a formatted subscriber writing to standard error.
///
/// Fails when a global subscriber is already installed, which happens when a
/// process runs the proxy entry point more than once.
pub fn init_tracing(config: &VerbosityConfig) -> Result<(), TryInitError> {
    let format = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    tracing_subscriber::registry()
        .with(filter_for(config))
        .with(format)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_reported_not_fatal() {
        let config = VerbosityConfig::quiet();
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }

    #[test]
    fn filter_renders_configured_directives() {
        if std::env::var_os("RUST_LOG").is_none() {
            let filter = filter_for(&VerbosityConfig::from_verbose_level(1));
            assert!(filter.to_string().contains("proxy::session=debug"));
        }
    }
}
