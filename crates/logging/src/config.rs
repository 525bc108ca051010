//! crates/logging/src/config.rs
//! Verbosity configuration per diagnostic area.

use std::fmt::Write as _;

use tracing::Level;

/// A group of related diagnostics, identified by the emitting module.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum LogArea {
    /// Listener lifecycle and accepted connections.
    Acceptor,
    /// Per-session state transitions, routing and fallbacks.
    Session,
    /// Upstream connects, authentication and teardown.
    Upstream,
    /// Individual frames relayed between peers.
    Wire,
}

impl LogArea {
    /// Every area, in filter order.
    pub const ALL: [Self; 4] = [Self::Acceptor, Self::Session, Self::Upstream, Self::Wire];

    /// Tracing target prefix for the area.
    #[must_use]
    pub const fn target(self) -> &'static str {
        match self {
            Self::Acceptor => "proxy::listener",
            Self::Session => "proxy::session",
            Self::Upstream => "proxy::upstream",
            Self::Wire => "proxy::wire",
        }
    }
}

/// Levels for every [`LogArea`] plus the fallback for all other targets.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VerbosityConfig {
    default: Level,
    acceptor: Level,
    session: Level,
    upstream: Level,
    wire: Level,
}

impl Default for VerbosityConfig {
    fn default() -> Self {
        Self::from_verbose_level(0)
    }
}

impl VerbosityConfig {
    /// Maps the number of `-v` flags to per-area levels.
    ///
    /// Level 0 reports connections and session summaries, 1 adds routing
    /// decisions, 2 adds upstream handshakes at trace level and 3 or more
    /// traces every relayed frame.
    #[must_use]
    pub fn from_verbose_level(level: u8) -> Self {
        match level {
            0 => Self {
                default: Level::WARN,
                acceptor: Level::INFO,
                session: Level::INFO,
                upstream: Level::WARN,
                wire: Level::WARN,
            },
            1 => Self {
                default: Level::INFO,
                acceptor: Level::INFO,
                session: Level::DEBUG,
                upstream: Level::DEBUG,
                wire: Level::INFO,
            },
            2 => Self {
                default: Level::DEBUG,
                acceptor: Level::DEBUG,
                session: Level::TRACE,
                upstream: Level::TRACE,
                wire: Level::DEBUG,
            },
            _ => Self {
                default: Level::TRACE,
                acceptor: Level::TRACE,
                session: Level::TRACE,
                upstream: Level::TRACE,
                wire: Level::TRACE,
            },
        }
    }

    /// Errors only, for `-q`.
    #[must_use]
    pub const fn quiet() -> Self {
        Self {
            default: Level::ERROR,
            acceptor: Level::ERROR,
            session: Level::ERROR,
            upstream: Level::ERROR,
            wire: Level::ERROR,
        }
    }

    /// Level enabled for `area`.
    #[must_use]
    pub const fn level(&self, area: LogArea) -> Level {
        match area {
            LogArea::Acceptor => self.acceptor,
            LogArea::Session => self.session,
            LogArea::Upstream => self.upstream,
            LogArea::Wire => self.wire,
        }
    }

    /// Overrides the level of a single area.
    #[must_use]
    pub fn with_level(mut self, area: LogArea, level: Level) -> Self {
        match area {
            LogArea::Acceptor => self.acceptor = level,
            LogArea::Session => self.session = level,
            LogArea::Upstream => self.upstream = level,
            LogArea::Wire => self.wire = level,
        }
        self
    }

    /// Filter directives in `EnvFilter` syntax.
    #[must_use]
    pub fn directives(&self) -> String {
        let mut out = directive_level(self.default);
        for area in LogArea::ALL {
            let _ = write!(out, ",{}={}", area.target(), directive_level(self.level(area)));
        }
        out
    }
}

fn directive_level(level: Level) -> String {
    level.as_str().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_reports_sessions_at_info() {
        let config = VerbosityConfig::default();
        assert_eq!(config.level(LogArea::Session), Level::INFO);
        assert_eq!(config.level(LogArea::Wire), Level::WARN);
    }

    #[test]
    fn verbose_levels_only_open_up() {
        for level in 0..4u8 {
            let lower = VerbosityConfig::from_verbose_level(level);
            let higher = VerbosityConfig::from_verbose_level(level + 1);
            for area in LogArea::ALL {
                assert!(higher.level(area) >= lower.level(area), "{area:?} at -v{level}");
            }
        }
    }

    #[test]
    fn quiet_limits_everything_to_errors() {
        let config = VerbosityConfig::quiet();
        assert!(LogArea::ALL.iter().all(|a| config.level(*a) == Level::ERROR));
        assert!(config.directives().starts_with("error,"));
    }

    #[test]
    fn directives_name_every_area() {
        let directives = VerbosityConfig::from_verbose_level(3).directives();
        assert_eq!(
            directives,
            "trace,proxy::listener=trace,proxy::session=trace,proxy::upstream=trace,proxy::wire=trace"
        );
    }

    #[test]
    fn with_level_overrides_one_area() {
        let config = VerbosityConfig::default().with_level(LogArea::Wire, Level::TRACE);
        assert_eq!(config.level(LogArea::Wire), Level::TRACE);
        assert_eq!(config.level(LogArea::Session), Level::INFO);
    }
}
