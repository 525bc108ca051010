use std::error::Error;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Errors raised while loading or validating proxy configuration.
#[derive(Debug)]
pub struct ConfigError {
    kind: ConfigErrorKind,
    line: Option<usize>,
    message: String,
    path: Option<PathBuf>,
    source: Option<io::Error>,
}

/// Broad category of a [`ConfigError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConfigErrorKind {
    /// The configuration file could not be read.
    Io,
    /// A line of the configuration file is not valid syntax.
    Parse,
    /// A value is well-formed but unusable.
    Validation,
}

impl ConfigError {
    pub(crate) fn io_error(path: &Path, source: io::Error) -> Self {
        Self {
            kind: ConfigErrorKind::Io,
            line: None,
            message: format!("failed to read '{}': {source}", path.display()),
            path: Some(path.to_path_buf()),
            source: Some(source),
        }
    }

    pub(crate) fn parse_error(path: &Path, line: usize, message: impl Into<String>) -> Self {
        Self {
            kind: ConfigErrorKind::Parse,
            line: Some(line),
            message: message.into(),
            path: Some(path.to_path_buf()),
            source: None,
        }
    }

    /// A validation failure tied to a line of a configuration file.
    pub(crate) fn file_validation_error(path: &Path, line: usize, message: impl Into<String>) -> Self {
        Self {
            kind: ConfigErrorKind::Validation,
            ..Self::parse_error(path, line, message)
        }
    }

    /// A validation failure with no file position, e.g. from the command line.
    pub(crate) fn validation_error(message: impl Into<String>) -> Self {
        Self {
            kind: ConfigErrorKind::Validation,
            line: None,
            message: message.into(),
            path: None,
            source: None,
        }
    }

    /// Returns the category of the failure.
    #[must_use]
    pub const fn kind(&self) -> ConfigErrorKind {
        self.kind
    }

    /// Returns the line number where the error occurred, if available.
    #[must_use]
    pub const fn line(&self) -> Option<usize> {
        self.line
    }

    /// Returns the configuration file path where the error occurred.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the bare diagnostic without path or line.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind == ConfigErrorKind::Io {
            return f.write_str(&self.message);
        }
        if let Some(path) = &self.path {
            write!(f, "{}: ", path.display())?;
        }
        if let Some(line) = self.line {
            write!(f, "line {line}: ")?;
        }
        f.write_str(&self.message)
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_ref().map(|source| source as &(dyn Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_path_and_line() {
        let error = ConfigError::parse_error(Path::new("/etc/cvs-proxy.conf"), 7, "missing '='");
        assert_eq!(error.to_string(), "/etc/cvs-proxy.conf: line 7: missing '='");
        assert_eq!(error.kind(), ConfigErrorKind::Parse);
        assert_eq!(error.line(), Some(7));
    }

    #[test]
    fn validation_without_position_is_bare() {
        let error = ConfigError::validation_error("no remote endpoint configured");
        assert_eq!(error.to_string(), "no remote endpoint configured");
        assert!(error.path().is_none());
    }

    #[test]
    fn io_error_keeps_source() {
        let error = ConfigError::io_error(
            Path::new("missing.conf"),
            io::Error::from(io::ErrorKind::NotFound),
        );
        assert_eq!(error.kind(), ConfigErrorKind::Io);
        assert!(error.source().is_some());
        assert!(error.to_string().starts_with("failed to read 'missing.conf'"));
    }
}
