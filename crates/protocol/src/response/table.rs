//! Static description of every response keyword a server may send.

use crate::line::Shape;

/// Coarse role of a response in the stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ResponseKind {
    /// `ok`: the command succeeded.
    Ok,
    /// `error`: the command failed.
    Error,
    /// `E`: a line of standard error text.
    Stderr,
    /// `M`, `MT`, `Mbinary`, `F`: standard output.
    Stdout,
    /// `Valid-requests`: the server's supported request list.
    ValidRequests,
    /// A response that updates the client's working directory.
    WorkingDirectory,
    /// Everything else, including keywords this codec does not know.
    Other,
}

/// Table entry for one response keyword.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ResponseSpec {
    name: &'static str,
    kind: ResponseKind,
    shape: Shape,
    names_repository: bool,
}

impl ResponseSpec {
    const fn new(
        name: &'static str,
        kind: ResponseKind,
        extra_lines: u8,
        transmission: bool,
        names_repository: bool,
    ) -> Self {
        Self {
            name,
            kind,
            shape: Shape {
                extra_lines,
                transmission,
            },
            names_repository,
        }
    }

    /// Response keyword.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Role in the stream.
    #[must_use]
    pub const fn kind(&self) -> ResponseKind {
        self.kind
    }

    /// Reports whether the response ends a command's response stream.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.kind, ResponseKind::Ok | ResponseKind::Error)
    }

    /// Number of lines following the keyword line.
    #[must_use]
    pub const fn extra_lines(&self) -> u8 {
        self.shape.extra_lines
    }

    /// Reports whether a file transmission follows the extra lines.
    #[must_use]
    pub const fn carries_file(&self) -> bool {
        self.shape.transmission
    }

    /// Reports whether header line 1 holds a repository path.
    #[must_use]
    pub const fn names_repository(&self) -> bool {
        self.names_repository
    }

    pub(crate) const fn shape(&self) -> Shape {
        self.shape
    }
}

use ResponseKind as K;

/// Entry used for keywords missing from the table.
pub(crate) static UNKNOWN_RESPONSE: ResponseSpec = ResponseSpec::new("", K::Other, 0, false, false);

pub(crate) static RESPONSES: &[ResponseSpec] = &[
    ResponseSpec::new("ok", K::Ok, 0, false, false),
    ResponseSpec::new("error", K::Error, 0, false, false),
    ResponseSpec::new("Valid-requests", K::ValidRequests, 0, false, false),
    ResponseSpec::new("Force-gzip", K::Other, 0, false, false),
    ResponseSpec::new("Referrer", K::Other, 0, false, false),
    ResponseSpec::new("Redirect", K::Other, 0, false, false),
    ResponseSpec::new("Checked-in", K::WorkingDirectory, 2, false, true),
    ResponseSpec::new("New-entry", K::WorkingDirectory, 2, false, true),
    ResponseSpec::new("Checksum", K::Other, 0, false, false),
    ResponseSpec::new("Copy-file", K::WorkingDirectory, 2, false, true),
    ResponseSpec::new("Updated", K::WorkingDirectory, 3, true, true),
    ResponseSpec::new("Created", K::WorkingDirectory, 3, true, true),
    ResponseSpec::new("Update-existing", K::WorkingDirectory, 3, true, true),
    ResponseSpec::new("Merged", K::WorkingDirectory, 3, true, true),
    ResponseSpec::new("Patched", K::WorkingDirectory, 3, true, true),
    ResponseSpec::new("Rcs-diff", K::WorkingDirectory, 3, true, true),
    ResponseSpec::new("Mode", K::Other, 0, false, false),
    ResponseSpec::new("Mod-time", K::Other, 0, false, false),
    ResponseSpec::new("Removed", K::WorkingDirectory, 1, false, true),
    ResponseSpec::new("Remove-entry", K::WorkingDirectory, 1, false, true),
    ResponseSpec::new("Set-static-directory", K::WorkingDirectory, 1, false, true),
    ResponseSpec::new("Clear-static-directory", K::WorkingDirectory, 1, false, true),
    ResponseSpec::new("Set-sticky", K::WorkingDirectory, 2, false, true),
    ResponseSpec::new("Clear-sticky", K::WorkingDirectory, 1, false, true),
    ResponseSpec::new("Template", K::WorkingDirectory, 1, true, true),
    ResponseSpec::new("Clear-template", K::WorkingDirectory, 1, false, true),
    ResponseSpec::new("Notified", K::WorkingDirectory, 1, false, true),
    ResponseSpec::new("Module-expansion", K::Other, 0, false, false),
    ResponseSpec::new("Wrapper-rcsOption", K::Other, 0, false, false),
    ResponseSpec::new("Set-checkin-prog", K::WorkingDirectory, 1, false, false),
    ResponseSpec::new("Set-update-prog", K::WorkingDirectory, 1, false, false),
    ResponseSpec::new("EntriesExtra", K::WorkingDirectory, 1, false, false),
    ResponseSpec::new("M", K::Stdout, 0, false, false),
    ResponseSpec::new("Mbinary", K::Stdout, 0, true, false),
    ResponseSpec::new("E", K::Stderr, 0, false, false),
    ResponseSpec::new("F", K::Stdout, 0, false, false),
    ResponseSpec::new("MT", K::Stdout, 0, false, false),
];

/// Looks up the table entry for a response keyword.
#[must_use]
pub fn lookup_response(keyword: &[u8]) -> Option<&'static ResponseSpec> {
    RESPONSES.iter().find(|spec| spec.name.as_bytes() == keyword)
}
