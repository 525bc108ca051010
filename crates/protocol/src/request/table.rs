//! Static description of every request keyword the client may send.

use crate::line::Shape;

/// What a request does to the server's state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RequestEffect {
    /// Adds arguments, entries or file contents for the next command.
    Accumulate,
    /// Configures the whole session (`Root`, `Valid-responses`, ...).
    SessionDirective,
    /// Runs a command; the server answers with responses ending in `ok` or
    /// `error`.
    Command,
    /// Switches the rest of the connection to a transformed byte stream.
    StreamSwitch,
}

/// Table entry for one request keyword.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct RequestSpec {
    name: &'static str,
    effect: RequestEffect,
    shape: Shape,
}

impl RequestSpec {
    const fn new(name: &'static str, effect: RequestEffect, extra_lines: u8, transmission: bool) -> Self {
        Self {
            name,
            effect,
            shape: Shape {
                extra_lines,
                transmission,
            },
        }
    }

    /// Request keyword.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Effect on server state.
    #[must_use]
    pub const fn effect(&self) -> RequestEffect {
        self.effect
    }

    /// Reports whether the server answers this request with a response stream.
    #[must_use]
    pub const fn expects_response(&self) -> bool {
        matches!(self.effect, RequestEffect::Command)
    }

    /// Reports whether the connection stops being line oriented after this
    /// request.
    #[must_use]
    pub const fn switches_stream(&self) -> bool {
        matches!(self.effect, RequestEffect::StreamSwitch)
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

    pub(crate) const fn shape(&self) -> Shape {
        self.shape
    }
}

use RequestEffect::{Accumulate, Command, SessionDirective, StreamSwitch};

/// Every request keyword understood by the codec.
pub(crate) static REQUESTS: &[RequestSpec] = &[
    RequestSpec::new("Root", SessionDirective, 0, false),
    RequestSpec::new("Valid-responses", SessionDirective, 0, false),
    RequestSpec::new("UseUnchanged", SessionDirective, 0, false),
    RequestSpec::new("Global_option", SessionDirective, 0, false),
    RequestSpec::new("Set", SessionDirective, 0, false),
    RequestSpec::new("Case", SessionDirective, 0, false),
    RequestSpec::new("Hostname", SessionDirective, 0, false),
    RequestSpec::new("LocalDir", SessionDirective, 0, false),
    RequestSpec::new("Referrer", SessionDirective, 0, false),
    RequestSpec::new("Directory", Accumulate, 1, false),
    RequestSpec::new("Repository", Accumulate, 0, false),
    RequestSpec::new("Max-dotdot", Accumulate, 0, false),
    RequestSpec::new("Static-directory", Accumulate, 0, false),
    RequestSpec::new("Sticky", Accumulate, 0, false),
    RequestSpec::new("Entry", Accumulate, 0, false),
    RequestSpec::new("Kopt", Accumulate, 0, false),
    RequestSpec::new("Checkin-time", Accumulate, 0, false),
    RequestSpec::new("Modified", Accumulate, 1, true),
    RequestSpec::new("Is-modified", Accumulate, 0, false),
    RequestSpec::new("Unchanged", Accumulate, 0, false),
    RequestSpec::new("Notify", Accumulate, 1, false),
    RequestSpec::new("Questionable", Accumulate, 0, false),
    RequestSpec::new("Empty-conflicts", Accumulate, 0, false),
    RequestSpec::new("Argument", Accumulate, 0, false),
    RequestSpec::new("Argumentx", Accumulate, 0, false),
    RequestSpec::new("update-patches", Accumulate, 0, false),
    RequestSpec::new("Checkin-prog", Accumulate, 0, false),
    RequestSpec::new("Update-prog", Accumulate, 0, false),
    RequestSpec::new("Lost", Accumulate, 0, false),
    RequestSpec::new("Gzip-stream", StreamSwitch, 0, false),
    RequestSpec::new("Kerberos-encrypt", StreamSwitch, 0, false),
    RequestSpec::new("Gssapi-encrypt", StreamSwitch, 0, false),
    RequestSpec::new("Gssapi-authenticate", StreamSwitch, 0, false),
    RequestSpec::new("valid-requests", Command, 0, false),
    RequestSpec::new("Command-prep", Command, 0, false),
    RequestSpec::new("expand-modules", Command, 0, false),
    RequestSpec::new("ci", Command, 0, false),
    RequestSpec::new("diff", Command, 0, false),
    RequestSpec::new("ls", Command, 0, false),
    RequestSpec::new("list", Command, 0, false),
    RequestSpec::new("rls", Command, 0, false),
    RequestSpec::new("rlist", Command, 0, false),
    RequestSpec::new("add", Command, 0, false),
    RequestSpec::new("remove", Command, 0, false),
    RequestSpec::new("edit", Command, 0, false),
    RequestSpec::new("editors", Command, 0, false),
    RequestSpec::new("unedit", Command, 0, false),
    RequestSpec::new("tag", Command, 0, false),
    RequestSpec::new("rtag", Command, 0, false),
    RequestSpec::new("co", Command, 0, false),
    RequestSpec::new("export", Command, 0, false),
    RequestSpec::new("rdiff", Command, 0, false),
    RequestSpec::new("rlog", Command, 0, false),
    RequestSpec::new("rannotate", Command, 0, false),
    RequestSpec::new("annotate", Command, 0, false),
    RequestSpec::new("init", Command, 0, false),
    RequestSpec::new("update", Command, 0, false),
    RequestSpec::new("history", Command, 0, false),
    RequestSpec::new("import", Command, 0, false),
    RequestSpec::new("release", Command, 0, false),
    RequestSpec::new("noop", Command, 0, false),
    RequestSpec::new("watch-on", Command, 0, false),
    RequestSpec::new("watch-off", Command, 0, false),
    RequestSpec::new("watch-add", Command, 0, false),
    RequestSpec::new("watch-remove", Command, 0, false),
    RequestSpec::new("watchers", Command, 0, false),
    RequestSpec::new("version", Command, 0, false),
    RequestSpec::new("log", Command, 0, false),
    RequestSpec::new("status", Command, 0, false),
    RequestSpec::new("admin", Command, 0, false),
    RequestSpec::new("wrapper-sendme-rcsOptions", Command, 0, false),
];

/// Looks up the table entry for a request keyword.
#[must_use]
pub fn lookup_request(keyword: &[u8]) -> Option<&'static RequestSpec> {
    REQUESTS.iter().find(|spec| spec.name.as_bytes() == keyword)
}

/// Iterates over every request keyword the codec understands.
pub fn known_requests() -> impl Iterator<Item = &'static RequestSpec> {
    REQUESTS.iter()
}
