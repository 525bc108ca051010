//! Routing decisions for client commands.
//!
//! The classifier only looks at what a command is, never at what the
//! mirror holds. Whether the mirror can actually serve a read is found out
//! by trying it.

use std::fmt;

use protocol::Command;

use crate::context::SessionContext;

/// Where a command is sent.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Classification {
    /// Session state kept by the proxy and mirrored to every upstream.
    LocalOnly,
    /// Answered by the remote master alone.
    RemoteOnly,
    /// Tried against the mirror first, falling back to the master.
    SpeculativeLocal,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LocalOnly => "local-only",
            Self::RemoteOnly => "remote-only",
            Self::SpeculativeLocal => "speculative-local",
        })
    }
}

/// Commands that never change the repository.
pub const READ_ONLY_COMMANDS: &[&str] = &[
    "co",
    "export",
    "update",
    "diff",
    "rdiff",
    "log",
    "rlog",
    "status",
    "annotate",
    "rannotate",
    "ls",
    "list",
    "rls",
    "rlist",
    "expand-modules",
];

/// Decides where `command` goes.
#[must_use]
pub fn classify(command: &Command, context: &SessionContext) -> Classification {
    if command.is_directive() {
        return Classification::LocalOnly;
    }
    if command.switches_stream() || !READ_ONLY_COMMANDS.contains(&command.name()) {
        return Classification::RemoteOnly;
    }
    // Edit notifications ride along with reads and must reach the master.
    if command.contains("Notify") || context.root().is_none() {
        return Classification::RemoteOnly;
    }
    Classification::SpeculativeLocal
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rooted() -> SessionContext {
        let mut context = SessionContext::new();
        context.record_directive(&Command::parse(b"Root /cvsroot\n").unwrap());
        context
    }

    fn classify_bytes(bytes: &[u8], context: &SessionContext) -> Classification {
        classify(&Command::parse(bytes).unwrap(), context)
    }

    #[test]
    fn directives_stay_local() {
        let context = SessionContext::new();
        assert_eq!(classify_bytes(b"Root /cvsroot\n", &context), Classification::LocalOnly);
        assert_eq!(
            classify_bytes(b"Valid-responses ok error M E\n", &context),
            Classification::LocalOnly
        );
        assert_eq!(classify_bytes(b"Global_option -q\n", &context), Classification::LocalOnly);
    }

    #[test]
    fn reads_are_speculative() {
        let context = rooted();
        for command in [
            &b"Argument module-A\nco\n"[..],
            b"Argument -r1.2\nArgument foo.c\nDirectory .\n/cvsroot/m\ndiff\n",
            b"Directory .\n/cvsroot/m\nEntry /foo.c/1.1///\nupdate\n",
            b"Argument foo.c\nlog\n",
            b"rlist\n",
        ] {
            assert_eq!(classify_bytes(command, &context), Classification::SpeculativeLocal);
        }
    }

    #[test]
    fn writes_go_remote() {
        let context = rooted();
        for command in [
            &b"Argument -m\nArgument fix\nci\n"[..],
            b"Argument newfile\nadd\n",
            b"Argument foo.c\nremove\n",
            b"Argument -b\nArgument TAG\ntag\n",
            b"Argument -kb\nadmin\n",
            b"Argument vendor\nimport\n",
            b"noop\n",
            b"valid-requests\n",
        ] {
            assert_eq!(classify_bytes(command, &context), Classification::RemoteOnly);
        }
    }

    #[test]
    fn stream_switch_goes_remote() {
        assert_eq!(classify_bytes(b"Gzip-stream 6\n", &rooted()), Classification::RemoteOnly);
    }

    #[test]
    fn notify_forces_remote() {
        let command = b"Directory .\n/cvsroot/m\nNotify foo.c\nE\tSun Nov 11 2001\thost\t/tmp\tEUC\nupdate\n";
        assert_eq!(classify_bytes(command, &rooted()), Classification::RemoteOnly);
    }

    #[test]
    fn reads_before_root_go_remote() {
        assert_eq!(
            classify_bytes(b"Argument module-A\nco\n", &SessionContext::new()),
            Classification::RemoteOnly
        );
    }
}
