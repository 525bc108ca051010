//! crates/protocol/src/auth.rs
//!
//! The pserver authentication block and the server's verdict.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::line;
use crate::scramble::scramble;

/// Server verdict granting access.
pub const AUTH_ACCEPTED: &str = "I LOVE YOU";
/// Server verdict refusing access.
pub const AUTH_REJECTED: &str = "I HATE YOU";

/// Flavour of password authentication requested by the client.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AuthMode {
    /// `BEGIN AUTH REQUEST`: authenticate and continue with requests.
    Auth,
    /// `BEGIN VERIFICATION REQUEST`: check the credentials and disconnect.
    Verify,
}

impl AuthMode {
    /// Opening marker line, without terminator.
    #[must_use]
    pub const fn begin_marker(self) -> &'static str {
        match self {
            Self::Auth => "BEGIN AUTH REQUEST",
            Self::Verify => "BEGIN VERIFICATION REQUEST",
        }
    }

    /// Closing marker line, without terminator.
    #[must_use]
    pub const fn end_marker(self) -> &'static str {
        match self {
            Self::Auth => "END AUTH REQUEST",
            Self::Verify => "END VERIFICATION REQUEST",
        }
    }

    pub(crate) fn from_begin_marker(line: &[u8]) -> Option<Self> {
        [Self::Auth, Self::Verify]
            .into_iter()
            .find(|mode| mode.begin_marker().as_bytes() == line)
    }
}

/// A complete authentication block.
///
/// The raw bytes are kept so the block can be replayed to an upstream exactly
/// as the client sent it.
#[derive(Clone, Eq, PartialEq)]
pub struct AuthRequest {
    mode: AuthMode,
    root: String,
    user: String,
    scrambled: String,
    raw: Bytes,
}

impl AuthRequest {
    /// Builds a block from an already scrambled password.
    #[must_use]
    pub fn new(mode: AuthMode, root: &str, user: &str, scrambled: &str) -> Self {
        let mut raw = BytesMut::with_capacity(
            mode.begin_marker().len() + mode.end_marker().len() + root.len() + user.len() + 64,
        );
        for line in [
            mode.begin_marker(),
            root,
            user,
            scrambled,
            mode.end_marker(),
        ] {
            raw.put_slice(line.as_bytes());
            raw.put_u8(b'\n');
        }
        Self {
            mode,
            root: root.to_owned(),
            user: user.to_owned(),
            scrambled: scrambled.to_owned(),
            raw: raw.freeze(),
        }
    }

    /// Builds a block from a clear-text password.
    #[must_use]
    pub fn with_password(mode: AuthMode, root: &str, user: &str, password: &str) -> Self {
        Self::new(mode, root, user, &scramble(password))
    }

    pub(crate) fn from_parts(
        mode: AuthMode,
        root: String,
        user: String,
        scrambled: String,
        raw: Bytes,
    ) -> Self {
        Self {
            mode,
            root,
            user,
            scrambled,
            raw,
        }
    }

    /// Returns a copy addressed to a different repository root.
    #[must_use]
    pub fn with_root(&self, root: &str) -> Self {
        self.with_root_bytes(root.as_bytes())
    }

    /// Replaces the root line of the raw block. Every other line is kept
    /// byte for byte, whatever its encoding.
    pub(crate) fn with_root_bytes(&self, root: &[u8]) -> Self {
        if root == self.root_line() {
            return self.clone();
        }
        let (raw, _) = line::replace_line(&self.raw, self.raw.len(), 1, root);
        Self {
            mode: self.mode,
            root: line::lossy(root),
            user: self.user.clone(),
            scrambled: self.scrambled.clone(),
            raw,
        }
    }

    /// Root line exactly as it appears in the raw block.
    pub(crate) fn root_line(&self) -> &[u8] {
        line::header_lines(&self.raw, self.raw.len())
            .nth(1)
            .map(line::strip_newline)
            .unwrap_or_default()
    }

    /// Authentication flavour.
    #[must_use]
    pub const fn mode(&self) -> AuthMode {
        self.mode
    }

    /// Repository root the client asked for.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// User name.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Password in its scrambled wire form.
    #[must_use]
    pub fn scrambled_password(&self) -> &str {
        &self.scrambled
    }

    /// Wire bytes of the whole block.
    #[must_use]
    pub const fn raw(&self) -> &Bytes {
        &self.raw
    }
}

impl fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthRequest")
            .field("mode", &self.mode)
            .field("root", &self.root)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Outcome of an authentication attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuthOutcome {
    /// `I LOVE YOU`.
    Accepted,
    /// `I HATE YOU`.
    Rejected,
    /// The server answered with an `error` line or closed without a verdict.
    Failed,
}

/// The server's answer to an authentication block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AuthReply {
    outcome: AuthOutcome,
    messages: Vec<String>,
    raw: Bytes,
}

impl AuthReply {
    pub(crate) const fn new(outcome: AuthOutcome, messages: Vec<String>, raw: Bytes) -> Self {
        Self {
            outcome,
            messages,
            raw,
        }
    }

    /// Verdict.
    #[must_use]
    pub const fn outcome(&self) -> AuthOutcome {
        self.outcome
    }

    /// Reports whether access was granted.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.outcome == AuthOutcome::Accepted
    }

    /// Diagnostic text the server sent before its verdict.
    #[must_use]
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Wire bytes of the reply, for verbatim relay.
    #[must_use]
    pub const fn raw(&self) -> &Bytes {
        &self.raw
    }
}
