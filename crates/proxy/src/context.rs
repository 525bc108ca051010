//! Per-session protocol state shared by the classifier and the upstreams.

use protocol::{AuthRequest, Command, Request};

/// What a session has negotiated so far.
///
/// Directives are kept in arrival order so an upstream opened late can be
/// brought to the same state as one that saw them live.
#[derive(Debug, Default)]
pub struct SessionContext {
    auth: Option<AuthRequest>,
    directives: Vec<Request>,
    root: Option<String>,
    repository: Option<String>,
    commands: u64,
}

impl SessionContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the client's authentication block.
    pub fn set_auth(&mut self, auth: AuthRequest) {
        self.auth = Some(auth);
    }

    /// The client's authentication block.
    #[must_use]
    pub const fn auth(&self) -> Option<&AuthRequest> {
        self.auth.as_ref()
    }

    /// Records a session directive.
    pub fn record_directive(&mut self, command: &Command) {
        let directive = command.terminator();
        if directive.name() == "Root" {
            self.root = Some(directive.argument_text().into_owned());
        }
        self.directives.push(directive.clone());
    }

    /// Directives in the order the client sent them.
    #[must_use]
    pub fn directives(&self) -> &[Request] {
        &self.directives
    }

    /// Repository root named by the client's `Root` request.
    #[must_use]
    pub fn root(&self) -> Option<&str> {
        self.root.as_deref()
    }

    /// Notes a command about to be routed and the repository directory it
    /// works in.
    pub fn note_command(&mut self, command: &Command) {
        self.commands += 1;
        if let Some(repository) = command.repositories().last() {
            self.repository = Some(repository.into_owned());
        }
    }

    /// Repository directory of the most recent command that named one.
    #[must_use]
    pub fn repository(&self) -> Option<&str> {
        self.repository.as_deref()
    }

    /// Commands routed so far, directives excluded.
    #[must_use]
    pub const fn commands(&self) -> u64 {
        self.commands
    }
}
