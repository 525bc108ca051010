//! crates/proxy/src/upstream.rs
//!
//! Upstream Connection Manager.
//!
//! A session owns one [`UpstreamManager`], which holds at most one link
//! per upstream. Links are lent out by value with
//! [`UpstreamManager::acquire`] and handed back with
//! [`UpstreamManager::release`], so a link can never carry two requests at
//! once. Nothing is pooled across sessions: pserver authentication is per
//! connection.

use std::collections::HashSet;
use std::io;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use protocol::{AuthReply, AuthRequest, Command, Request, Response, RootRewrite, UpstreamCodec, UpstreamFrame};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use crate::config::{ProxyConfig, UpstreamConfig};
use crate::context::SessionContext;
use crate::error::{ProxyError, UpstreamKind};

/// An authenticated connection to one upstream pserver.
#[derive(Debug)]
pub struct UpstreamLink {
    kind: UpstreamKind,
    authority: String,
    framed: Framed<TcpStream, UpstreamCodec>,
    rewrite: Option<RootRewrite>,
    auth_reply: AuthReply,
    directives_sent: usize,
    supported: Option<HashSet<String>>,
}

impl UpstreamLink {
    /// Connects to `upstream` and authenticates with `auth`.
    ///
    /// Both steps share the configured connect deadline. A refused login is
    /// reported as [`ProxyError::UpstreamAuthRejected`] carrying the
    /// server's reply.
    pub async fn connect(
        kind: UpstreamKind,
        upstream: &UpstreamConfig,
        auth: &AuthRequest,
        rewrite: Option<RootRewrite>,
        config: &ProxyConfig,
    ) -> Result<Self, ProxyError> {
        let endpoint = upstream.endpoint();
        let authority = endpoint.authority();
        let deadline = Instant::now() + config.connect_timeout();
        let timed_out = || ProxyError::unavailable(kind, &authority, "timed out connecting");

        let stream = timeout_at(deadline, TcpStream::connect((endpoint.host(), endpoint.port())))
            .await
            .map_err(|_| timed_out())?
            .map_err(|source| ProxyError::UpstreamUnavailable {
                kind,
                endpoint: authority.clone(),
                source,
            })?;
        if let Err(error) = stream.set_nodelay(true) {
            debug!(upstream = %kind, %error, "could not disable Nagle on upstream socket");
        }

        let mut framed = Framed::new(stream, UpstreamCodec::new().with_max_file_len(config.max_file_size()));
        timeout_at(deadline, framed.send(auth))
            .await
            .map_err(|_| timed_out())?
            .map_err(|error| ProxyError::from_upstream(kind, &authority, error))?;

        let reply = match timeout_at(deadline, framed.next()).await.map_err(|_| timed_out())? {
            Some(Ok(UpstreamFrame::Auth(reply))) => reply,
            Some(Ok(UpstreamFrame::Response(_))) => {
                return Err(ProxyError::unavailable(kind, &authority, "response before auth verdict"));
            }
            Some(Err(error)) => return Err(ProxyError::from_upstream(kind, &authority, error)),
            None => {
                return Err(ProxyError::UpstreamUnavailable {
                    kind,
                    endpoint: authority,
                    source: io::Error::from(io::ErrorKind::UnexpectedEof),
                });
            }
        };

        if !reply.is_accepted() {
            return Err(ProxyError::UpstreamAuthRejected {
                kind,
                user: auth.user().to_owned(),
                reply,
            });
        }
        info!(upstream = %kind, endpoint = %authority, user = auth.user(), "authenticated");

        Ok(Self {
            kind,
            authority,
            framed,
            rewrite,
            auth_reply: reply,
            directives_sent: 0,
            supported: None,
        })
    }

    /// Which upstream this link talks to.
    #[must_use]
    pub const fn kind(&self) -> UpstreamKind {
        self.kind
    }

    /// `host:port` of the upstream.
    #[must_use]
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// The upstream's verdict on the login, verbatim.
    #[must_use]
    pub const fn auth_reply(&self) -> &AuthReply {
        &self.auth_reply
    }

    /// Whether the upstream accepts request `name`. Links that were never
    /// checked accept everything.
    #[must_use]
    pub fn supports(&self, name: &str) -> bool {
        self.supported
            .as_ref()
            .is_none_or(|supported| supported.contains(name))
    }

    /// First request of `command` the upstream does not accept.
    #[must_use]
    pub fn first_unsupported<'a>(&self, command: &'a Command) -> Option<&'a Request> {
        command
            .requests()
            .iter()
            .find(|request| !self.supports(request.name()))
    }

    /// Sends the directives this link has not seen yet, then `command`.
    pub async fn send(&mut self, directives: &[Request], command: &Command) -> Result<(), ProxyError> {
        let pending = directives.get(self.directives_sent..).unwrap_or_default();
        for directive in pending.iter().chain(command.requests()) {
            let request = match &self.rewrite {
                Some(rewrite) => rewrite.request(directive),
                None => std::borrow::Cow::Borrowed(directive),
            };
            self.framed
                .feed(&*request)
                .await
                .map_err(|error| ProxyError::from_upstream(self.kind, &self.authority, error))?;
        }
        self.directives_sent = directives.len();
        trace!(
            target: "proxy::wire",
            upstream = %self.kind,
            command = command.name(),
            bytes = command.encoded_len(),
            "sending"
        );
        SinkExt::<&Request>::flush(&mut self.framed)
            .await
            .map_err(|error| ProxyError::from_upstream(self.kind, &self.authority, error))
    }

    /// Reads the next response frame.
    ///
    /// End of stream before a terminator is [`ProxyError::UpstreamUnavailable`].
    pub async fn next_response(&mut self) -> Result<Response, ProxyError> {
        match self.framed.next().await {
            Some(Ok(UpstreamFrame::Response(response))) => {
                trace!(
                    target: "proxy::wire",
                    upstream = %self.kind,
                    frame = response.name(),
                    bytes = response.raw().len(),
                    "received"
                );
                Ok(match &self.rewrite {
                    Some(rewrite) => rewrite.response(response),
                    None => response,
                })
            }
            Some(Ok(UpstreamFrame::Auth(_))) => Err(ProxyError::unavailable(
                self.kind,
                &self.authority,
                "unexpected second auth verdict",
            )),
            Some(Err(error)) => Err(ProxyError::from_upstream(self.kind, &self.authority, error)),
            None => Err(ProxyError::UpstreamUnavailable {
                kind: self.kind,
                endpoint: self.authority.clone(),
                source: io::Error::from(io::ErrorKind::UnexpectedEof),
            }),
        }
    }

    /// Asks the server which requests it accepts and remembers the answer.
    async fn query_requests(&mut self, directives: &[Request], limit: Duration) -> Result<(), ProxyError> {
        let query = Command::parse(b"valid-requests\n")
            .map_err(|error| ProxyError::from_upstream(self.kind, &self.authority, error))?;

        let exchange = async {
            self.send(directives, &query).await?;
            loop {
                let response = self.next_response().await?;
                if let Some(requests) = response.valid_requests() {
                    self.supported = Some(requests.into_iter().collect());
                }
                if response.is_terminal() {
                    return Ok::<_, ProxyError>(());
                }
            }
        };
        match timeout(limit, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ProxyError::unavailable(
                self.kind,
                &self.authority,
                "timed out probing valid-requests",
            )),
        }
    }

    /// Gives up framing and returns the socket with any bytes read ahead.
    pub fn into_tunnel(self) -> (TcpStream, BytesMut) {
        let parts = self.framed.into_parts();
        (parts.io, parts.read_buf)
    }

    /// Shuts the connection down.
    pub async fn close(self) {
        let kind = self.kind;
        let mut stream = self.framed.into_inner();
        if let Err(error) = stream.shutdown().await {
            trace!(upstream = %kind, %error, "shutdown of upstream socket failed");
        }
        debug!(upstream = %kind, "closed");
    }
}

#[derive(Debug)]
enum Slot {
    Idle,
    Ready(UpstreamLink),
    InUse,
    Disabled,
}

/// Owner of a session's two upstream links.
#[derive(Debug)]
pub struct UpstreamManager {
    config: Arc<ProxyConfig>,
    local: Slot,
    remote: Slot,
}

impl UpstreamManager {
    /// Creates a manager with no open links. Without a configured mirror
    /// the local slot starts disabled.
    #[must_use]
    pub fn new(config: Arc<ProxyConfig>) -> Self {
        let local = if config.local().is_some() {
            Slot::Idle
        } else {
            Slot::Disabled
        };
        Self {
            config,
            local,
            remote: Slot::Idle,
        }
    }

    fn slot(&mut self, kind: UpstreamKind) -> &mut Slot {
        match kind {
            UpstreamKind::Local => &mut self.local,
            UpstreamKind::Remote => &mut self.remote,
        }
    }

    /// Reports whether the mirror may still be used this session.
    #[must_use]
    pub const fn local_enabled(&self) -> bool {
        !matches!(self.local, Slot::Disabled)
    }

    /// Borrows the link to `kind`, opening it on first use.
    ///
    /// Opening replays the client's authentication, rewritten for the
    /// upstream's root and credentials. A local link is also brought up to
    /// date with the session's directives and checked with
    /// `valid-requests`. A local link that fails to open disables the
    /// mirror for the rest of the session.
    pub async fn acquire(&mut self, kind: UpstreamKind, context: &SessionContext) -> Result<UpstreamLink, ProxyError> {
        match mem::replace(self.slot(kind), Slot::InUse) {
            Slot::Ready(link) => Ok(link),
            Slot::Idle => {
                let opened = self.open(kind, context).await;
                if opened.is_err() && kind == UpstreamKind::Local {
                    *self.slot(kind) = Slot::Disabled;
                }
                opened
            }
            Slot::InUse => Err(ProxyError::unavailable(kind, "-", "link already in use")),
            Slot::Disabled => {
                *self.slot(kind) = Slot::Disabled;
                Err(ProxyError::unavailable(kind, "-", "disabled for this session"))
            }
        }
    }

    /// Returns a borrowed link for reuse by later commands.
    pub fn release(&mut self, link: UpstreamLink) {
        let slot = self.slot(link.kind());
        if matches!(slot, Slot::InUse) {
            *slot = Slot::Ready(link);
        }
    }

    /// Disables the mirror, dropping its link. Returns `true` the first time.
    pub fn disable_local(&mut self) -> bool {
        !matches!(mem::replace(&mut self.local, Slot::Disabled), Slot::Disabled)
    }

    /// Closes the mirror link, if open, and disables the mirror.
    pub async fn close_local(&mut self) {
        if let Slot::Ready(link) = mem::replace(&mut self.local, Slot::Disabled) {
            link.close().await;
        }
    }

    /// Closes every open link.
    pub async fn close_all(&mut self) {
        self.close_local().await;
        if let Slot::Ready(link) = mem::replace(&mut self.remote, Slot::Disabled) {
            link.close().await;
        }
    }

    async fn open(&self, kind: UpstreamKind, context: &SessionContext) -> Result<UpstreamLink, ProxyError> {
        let upstream = self
            .config
            .upstream(kind)
            .ok_or_else(|| ProxyError::unavailable(kind, "-", "no endpoint configured"))?;
        let authority = upstream.endpoint().authority();
        let client_auth = context
            .auth()
            .ok_or_else(|| ProxyError::unavailable(kind, &authority, "session is not authenticated"))?;

        let rewrite = upstream
            .endpoint()
            .root()
            .and_then(|root| RootRewrite::new(client_auth.root(), root));
        let auth = self.upstream_auth(upstream, client_auth, rewrite.as_ref());
        debug!(upstream = %kind, endpoint = %authority, "connecting");

        let mut link =
            UpstreamLink::connect(kind, upstream, &auth, rewrite, &self.config).await?;
        if kind == UpstreamKind::Local {
            if let Err(error) = link.query_requests(context.directives(), self.config.connect_timeout()).await {
                warn!(upstream = %kind, %error, "mirror failed the valid-requests check");
                link.close().await;
                return Err(error);
            }
        }
        Ok(link)
    }

    /// Login sent to an upstream: the client's own, or the configured
    /// credentials when passthrough is off.
    fn upstream_auth(&self, upstream: &UpstreamConfig, client: &AuthRequest, rewrite: Option<&RootRewrite>) -> AuthRequest {
        let auth = match upstream.credentials() {
            Some(credentials) if !self.config.credentials_passthrough() => AuthRequest::with_password(
                client.mode(),
                client.root(),
                credentials.user(),
                credentials.password(),
            ),
            _ => client.clone(),
        };
        match rewrite {
            Some(rewrite) => rewrite.auth(&auth).into_owned(),
            None => auth,
        }
    }
}
