//! crates/proxy/src/session.rs
//!
//! Session Proxy: one state machine per client connection.
//!
//! ```text
//! Connecting -> Authenticating -> Ready <-> Relaying -> Closing -> Closed
//!                                   \        /
//!                                   Degraded
//! ```
//!
//! The client socket is split. A reader task decodes client frames into a
//! bounded queue and cancels [`Session::disconnected`] when the client goes
//! away, so a relay in progress notices a hang-up without reading the
//! socket itself. The session drains the queue one command at a time and
//! writes every response before taking the next command, which keeps
//! responses in request order across local and remote paths.

mod speculative;
mod tunnel;
mod verdict;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use protocol::{AuthMode, ClientCodec, ClientFrame, Command, ProtocolError, Request, Response};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier::{Classification, classify};
use crate::config::ProxyConfig;
use crate::context::SessionContext;
use crate::error::{ProxyError, UpstreamKind};
use crate::upstream::{UpstreamLink, UpstreamManager};

/// Client frames decoded ahead of the one being served.
const CLIENT_QUEUE_DEPTH: usize = 32;

type ClientQueue = mpsc::Receiver<Result<ClientFrame, ProtocolError>>;

/// Lifecycle of a session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// Waiting for the client's authentication block.
    Connecting,
    /// Logging in to the remote master.
    Authenticating,
    /// Idle with the mirror available.
    Ready,
    /// Serving a command.
    Relaying,
    /// Idle with the mirror disabled; reads go to the master.
    Degraded,
    /// Tearing down upstream links and the client socket.
    Closing,
    /// Finished.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
            Self::Relaying => "relaying",
            Self::Degraded => "degraded",
            Self::Closing => "closing",
            Self::Closed => "closed",
        })
    }
}

/// What a finished session did.
#[derive(Debug)]
pub struct SessionSummary {
    /// Session identifier assigned by the acceptor.
    pub id: u64,
    /// Client address.
    pub peer: SocketAddr,
    /// Commands served, directives excluded.
    pub commands: u64,
    /// Repository directory the client last worked in.
    pub repository: Option<String>,
    /// Reads answered by the mirror.
    pub local_hits: u64,
    /// Reads tried on the mirror and re-issued to the master.
    pub fallbacks: u64,
    /// Commands sent straight to the master.
    pub remote_only: u64,
    /// Bytes written to the client.
    pub bytes_to_client: u64,
    /// Whether the mirror was disabled during the session.
    pub degraded: bool,
    /// State the session ended in.
    pub final_state: SessionState,
    /// Wall-clock lifetime.
    pub duration: Duration,
    /// The failure that ended the session, if any.
    pub error: Option<ProxyError>,
}

#[derive(Debug, Default)]
struct Counters {
    local_hits: u64,
    fallbacks: u64,
    remote_only: u64,
    bytes_to_client: u64,
    degraded: bool,
}

/// Per-connection coordinator between a client and its two upstreams.
pub struct Session<S> {
    id: u64,
    peer: SocketAddr,
    config: Arc<ProxyConfig>,
    state: SessionState,
    context: SessionContext,
    upstreams: UpstreamManager,
    client: FramedWrite<WriteHalf<S>, ClientCodec>,
    frames: ClientQueue,
    disconnected: CancellationToken,
    reader: JoinHandle<()>,
    counters: Counters,
    started: Instant,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Wraps an accepted client stream and starts reading from it.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(stream: S, peer: SocketAddr, id: u64, config: Arc<ProxyConfig>) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let (sender, frames) = mpsc::channel(CLIENT_QUEUE_DEPTH);
        let disconnected = CancellationToken::new();
        let codec = ClientCodec::new()
            .with_max_file_len(config.max_file_size())
            .with_max_command_len(config.max_command_size());
        let reader = tokio::spawn(read_client(read_half, codec, sender, disconnected.clone()));

        Self {
            id,
            peer,
            upstreams: UpstreamManager::new(Arc::clone(&config)),
            config,
            state: SessionState::Connecting,
            context: SessionContext::new(),
            client: FramedWrite::new(write_half, ClientCodec::new()),
            frames,
            disconnected,
            reader,
            counters: Counters::default(),
            started: Instant::now(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Drives the session to completion and reports what happened.
    pub async fn run(mut self) -> SessionSummary {
        let outcome = self.drive().await;
        if let Err(error) = &outcome {
            self.report(error).await;
        }
        self.shutdown().await;

        let summary = SessionSummary {
            id: self.id,
            peer: self.peer,
            commands: self.context.commands(),
            repository: self.context.repository().map(str::to_owned),
            local_hits: self.counters.local_hits,
            fallbacks: self.counters.fallbacks,
            remote_only: self.counters.remote_only,
            bytes_to_client: self.counters.bytes_to_client,
            degraded: self.counters.degraded,
            final_state: self.state,
            duration: self.started.elapsed(),
            error: outcome.err(),
        };
        info!(
            session = summary.id,
            peer = %summary.peer,
            commands = summary.commands,
            repository = summary.repository.as_deref().unwrap_or("-"),
            local_hits = summary.local_hits,
            fallbacks = summary.fallbacks,
            remote_only = summary.remote_only,
            bytes = summary.bytes_to_client,
            degraded = summary.degraded,
            state = %summary.final_state,
            elapsed_ms = summary.duration.as_millis() as u64,
            "session finished"
        );
        summary
    }

    async fn drive(&mut self) -> Result<(), ProxyError> {
        let auth = match self.next_frame(Some(self.config.handshake_timeout())).await? {
            Some(ClientFrame::Auth(auth)) => auth,
            Some(_) => {
                return Err(ProxyError::from_client(ProtocolError::MalformedAuth {
                    expected: "BEGIN AUTH REQUEST",
                    found: "request before authentication".to_owned(),
                }));
            }
            None => {
                debug!("client left before authenticating");
                return Ok(());
            }
        };

        self.transition(SessionState::Authenticating);
        info!(user = auth.user(), root = auth.root(), mode = ?auth.mode(), "client authenticating");
        let verify_only = auth.mode() == AuthMode::Verify;
        self.context.set_auth(auth);

        let remote = self.upstreams.acquire(UpstreamKind::Remote, &self.context).await?;
        let verdict = remote.auth_reply().raw().clone();
        self.upstreams.release(remote);
        self.send_raw(verdict).await?;
        if verify_only {
            return Ok(());
        }

        self.transition(SessionState::Ready);
        if !self.upstreams.local_enabled() {
            debug!("no local mirror configured");
            self.counters.degraded = true;
            self.transition(SessionState::Degraded);
        }

        while let Some(frame) = self.next_frame(None).await? {
            let ClientFrame::Command(command) = frame else {
                return Err(ProxyError::from_client(ProtocolError::MalformedLine {
                    line: "unexpected frame in request stream".to_owned(),
                }));
            };
            if command.switches_stream() {
                return self.tunnel(command).await;
            }
            self.serve(&command).await?;
        }
        Ok(())
    }

    async fn serve(&mut self, command: &Command) -> Result<(), ProxyError> {
        let classification = classify(command, &self.context);
        debug!(command = %command.summary(), route = %classification, "classified");

        match classification {
            Classification::LocalOnly => {
                self.context.record_directive(command);
                return Ok(());
            }
            Classification::RemoteOnly => {
                self.context.note_command(command);
                self.transition(SessionState::Relaying);
                self.counters.remote_only += 1;
                self.relay_remote(command).await?;
            }
            Classification::SpeculativeLocal => {
                self.context.note_command(command);
                self.transition(SessionState::Relaying);
                self.speculate(command).await?;
            }
        }

        let idle = self.idle_state();
        self.transition(idle);
        Ok(())
    }

    /// Forwards `command` to the master and streams its answer.
    async fn relay_remote(&mut self, command: &Command) -> Result<(), ProxyError> {
        let mut link = self.upstreams.acquire(UpstreamKind::Remote, &self.context).await?;
        match self.stream_remote(&mut link, command).await {
            Ok(()) => {
                self.upstreams.release(link);
                Ok(())
            }
            Err(error) => {
                link.close().await;
                Err(error)
            }
        }
    }

    async fn stream_remote(&mut self, link: &mut UpstreamLink, command: &Command) -> Result<(), ProxyError> {
        let limit = self.config.remote_timeout();
        let deadline = Instant::now() + limit;
        if !send_upstream(&self.disconnected, link, self.context.directives(), command, deadline).await? {
            return Err(ProxyError::RemoteTimeout(limit));
        }
        if !command.expects_response() {
            return Ok(());
        }
        loop {
            let response = next_upstream(&self.disconnected, link, Instant::now() + limit)
                .await?
                .ok_or(ProxyError::RemoteTimeout(limit))?;
            let terminal = response.is_terminal();
            self.send_client(&response).await?;
            if terminal {
                return Ok(());
            }
        }
    }

    fn idle_state(&self) -> SessionState {
        if self.upstreams.local_enabled() {
            SessionState::Ready
        } else {
            SessionState::Degraded
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "state change");
            self.state = next;
        }
    }

    /// Disables the mirror for the rest of the session.
    fn degrade(&mut self, reason: &ProxyError) {
        if self.upstreams.disable_local() {
            warn!(reason = %reason, "local mirror disabled for the rest of the session");
        }
        self.counters.degraded = true;
    }

    /// Waits for the next client frame. `None` means the client is gone.
    async fn next_frame(&mut self, limit: Option<Duration>) -> Result<Option<ClientFrame>, ProxyError> {
        let disconnected = self.disconnected.clone();
        let frames = &mut self.frames;
        let received = async move {
            match limit {
                Some(limit) => timeout(limit, frames.recv())
                    .await
                    .map_err(|_| ProxyError::HandshakeTimeout(limit)),
                None => Ok(frames.recv().await),
            }
        };
        tokio::select! {
            biased;
            () = disconnected.cancelled() => Ok(None),
            frame = received => match frame? {
                None => Ok(None),
                Some(Ok(frame)) => Ok(Some(frame)),
                Some(Err(error)) => Err(ProxyError::from_client(error)),
            },
        }
    }

    async fn send_client(&mut self, response: &Response) -> Result<(), ProxyError> {
        self.feed_client(response).await?;
        self.flush_client().await
    }

    async fn feed_client(&mut self, response: &Response) -> Result<(), ProxyError> {
        self.client.feed(response).await.map_err(ProxyError::from_client)?;
        self.counters.bytes_to_client += response.raw().len() as u64;
        Ok(())
    }

    async fn flush_client(&mut self) -> Result<(), ProxyError> {
        SinkExt::<&Response>::flush(&mut self.client)
            .await
            .map_err(ProxyError::from_client)
    }

    async fn send_raw(&mut self, bytes: Bytes) -> Result<(), ProxyError> {
        let len = bytes.len() as u64;
        self.client.send(bytes).await.map_err(ProxyError::from_client)?;
        self.counters.bytes_to_client += len;
        Ok(())
    }

    /// Logs a fatal error and tells the client, where the protocol allows.
    async fn report(&mut self, error: &ProxyError) {
        match error {
            ProxyError::ClientDisconnected => debug!("client disconnected"),
            error => warn!(%error, state = %self.state, "session failed"),
        }
        let notice = match error {
            ProxyError::UpstreamAuthRejected { reply, .. } => Some(reply.raw().clone()),
            other => other.client_message().map(|text| {
                let line = if self.state == SessionState::Authenticating {
                    Response::error_with_code("0", text)
                } else {
                    Response::error(text)
                };
                line.raw().clone()
            }),
        };
        if let Some(notice) = notice
            && let Err(error) = self.send_raw(notice).await
        {
            debug!(%error, "could not deliver error notice");
        }
    }

    /// Closes both upstream links, then the client socket.
    async fn shutdown(&mut self) {
        self.transition(SessionState::Closing);
        self.upstreams.close_all().await;
        if let Err(error) = self.client.get_mut().shutdown().await {
            debug!(%error, "client socket shutdown failed");
        }
        self.reader.abort();
        self.transition(SessionState::Closed);
    }
}

impl<S> Drop for Session<S> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Writes `command` to `link` unless the client leaves or `deadline`
/// passes. A missed deadline yields `Ok(false)` and leaves the link
/// half-written.
async fn send_upstream(
    disconnected: &CancellationToken,
    link: &mut UpstreamLink,
    directives: &[Request],
    command: &Command,
    deadline: Instant,
) -> Result<bool, ProxyError> {
    tokio::select! {
        biased;
        () = disconnected.cancelled() => Err(ProxyError::ClientDisconnected),
        sent = timeout_at(deadline, link.send(directives, command)) => match sent {
            Ok(result) => result.map(|()| true),
            Err(_) => Ok(false),
        },
    }
}

/// Reads the next upstream frame unless the client leaves or `deadline`
/// passes. A missed deadline yields `Ok(None)`.
async fn next_upstream(
    disconnected: &CancellationToken,
    link: &mut UpstreamLink,
    deadline: Instant,
) -> Result<Option<Response>, ProxyError> {
    tokio::select! {
        biased;
        () = disconnected.cancelled() => Err(ProxyError::ClientDisconnected),
        next = timeout_at(deadline, link.next_response()) => match next {
            Ok(response) => response.map(Some),
            Err(_) => Ok(None),
        },
    }
}

/// Decodes client frames into `frames` until the client stops sending.
async fn read_client<S>(
    reader: ReadHalf<S>,
    codec: ClientCodec,
    frames: mpsc::Sender<Result<ClientFrame, ProtocolError>>,
    disconnected: CancellationToken,
) where
    S: AsyncRead + Send + 'static,
{
    let mut framed = FramedRead::new(reader, codec);
    loop {
        let next = tokio::select! {
            () = frames.closed() => return,
            next = framed.next() => next,
        };
        match next {
            Some(Ok(frame)) => {
                if frames.send(Ok(frame)).await.is_err() {
                    return;
                }
            }
            Some(Err(error)) => {
                let lost = matches!(error, ProtocolError::Io(_));
                // Malformed input is queued behind the frames before it.
                let _ = frames.send(Err(error)).await;
                if lost {
                    disconnected.cancel();
                }
                return;
            }
            None => {
                disconnected.cancel();
                return;
            }
        }
    }
}
