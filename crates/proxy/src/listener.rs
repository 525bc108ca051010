//! crates/proxy/src/listener.rs
//!
//! Connection Acceptor.
//!
//! # Example
//!
//! ```no_run
//! use proxy::{Endpoint, ProxyConfig, ProxyContext, ProxyListener};
//!
//! # async fn example() -> std::io::Result<()> {
//! let config = ProxyConfig::builder()
//!     .remote(Endpoint::new("cvs.example.org", 2401))
//!     .local(Endpoint::new("127.0.0.1", 2402))
//!     .build()
//!     .expect("valid configuration");
//!
//! let listener = ProxyListener::bind(ProxyContext::new(config)).await?;
//! listener.serve().await
//! # }
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::ProxyConfig;
use crate::session::Session;

/// Pending connections queued by the kernel.
const LISTEN_BACKLOG: i32 = 128;

/// Pause after an accept failure that is not about a single connection,
/// such as running out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Sent to clients over the connection limit.
const BUSY_NOTICE: &[u8] = b"error 0 cvs-proxy: too many connections, try again later\n";

/// Process-wide state handed to the acceptor at startup.
#[derive(Debug)]
pub struct ProxyContext {
    config: Arc<ProxyConfig>,
    next_session: AtomicU64,
    shutdown: broadcast::Sender<()>,
}

impl ProxyContext {
    /// Wraps a validated configuration.
    #[must_use]
    pub fn new(config: ProxyConfig) -> Arc<Self> {
        let (shutdown, _) = broadcast::channel(1);
        Arc::new(Self {
            config: Arc::new(config),
            next_session: AtomicU64::new(1),
            shutdown,
        })
    }

    /// Shared configuration.
    #[must_use]
    pub const fn config(&self) -> &Arc<ProxyConfig> {
        &self.config
    }

    /// Sender that stops every listener using this context.
    #[must_use]
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    fn next_session_id(&self) -> u64 {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }
}

/// TCP listener that runs one [`Session`] per client.
pub struct ProxyListener {
    listener: TcpListener,
    context: Arc<ProxyContext>,
    connection_semaphore: Arc<Semaphore>,
    shutdown: broadcast::Receiver<()>,
}

impl ProxyListener {
    /// Binds the configured address.
    pub async fn bind(context: Arc<ProxyContext>) -> io::Result<Self> {
        let address = context.config().bind_address();
        let listener = bind_listener(address)?;
        Ok(Self {
            listener,
            shutdown: context.shutdown.subscribe(),
            connection_semaphore: Arc::new(Semaphore::new(context.config().max_connections())),
            context,
        })
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Returns a shutdown signal sender for graceful shutdown.
    #[must_use]
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.context.shutdown_signal()
    }

    /// Accepts clients until shutdown is signalled, then aborts the
    /// sessions still running.
    pub async fn serve(mut self) -> io::Result<()> {
        let mut sessions = JoinSet::new();
        info!(address = %self.local_addr()?, "listening for pserver clients");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(error) => {
                            let pause = accept_backoff(&error);
                            warn!(%error, pause_ms = pause.as_millis() as u64, "accept failed");
                            tokio::time::sleep(pause).await;
                            continue;
                        }
                    };
                    configure_stream(&stream);

                    let Ok(permit) = Arc::clone(&self.connection_semaphore).try_acquire_owned() else {
                        warn!(%peer, limit = self.context.config().max_connections(), "connection limit reached");
                        sessions.spawn(refuse(stream));
                        continue;
                    };

                    let id = self.context.next_session_id();
                    let config = Arc::clone(self.context.config());
                    debug!(session = id, %peer, "accepted");
                    sessions.spawn(
                        async move {
                            Session::new(stream, peer, id, config).run().await;
                            drop(permit);
                        }
                        .instrument(info_span!("session", id, %peer)),
                    );
                }
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(join_error) = joined
                        && join_error.is_panic()
                    {
                        error!(%join_error, "session task panicked");
                    }
                }
                _ = self.shutdown.recv() => break,
            }
        }

        info!(active = sessions.len(), "shutting down");
        sessions.abort_all();
        while sessions.join_next().await.is_some() {}
        Ok(())
    }
}

fn bind_listener(address: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if address.is_ipv6() {
        // Accept IPv4 clients on `::` where the platform allows it.
        if let Err(error) = socket.set_only_v6(false) {
            debug!(%error, "dual-stack listening unavailable");
        }
    }
    socket.bind(&address.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_nonblocking(true)?;
    TcpListener::from_std(socket.into())
}

/// How long to wait before accepting again after `error`. Failures tied to
/// one aborted connection are retried at once.
fn accept_backoff(error: &io::Error) -> Duration {
    match error.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::Interrupted => Duration::ZERO,
        _ => ACCEPT_BACKOFF,
    }
}

fn configure_stream(stream: &TcpStream) {
    if let Err(error) = stream.set_nodelay(true) {
        debug!(%error, "could not set TCP_NODELAY");
    }
    if let Err(error) = SockRef::from(stream).set_keepalive(true) {
        debug!(%error, "could not enable keepalive");
    }
}

async fn refuse(mut stream: TcpStream) {
    if let Err(error) = stream.write_all(BUSY_NOTICE).await {
        debug!(%error, "could not send busy notice");
    }
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::config::Endpoint;

    fn context(max_connections: usize) -> Arc<ProxyContext> {
        ProxyContext::new(
            ProxyConfig::builder()
                .listen_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
                .listen_port(0)
                .remote(Endpoint::new("127.0.0.1", 9))
                .max_connections(max_connections)
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn binds_an_ephemeral_port() {
        let listener = ProxyListener::bind(context(4)).await.unwrap();
        let address = listener.local_addr().unwrap();
        assert!(address.ip().is_loopback());
        assert_ne!(address.port(), 0);
    }

    #[tokio::test]
    async fn shutdown_stops_serving() {
        let listener = ProxyListener::bind(context(4)).await.unwrap();
        let shutdown = listener.shutdown_signal();
        let server = tokio::spawn(listener.serve());
        tokio::task::yield_now().await;
        shutdown.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn clients_over_the_limit_are_refused() {
        let listener = ProxyListener::bind(context(1)).await.unwrap();
        let address = listener.local_addr().unwrap();
        let shutdown = listener.shutdown_signal();
        let server = tokio::spawn(listener.serve());

        // Holds the only permit: the session waits for an auth block.
        let _first = TcpStream::connect(address).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut second = TcpStream::connect(address).await.unwrap();
        let mut reply = Vec::new();
        second.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, BUSY_NOTICE);

        shutdown.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[test]
    fn accept_failures_never_stop_the_listener() {
        assert_eq!(
            accept_backoff(&io::Error::from(io::ErrorKind::ConnectionAborted)),
            Duration::ZERO
        );
        // EMFILE surfaces with an uncategorized kind.
        let exhausted = io::Error::from_raw_os_error(24);
        assert_eq!(accept_backoff(&exhausted), ACCEPT_BACKOFF);
        assert_eq!(accept_backoff(&io::Error::other("accept")), ACCEPT_BACKOFF);
    }

    #[test]
    fn session_ids_increase() {
        let context = context(1);
        assert_eq!(context.next_session_id(), 1);
        assert_eq!(context.next_session_id(), 2);
    }
}
