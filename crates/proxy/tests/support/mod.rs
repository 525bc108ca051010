//! Scripted pserver upstreams and a raw client for driving the proxy.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use futures_util::StreamExt;
use protocol::{
    AuthMode, AuthReply, AuthRequest, ClientCodec, ClientFrame, Command, Response, UpstreamCodec,
    UpstreamFrame, known_requests,
};
use proxy::{Endpoint, ProxyConfigBuilder, ProxyContext, ProxyListener};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{Framed, FramedRead};

/// Upper bound on any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// Root the test client logs in to.
pub const CLIENT_ROOT: &str = "/cvsroot";

/// Requests every session starts with.
pub const PREAMBLE: &[u8] = b"Root /cvsroot\nValid-responses ok error Valid-requests M E Updated Checked-in Mod-time\nvalid-requests\n";

/// How a mock upstream answers a command.
pub enum Reply {
    /// Write these bytes.
    Respond(Vec<u8>),
    /// Never answer, keeping the connection open.
    Hang,
    /// Drop the connection.
    Close,
}

/// Verdict a mock upstream gives every login.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Login {
    Accept,
    Reject,
}

type Responder = dyn Fn(&Command) -> Reply + Send + Sync;

struct Shared {
    login: Login,
    stall_after_query: bool,
    responder: Box<Responder>,
    commands: Mutex<Vec<String>>,
    logins: Mutex<Vec<AuthRequest>>,
    connections: AtomicUsize,
    closed: AtomicUsize,
}

/// A pserver on an ephemeral loopback port.
///
/// `valid-requests` is answered with every request the codec knows.
/// Requests that expect no response are recorded and left unanswered.
pub struct MockServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start<F>(login: Login, responder: F) -> Self
    where
        F: Fn(&Command) -> Reply + Send + Sync + 'static,
    {
        Self::spawn(login, false, Box::new(responder)).await
    }

    /// A server that answers the `valid-requests` query and then stops
    /// reading, leaving the connection open.
    pub async fn stalling() -> Self {
        Self::spawn(Login::Accept, true, Box::new(|_| Reply::Hang)).await
    }

    async fn spawn(login: Login, stall_after_query: bool, responder: Box<Responder>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock upstream");
        let addr = listener.local_addr().expect("mock address");
        let shared = Arc::new(Shared {
            login,
            stall_after_query,
            responder,
            commands: Mutex::new(Vec::new()),
            logins: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        });
        let task = tokio::spawn({
            let shared = Arc::clone(&shared);
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    shared.connections.fetch_add(1, Ordering::SeqCst);
                    let shared = Arc::clone(&shared);
                    tokio::spawn(async move {
                        serve_connection(stream, Arc::clone(&shared)).await;
                        shared.closed.fetch_add(1, Ordering::SeqCst);
                    });
                }
            }
        });
        Self { addr, shared, task }
    }

    /// Endpoint pointing at this server, with no root translation.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("127.0.0.1", self.addr.port())
    }

    /// Names of the requests received with their own frame, in order.
    pub fn commands(&self) -> Vec<String> {
        self.shared.commands.lock().expect("command log").clone()
    }

    /// How many times `name` was received.
    pub fn count(&self, name: &str) -> usize {
        self.commands().iter().filter(|command| *command == name).count()
    }

    pub fn logins(&self) -> Vec<AuthRequest> {
        self.shared.logins.lock().expect("login log").clone()
    }

    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Waits until `name` has been received at least once.
    pub async fn wait_for_command(&self, name: &str) {
        timeout(WAIT, async {
            while self.count(name) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("upstream received the command");
    }

    /// Waits until `count` connections have been closed by the proxy.
    pub async fn wait_closed(&self, count: usize) {
        timeout(WAIT, async {
            while self.shared.closed.load(Ordering::SeqCst) < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("proxy closed the upstream connection");
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_connection(stream: TcpStream, shared: Arc<Shared>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut frames = FramedRead::new(read_half, ClientCodec::new());
    while let Some(Ok(frame)) = frames.next().await {
        match frame {
            ClientFrame::Auth(auth) => {
                shared.logins.lock().expect("login log").push(auth);
                let verdict: &[u8] = match shared.login {
                    Login::Accept => b"I LOVE YOU\n",
                    Login::Reject => b"I HATE YOU\n",
                };
                if write_half.write_all(verdict).await.is_err() || shared.login == Login::Reject {
                    return;
                }
            }
            ClientFrame::Command(command) => {
                shared
                    .commands
                    .lock()
                    .expect("command log")
                    .push(command.name().to_owned());
                if command.name() == "valid-requests" {
                    if write_half.write_all(&valid_requests_reply()).await.is_err() {
                        return;
                    }
                    if shared.stall_after_query {
                        std::future::pending::<()>().await;
                    }
                    continue;
                }
                if !command.expects_response() {
                    continue;
                }
                match (shared.responder)(&command) {
                    Reply::Respond(bytes) => {
                        if write_half.write_all(&bytes).await.is_err() {
                            return;
                        }
                    }
                    Reply::Hang => {}
                    Reply::Close => return,
                }
            }
            ClientFrame::Raw(bytes) => {
                if write_half.write_all(&bytes).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn valid_requests_reply() -> Vec<u8> {
    let names: Vec<&str> = known_requests().map(|spec| spec.name()).collect();
    format!("Valid-requests {}\nok\n", names.join(" ")).into_bytes()
}

/// A loopback address nothing listens on.
pub async fn closed_endpoint() -> Endpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind a free port");
    let port = listener.local_addr().expect("free port address").port();
    drop(listener);
    Endpoint::new("127.0.0.1", port)
}

/// A proxy serving on an ephemeral loopback port.
pub struct RunningProxy {
    pub addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

impl RunningProxy {
    pub async fn start(builder: ProxyConfigBuilder) -> Self {
        let config = builder
            .listen_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .listen_port(0)
            .build()
            .expect("valid proxy config");
        let listener = ProxyListener::bind(ProxyContext::new(config))
            .await
            .expect("bind proxy");
        let addr = listener.local_addr().expect("proxy address");
        let shutdown = listener.shutdown_signal();
        let task = tokio::spawn(listener.serve());
        Self { addr, shutdown, task }
    }

    pub async fn client(&self) -> TestClient {
        TestClient::connect(self.addr).await
    }
}

impl Drop for RunningProxy {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        self.task.abort();
    }
}

/// A pserver client speaking raw bytes and reading decoded responses.
pub struct TestClient {
    framed: Framed<TcpStream, UpstreamCodec>,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect to proxy");
        Self {
            framed: Framed::new(stream, UpstreamCodec::new()),
        }
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.framed
            .get_mut()
            .write_all(bytes)
            .await
            .expect("write to proxy");
    }

    /// Sends a login for [`CLIENT_ROOT`] and returns the verdict.
    pub async fn login(&mut self, mode: AuthMode) -> AuthReply {
        let auth = AuthRequest::with_password(mode, CLIENT_ROOT, "anoncvs", "anoncvs");
        self.send(auth.raw()).await;
        match self.next_frame().await {
            Some(UpstreamFrame::Auth(reply)) => reply,
            other => panic!("expected an auth verdict, got {other:?}"),
        }
    }

    /// Logs in and sends [`PREAMBLE`], consuming the `valid-requests` answer.
    pub async fn open_session(&mut self) {
        let reply = self.login(AuthMode::Auth).await;
        assert!(reply.is_accepted(), "login refused: {reply:?}");
        self.send(PREAMBLE).await;
        let answer = self.response().await;
        assert_eq!(answer.last().map(Response::name), Some("ok"));
    }

    pub async fn next_frame(&mut self) -> Option<UpstreamFrame> {
        match timeout(WAIT, self.framed.next()).await {
            Ok(Some(frame)) => Some(frame.expect("well-formed proxy output")),
            Ok(None) => None,
            Err(_) => panic!("proxy did not answer within {WAIT:?}"),
        }
    }

    /// Reads one command's responses through its terminator.
    pub async fn response(&mut self) -> Vec<Response> {
        let mut responses = Vec::new();
        loop {
            match self.next_frame().await {
                Some(UpstreamFrame::Response(response)) => {
                    let terminal = response.is_terminal();
                    responses.push(response);
                    if terminal {
                        return responses;
                    }
                }
                Some(UpstreamFrame::Auth(reply)) => panic!("unexpected auth verdict {reply:?}"),
                None => panic!("proxy closed mid-response after {responses:?}"),
            }
        }
    }

    /// Reads everything up to the proxy closing the connection, including
    /// bytes the codec buffered.
    pub async fn read_to_end(self) -> Vec<u8> {
        let parts = self.framed.into_parts();
        let mut bytes = parts.read_buf.to_vec();
        let mut stream = parts.io;
        timeout(WAIT, stream.read_to_end(&mut bytes))
            .await
            .expect("proxy closed the connection")
            .expect("read from proxy");
        bytes
    }

    /// Gives up framing, for tunnelled sessions.
    pub fn into_raw(self) -> (TcpStream, BytesMut) {
        let parts = self.framed.into_parts();
        (parts.io, parts.read_buf)
    }
}

/// Concatenated wire bytes of `responses`.
pub fn wire(responses: &[Response]) -> Vec<u8> {
    responses
        .iter()
        .flat_map(|response| response.raw().iter().copied())
        .collect()
}
