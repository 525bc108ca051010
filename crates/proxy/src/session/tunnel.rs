//! Verbatim relay after a stream switch such as `Gzip-stream`.
//!
//! Once the client compresses or encrypts its stream the proxy can no
//! longer see request boundaries, so the rest of the session belongs to
//! the master.

use bytes::BytesMut;
use protocol::{ClientFrame, Command};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, timeout};
use tracing::{debug, info};

use super::{Session, SessionState, send_upstream};
use crate::error::{ProxyError, UpstreamKind};

/// Read size for master-to-client tunnel traffic.
const TUNNEL_CHUNK: usize = 16 * 1024;

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub(super) async fn tunnel(&mut self, command: Command) -> Result<(), ProxyError> {
        self.transition(SessionState::Relaying);
        info!(request = %command.summary(), "stream switch; relaying the rest of the session verbatim");
        self.upstreams.close_local().await;

        let limit = self.config.remote_timeout();
        let mut link = self.upstreams.acquire(UpstreamKind::Remote, &self.context).await?;
        let deadline = Instant::now() + limit;
        let sent = send_upstream(&self.disconnected, &mut link, self.context.directives(), &command, deadline)
            .await
            .and_then(|sent| if sent { Ok(()) } else { Err(ProxyError::RemoteTimeout(limit)) });
        if let Err(error) = sent {
            link.close().await;
            return Err(error);
        }
        self.context.note_command(&command);
        self.counters.remote_only += 1;

        let authority = link.authority().to_owned();
        let unavailable = |source| ProxyError::UpstreamUnavailable {
            kind: UpstreamKind::Remote,
            endpoint: authority.clone(),
            source,
        };

        let (stream, read_ahead) = link.into_tunnel();
        if !read_ahead.is_empty() {
            self.send_raw(read_ahead.freeze()).await?;
        }
        let (mut remote_read, mut remote_write) = stream.into_split();
        let mut buf = BytesMut::with_capacity(TUNNEL_CHUNK);

        loop {
            buf.reserve(TUNNEL_CHUNK);
            tokio::select! {
                frame = self.frames.recv() => match frame {
                    Some(Ok(ClientFrame::Raw(bytes))) => {
                        timeout(limit, remote_write.write_all(&bytes))
                            .await
                            .map_err(|_| ProxyError::RemoteTimeout(limit))?
                            .map_err(unavailable)?;
                    }
                    Some(Ok(_)) => {
                        debug!("structured frame after stream switch ignored");
                    }
                    Some(Err(error)) => return Err(ProxyError::from_client(error)),
                    None => {
                        debug!("client closed the tunnel");
                        break;
                    }
                },
                read = remote_read.read_buf(&mut buf) => match read.map_err(unavailable)? {
                    0 => {
                        debug!("master closed the tunnel");
                        break;
                    }
                    _ => self.send_raw(buf.split().freeze()).await?,
                },
            }
        }

        if let Err(error) = remote_write.shutdown().await {
            debug!(%error, "tunnel shutdown failed");
        }
        Ok(())
    }
}
