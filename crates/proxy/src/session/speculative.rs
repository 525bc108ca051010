//! Speculative execution against the local mirror.
//!
//! The mirror's whole answer is held back until its terminator shows it is
//! fit to serve. Nothing from a rejected attempt reaches the client; the
//! command is re-issued to the master exactly once.

use protocol::{Command, Response};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tracing::{debug, info};

use super::verdict::{self, LocalVerdict};
use super::{Session, next_upstream, send_upstream};
use crate::error::{ProxyError, UpstreamKind};
use crate::upstream::UpstreamLink;

/// How far a local attempt got.
enum LocalAttempt {
    /// The terminator arrived within the window.
    Complete(Vec<Response>),
    /// Output outgrew the speculative buffer before the terminator.
    Overflow(Vec<Response>),
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub(super) async fn speculate(&mut self, command: &Command) -> Result<(), ProxyError> {
        if !self.upstreams.local_enabled() {
            self.counters.remote_only += 1;
            return self.relay_remote(command).await;
        }

        let mut link = match self.upstreams.acquire(UpstreamKind::Local, &self.context).await {
            Ok(link) => link,
            Err(error) => {
                self.degrade(&error);
                return self.fall_back(command, &error).await;
            }
        };

        if let Some(request) = link.first_unsupported(command) {
            debug!(request = request.name(), "mirror does not support request; using remote");
            self.upstreams.release(link);
            self.counters.remote_only += 1;
            return self.relay_remote(command).await;
        }

        match self.attempt_local(&mut link, command).await {
            Ok(LocalAttempt::Complete(responses)) => match verdict::assess(command, &responses) {
                LocalVerdict::Serve => {
                    self.upstreams.release(link);
                    self.serve_local(&responses).await
                }
                LocalVerdict::Stale(detail) => {
                    self.upstreams.release(link);
                    let reason = ProxyError::LocalStale {
                        command: command.summary(),
                        detail,
                    };
                    self.fall_back(command, &reason).await
                }
                LocalVerdict::NotFound(detail) => {
                    self.upstreams.release(link);
                    let reason = ProxyError::LocalNotFound {
                        command: command.summary(),
                        detail,
                    };
                    self.fall_back(command, &reason).await
                }
            },
            Ok(LocalAttempt::Overflow(buffered)) => {
                info!(
                    command = %command.summary(),
                    limit = self.config.speculative_buffer_limit(),
                    "local response exceeds the speculative buffer; committing to the mirror"
                );
                match self.commit_local(&mut link, &buffered).await {
                    Ok(()) => {
                        self.upstreams.release(link);
                        Ok(())
                    }
                    Err(error) => {
                        link.close().await;
                        self.degrade(&error);
                        Err(error)
                    }
                }
            }
            Err(ProxyError::ClientDisconnected) => {
                link.close().await;
                Err(ProxyError::ClientDisconnected)
            }
            Err(error) => {
                link.close().await;
                self.degrade(&error);
                self.fall_back(command, &error).await
            }
        }
    }

    /// Sends `command` to the mirror and buffers its answer. Writing and
    /// reading share the speculative deadline.
    async fn attempt_local(&mut self, link: &mut UpstreamLink, command: &Command) -> Result<LocalAttempt, ProxyError> {
        let limit = self.config.local_timeout();
        let deadline = Instant::now() + limit;
        if !send_upstream(&self.disconnected, link, self.context.directives(), command, deadline).await? {
            return Err(ProxyError::LocalTimeout(limit));
        }

        let mut responses = Vec::new();
        let mut buffered = 0;
        loop {
            let Some(response) = next_upstream(&self.disconnected, link, deadline).await? else {
                return Err(ProxyError::LocalTimeout(limit));
            };
            buffered += response.raw().len();
            let terminal = response.is_terminal();
            responses.push(response);
            if terminal {
                return Ok(LocalAttempt::Complete(responses));
            }
            if buffered > self.config.speculative_buffer_limit() {
                return Ok(LocalAttempt::Overflow(responses));
            }
        }
    }

    async fn serve_local(&mut self, responses: &[Response]) -> Result<(), ProxyError> {
        for response in responses {
            self.feed_client(response).await?;
        }
        self.flush_client().await?;
        self.counters.local_hits += 1;
        Ok(())
    }

    /// Streams the rest of an overflowing local answer. Past this point
    /// there is no fallback.
    async fn commit_local(&mut self, link: &mut UpstreamLink, buffered: &[Response]) -> Result<(), ProxyError> {
        self.serve_local(buffered).await?;
        let limit = self.config.local_timeout();
        loop {
            let response = next_upstream(&self.disconnected, link, Instant::now() + limit)
                .await?
                .ok_or(ProxyError::LocalTimeout(limit))?;
            let terminal = response.is_terminal();
            self.send_client(&response).await?;
            if terminal {
                return Ok(());
            }
        }
    }

    async fn fall_back(&mut self, command: &Command, reason: &ProxyError) -> Result<(), ProxyError> {
        info!(
            command = %command.summary(),
            repository = self.context.repository().unwrap_or("-"),
            %reason,
            "serving from remote instead of the mirror"
        );
        self.counters.fallbacks += 1;
        self.relay_remote(command).await
    }
}
