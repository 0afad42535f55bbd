//! MCP server: connection handling and accept loop.
//!
//! Each accepted connection gets its own [`Session`] and runs in its own
//! task:
//!
//! 1. **Initialisation**: protocol version agreement
//! 2. **Operation**: discovery and tool calls, the latter run concurrently
//! 3. **Shutdown**: EOF, a session-fatal error, or a process signal
//!
//! Responses to concurrent tool calls are funnelled through a single writer
//! task so that lines never interleave; each carries its request id.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;

use crate::mcp::protocol::OutgoingMessage;
use crate::mcp::session::{Dispatch, ServerContext, Session};
use crate::mcp::transport::{self, encode_line, LineReader, LineWriter};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The MCP server for the text tools.
pub struct McpServer {
    /// Shared identity and registry.
    context: Arc<ServerContext>,
    /// Next session identifier.
    next_session: AtomicU64,
}

impl McpServer {
    /// Creates a server around a populated context.
    #[must_use]
    pub fn new(context: ServerContext) -> Self {
        Self {
            context: Arc::new(context),
            next_session: AtomicU64::new(1),
        }
    }

    /// Returns the shared server context.
    #[must_use]
    pub const fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    /// Serves a single session over stdin/stdout until EOF or a signal.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn run_stdio(&self) -> io::Result<()> {
        let (reader, writer) = transport::stdio();

        tokio::select! {
            result = self.serve_connection(reader, writer) => result,
            () = shutdown_signal() => {
                tracing::info!("Shutdown signal received, stopping stdio session");
                Ok(())
            }
        }
    }

    /// Accepts TCP connections until a shutdown signal arrives.
    ///
    /// A failed accept is logged and retried after a short pause; only the
    /// shutdown signal ends the loop.
    pub async fn run_tcp(self: Arc<Self>, listener: TcpListener) {
        let mut sessions = JoinSet::new();
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!(
                        active = sessions.len(),
                        "Shutdown signal received, no longer accepting connections"
                    );
                    break;
                }

                accepted = listener.accept() => {
                    if !self.track_accept(&mut sessions, accepted) {
                        // Persistent failures such as fd exhaustion must not spin
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }

                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            }
        }

        sessions.shutdown().await;
    }

    /// Spawns a session for one accepted connection.
    ///
    /// Returns `false` if the accept itself failed. The error is logged and
    /// the listener keeps running; live sessions are unaffected.
    fn track_accept(
        self: &Arc<Self>,
        sessions: &mut JoinSet<()>,
        accepted: io::Result<(TcpStream, SocketAddr)>,
    ) -> bool {
        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to accept connection");
                return false;
            }
        };

        tracing::info!(%peer, "Accepted connection");
        let server = Arc::clone(self);
        sessions.spawn(async move {
            if let Err(e) = server.serve_tcp(stream).await {
                tracing::warn!(%peer, error = %e, "Connection ended with error");
            }
        });
        true
    }

    /// Serves one TCP connection.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn serve_tcp(&self, stream: TcpStream) -> io::Result<()> {
        let (reader, writer) = transport::split(stream);
        self.serve_connection(reader, writer).await
    }

    /// Runs one session over a pair of transport halves.
    ///
    /// Returns once the peer closes its side or the session hits a fatal
    /// error. Tool calls already dispatched run to completion first.
    ///
    /// # Errors
    ///
    /// Returns an error if reading from the transport fails.
    pub async fn serve_connection<R, W>(
        &self,
        mut reader: LineReader<R>,
        writer: LineWriter<W>,
    ) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let session_id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let mut session = Session::new(session_id, Arc::clone(&self.context));
        session.connect();
        tracing::debug!(session = session_id, "Session started");

        let (outgoing, writer_task) = writer.spawn();
        let mut in_flight = JoinSet::new();

        let read_result = loop {
            let line = match reader.read_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };

            match session.handle_line(&line) {
                Dispatch::Ignore => {}
                Dispatch::Reply(message) => send(&outgoing, &message),
                Dispatch::Fatal(message) => {
                    send(&outgoing, &message);
                    break Ok(());
                }
                Dispatch::Invoke(call) => {
                    let outgoing = outgoing.clone();
                    in_flight.spawn(async move {
                        let message = call.execute().await;
                        send(&outgoing, &message);
                    });
                }
            }

            // Reap finished calls so the set does not grow unbounded
            while in_flight.try_join_next().is_some() {}
        };

        session.close();

        while in_flight.join_next().await.is_some() {}
        drop(outgoing);

        match writer_task.await {
            Ok(Err(e)) => tracing::debug!(session = session_id, error = %e, "Writer stopped early"),
            Err(e) => tracing::warn!(session = session_id, error = %e, "Writer task failed"),
            Ok(Ok(())) => {}
        }

        tracing::debug!(session = session_id, "Session finished");
        read_result
    }
}

/// Queues a message for the writer task; a closed queue means the peer is gone.
fn send(outgoing: &UnboundedSender<String>, message: &OutgoingMessage) {
    match encode_line(message) {
        Ok(line) => {
            if outgoing.send(line).is_err() {
                tracing::debug!(id = ?message.id(), "Dropping response, connection closed");
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to encode response"),
    }
}

/// Resolves when the process is asked to stop.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut sigint), Ok(mut sigterm)) =
        (signal(SignalKind::interrupt()), signal(SignalKind::terminate()))
    else {
        tracing::warn!("Failed to install signal handlers, shutdown only via EOF");
        return std::future::pending().await;
    };

    tokio::select! {
        _ = sigint.recv() => tracing::info!("Received SIGINT, initiating graceful shutdown"),
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

/// Resolves when the process is asked to stop.
#[cfg(windows)]
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Received Ctrl+C, initiating graceful shutdown");
    } else {
        std::future::pending::<()>().await;
    }
}
