//! MCP client: request issuing and response correlation.
//!
//! Each request gets the next integer id (starting at 1) and a oneshot
//! waiter in the pending table. A background task reads responses and
//! resolves waiters by id, in whatever order the server answers. When the
//! connection ends, every waiter still in the table resolves with
//! [`SessionError::ConnectionClosed`]; nothing is left hanging.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::error::SessionError;
use crate::mcp::protocol::{
    parse_response, ClientInfo, ErrorCode, InitializeParams, InitializeResult, ListToolsResult,
    OutgoingNotification, OutgoingRequest, RequestId, RequestKind, ToolCallParams,
    ToolCallResult, ToolContent, ToolDefinition, MCP_PROTOCOL_VERSION,
};
use crate::mcp::session::SessionState;
use crate::mcp::transport::{self, encode_line, LineReader, LineWriter};
use crate::tools::ToolResult;

type Waiter = oneshot::Sender<Result<Value, SessionError>>;

/// Mutable client state, guarded by one lock so that closing and
/// registering a waiter cannot race.
struct Shared {
    state: SessionState,
    next_id: i64,
    pending: HashMap<i64, Waiter>,
    outgoing: Option<mpsc::UnboundedSender<String>>,
}

impl Shared {
    /// Moves to `Closed` and fails every outstanding request.
    fn close(&mut self) {
        self.state = SessionState::Closed;
        self.outgoing = None;
        for (id, waiter) in self.pending.drain() {
            tracing::debug!(id, "Failing pending request, connection closed");
            let _ = waiter.send(Err(SessionError::ConnectionClosed));
        }
    }
}

/// A client session over one connection.
pub struct McpClient {
    shared: Arc<Mutex<Shared>>,
    reader_task: JoinHandle<()>,
    server: Mutex<Option<InitializeResult>>,
}

impl McpClient {
    /// Attaches a client to a pair of transport halves.
    ///
    /// Spawns the reader and writer tasks; the session starts in
    /// `Initializing`.
    pub fn connect<R, W>(reader: LineReader<R>, writer: LineWriter<W>) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing, _writer_task) = writer.spawn();

        let shared = Arc::new(Mutex::new(Shared {
            state: SessionState::Initializing,
            next_id: 1,
            pending: HashMap::new(),
            outgoing: Some(outgoing),
        }));

        let reader_task = tokio::spawn(Self::read_loop(reader, Arc::clone(&shared)));

        Self {
            shared,
            reader_task,
            server: Mutex::new(None),
        }
    }

    /// Connects to a server listening on TCP.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect_tcp<A: ToSocketAddrs>(addr: A) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = transport::split(stream);
        Ok(Self::connect(reader, writer))
    }

    /// Background task: resolves waiters until the connection ends.
    async fn read_loop<R>(mut reader: LineReader<R>, shared: Arc<Mutex<Shared>>)
    where
        R: AsyncBufRead + Unpin,
    {
        loop {
            let line = match reader.read_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    tracing::debug!("Server closed the connection");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read from server");
                    break;
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            let response = match parse_response(&line) {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring unexpected message from server");
                    continue;
                }
            };

            let Some(RequestId::Number(id)) = response.id.clone() else {
                tracing::warn!(id = ?response.id, "Response does not match any request");
                continue;
            };

            let waiter = shared.lock().await.pending.remove(&id);
            match waiter {
                Some(waiter) => {
                    let _ = waiter.send(response.into_outcome());
                }
                None => tracing::warn!(id, "Discarding response for unknown or answered request"),
            }
        }

        shared.lock().await.close();
    }

    /// Returns the current session state.
    pub async fn state(&self) -> SessionState {
        self.shared.lock().await.state
    }

    /// Number of requests still awaiting a response.
    pub async fn pending_requests(&self) -> usize {
        self.shared.lock().await.pending.len()
    }

    /// Server handshake result, once initialised.
    pub async fn server_info(&self) -> Option<InitializeResult> {
        self.server.lock().await.clone()
    }

    /// Issues a request and waits for its response.
    ///
    /// # Errors
    ///
    /// Returns the error carried by the response, or
    /// [`SessionError::ConnectionClosed`] if the session is closed or closes
    /// before the response arrives.
    pub async fn send(
        &self,
        kind: RequestKind,
        params: Option<Value>,
    ) -> Result<Value, SessionError> {
        let (tx, rx) = oneshot::channel();

        // Ids are allocated under the lock so wire order matches id order
        let id = {
            let mut shared = self.shared.lock().await;
            if shared.state == SessionState::Closed {
                return Err(SessionError::ConnectionClosed);
            }

            let id = shared.next_id;
            let line = encode_line(&OutgoingRequest::new(RequestId::Number(id), kind, params))?;
            let sent = shared
                .outgoing
                .as_ref()
                .is_some_and(|outgoing| outgoing.send(line).is_ok());
            if !sent {
                return Err(SessionError::ConnectionClosed);
            }

            shared.next_id += 1;
            shared.pending.insert(id, tx);
            id
        };

        tracing::debug!(id, method = kind.method(), "Request sent");

        let outcome = rx.await.unwrap_or(Err(SessionError::ConnectionClosed));
        if let Err(ref error) = outcome {
            if error.is_session_fatal() {
                self.shared.lock().await.close();
            }
        }
        outcome
    }

    /// Sends a notification (no response expected).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConnectionClosed`] if the session is closed.
    pub async fn notify(&self, notification: &OutgoingNotification) -> Result<(), SessionError> {
        let line = encode_line(notification)?;
        let shared = self.shared.lock().await;
        shared
            .outgoing
            .as_ref()
            .filter(|_| shared.state != SessionState::Closed)
            .and_then(|outgoing| outgoing.send(line).ok())
            .ok_or(SessionError::ConnectionClosed)
    }

    /// Performs the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::VersionMismatch`] if the server rejects the
    /// protocol version, or any transport/decoding error.
    pub async fn initialize(
        &self,
        client_info: ClientInfo,
    ) -> Result<InitializeResult, SessionError> {
        let params = InitializeParams {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: json!({}),
            client_info: Some(client_info),
        };

        let value = self
            .send(RequestKind::Initialize, Some(serde_json::to_value(params)?))
            .await?;
        let result: InitializeResult = serde_json::from_value(value)?;

        {
            let mut shared = self.shared.lock().await;
            if shared.state == SessionState::Initializing {
                shared.state = SessionState::Ready;
            }
        }
        self.notify(&OutgoingNotification::initialized()).await?;

        tracing::info!(
            server = %result.server_info.name,
            version = %result.server_info.version,
            protocol_version = %result.protocol_version,
            "Connected to server"
        );

        *self.server.lock().await = Some(result.clone());
        Ok(result)
    }

    /// Lists the tools the server advertises.
    ///
    /// # Errors
    ///
    /// Returns the server's error (e.g. protocol order) or a transport error.
    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>, SessionError> {
        let value = self.send(RequestKind::ListTools, None).await?;
        let result: ListToolsResult = serde_json::from_value(value)?;
        Ok(result.tools)
    }

    /// Invokes a tool by name.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownTool`], [`SessionError::Argument`] or
    /// [`SessionError::ToolExecution`] as reported by the server, or
    /// [`SessionError::ConnectionClosed`].
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<ToolResult, SessionError> {
        let params = ToolCallParams {
            name: name.to_string(),
            arguments,
        };
        let value = self
            .send(RequestKind::CallTool, Some(serde_json::to_value(params)?))
            .await?;

        let result: ToolCallResult = serde_json::from_value(value)?;
        if result.is_error {
            let message = result
                .content
                .first()
                .map(|ToolContent::Text { text }| text.clone())
                .unwrap_or_default();
            return Err(SessionError::ToolExecution(message));
        }

        let value = result.value().ok_or_else(|| SessionError::Rpc {
            code: ErrorCode::InternalError.code(),
            message: "tool call result has no content".to_string(),
        })?;
        ToolResult::from_value(value)
    }

    /// Liveness check.
    ///
    /// # Errors
    ///
    /// Returns an error if the server does not answer successfully.
    pub async fn ping(&self) -> Result<(), SessionError> {
        self.send(RequestKind::Ping, None).await.map(|_| ())
    }

    /// Closes the session.
    ///
    /// Outstanding requests resolve with [`SessionError::ConnectionClosed`];
    /// the writer shuts down so the server observes EOF.
    pub async fn close(&self) {
        self.shared.lock().await.close();
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}
