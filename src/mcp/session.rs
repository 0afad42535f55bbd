//! Server-side session state machine.
//!
//! A [`Session`] tracks one connection from acceptance to closure:
//!
//! ```text
//! Unconnected ──connect──▶ Initializing ──initialize──▶ Ready ──close──▶ Closed
//!                               │                                 ▲
//!                               └──── order / version error ──────┘
//! ```
//!
//! The session decides what to do with each incoming line and returns a
//! [`Dispatch`]. Handshake and discovery are answered inline; tool calls are
//! validated here and handed back as a [`PreparedCall`] so the server can run
//! them off the read loop.

use std::sync::Arc;

use serde_json::json;

use crate::error::SessionError;
use crate::mcp::protocol::{
    is_supported_version, parse_message, ClientInfo, IncomingMessage, InitializeParams,
    InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ListToolsResult,
    OutgoingMessage, RequestId, RequestKind, ServerCapabilities, ServerInfo, ToolCallParams,
    ToolCallResult, INITIALIZED_NOTIFICATION,
};
use crate::tools::{ToolArgs, ToolHandler, ToolRegistry, ToolResult};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, transport not yet attached.
    Unconnected,
    /// Transport attached, waiting for the initialize request.
    Initializing,
    /// Handshake complete; discovery and tool calls are accepted.
    Ready,
    /// Terminal.
    Closed,
}

/// Process-wide state shared read-only by every session.
#[derive(Debug)]
pub struct ServerContext {
    /// Identity reported in the handshake.
    pub info: ServerInfo,
    /// Registered tools.
    pub registry: ToolRegistry,
}

impl ServerContext {
    /// Creates a context from an identity and a populated registry.
    #[must_use]
    pub const fn new(info: ServerInfo, registry: ToolRegistry) -> Self {
        Self { info, registry }
    }
}

/// A validated tool invocation, ready to run.
pub struct PreparedCall {
    /// Request being answered.
    pub id: RequestId,
    /// Tool name, for logging.
    pub tool: String,
    handler: ToolHandler,
    args: ToolArgs,
}

impl std::fmt::Debug for PreparedCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedCall")
            .field("id", &self.id)
            .field("tool", &self.tool)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

impl PreparedCall {
    /// Runs the callable on the blocking pool and builds the response.
    ///
    /// Errors and panics raised by the callable become
    /// [`SessionError::ToolExecution`].
    pub async fn execute(self) -> OutgoingMessage {
        let Self {
            id,
            tool,
            handler,
            args,
        } = self;

        let joined = tokio::task::spawn_blocking(move || handler(&args)).await;

        let outcome = match joined {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(SessionError::ToolExecution(e.to_string())),
            Err(join_error) if join_error.is_panic() => {
                Err(SessionError::ToolExecution(panic_message(join_error.into_panic())))
            }
            Err(join_error) => Err(SessionError::ToolExecution(join_error.to_string())),
        };

        match outcome {
            Ok(result) => {
                tracing::debug!(id = %id, tool = %tool, "Tool call succeeded");
                tool_response(id, &result)
            }
            Err(error) => {
                tracing::warn!(id = %id, tool = %tool, error = %error, "Tool call failed");
                JsonRpcError::from_session(id, &error).into()
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "tool panicked".to_string())
}

fn tool_response(id: RequestId, result: &ToolResult) -> OutgoingMessage {
    let body = ToolCallResult::structured(result.to_text(), result.to_value());
    match serde_json::to_value(&body) {
        Ok(value) => JsonRpcResponse::success(id, value).into(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialise tool call result");
            JsonRpcError::internal_error(id, "Internal error: failed to serialise result").into()
        }
    }
}

/// What the connection loop should do with one incoming line.
#[derive(Debug)]
pub enum Dispatch {
    /// Nothing to send (notification, blank line).
    Ignore,
    /// Send this message, keep reading.
    Reply(OutgoingMessage),
    /// Send this message, then close the session.
    Fatal(OutgoingMessage),
    /// Run the call concurrently and send its result.
    Invoke(PreparedCall),
}

/// Protocol state for one connection.
#[derive(Debug)]
pub struct Session {
    id: u64,
    state: SessionState,
    context: Arc<ServerContext>,
    protocol_version: Option<String>,
    client_info: Option<ClientInfo>,
}

impl Session {
    /// Creates an unconnected session.
    #[must_use]
    pub const fn new(id: u64, context: Arc<ServerContext>) -> Self {
        Self {
            id,
            state: SessionState::Unconnected,
            context,
            protocol_version: None,
            client_info: None,
        }
    }

    /// Session identifier, unique within the server process.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Returns the current session state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Protocol version agreed in the handshake.
    #[must_use]
    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    /// Identity the client sent in the handshake.
    #[must_use]
    pub const fn client_info(&self) -> Option<&ClientInfo> {
        self.client_info.as_ref()
    }

    /// Marks the transport as attached.
    pub fn connect(&mut self) {
        if self.state == SessionState::Unconnected {
            self.state = SessionState::Initializing;
        }
    }

    /// Moves to the terminal state.
    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            tracing::debug!(session = self.id, "Session closed");
        }
        self.state = SessionState::Closed;
    }

    /// Decides how to answer one line of input.
    pub fn handle_line(&mut self, line: &str) -> Dispatch {
        if line.trim().is_empty() {
            return Dispatch::Ignore;
        }

        match parse_message(line) {
            Ok(IncomingMessage::Request(req)) => self.handle_request(req),
            Ok(IncomingMessage::Notification(notif)) => {
                if notif.method == INITIALIZED_NOTIFICATION {
                    tracing::debug!(session = self.id, "Client confirmed initialisation");
                } else {
                    tracing::debug!(
                        session = self.id,
                        method = %notif.method,
                        "Ignoring notification"
                    );
                }
                Dispatch::Ignore
            }
            Err(error) => {
                tracing::warn!(
                    session = self.id,
                    code = error.error.code,
                    "Rejected malformed message"
                );
                Dispatch::Reply(error.into())
            }
        }
    }

    /// Decides how to answer one request.
    pub fn handle_request(&mut self, req: JsonRpcRequest) -> Dispatch {
        tracing::debug!(session = self.id, id = %req.id, method = %req.method, "Request received");

        if self.state == SessionState::Closed {
            return self.fatal(req.id, &SessionError::ConnectionClosed);
        }

        let Some(kind) = RequestKind::from_method(&req.method) else {
            if self.state == SessionState::Ready {
                return Dispatch::Reply(JsonRpcError::method_not_found(req.id, &req.method).into());
            }
            let error = SessionError::ProtocolOrder(format!(
                "'{}' received before initialize",
                req.method
            ));
            return self.fatal(req.id, &error);
        };

        match (self.state, kind) {
            (SessionState::Initializing, RequestKind::Initialize) => self.initialize(&req),
            (SessionState::Ready, RequestKind::Initialize) => {
                let error = SessionError::ProtocolOrder("session already initialised".to_string());
                self.fatal(req.id, &error)
            }
            (SessionState::Ready, RequestKind::ListTools) => self.list_tools(req.id),
            (SessionState::Ready, RequestKind::CallTool) => self.prepare_call(req),
            (SessionState::Ready, RequestKind::Ping) => {
                Dispatch::Reply(JsonRpcResponse::success(req.id, json!({})).into())
            }
            (_, kind) => {
                let error =
                    SessionError::ProtocolOrder(format!("'{kind}' received before initialize"));
                self.fatal(req.id, &error)
            }
        }
    }

    fn fatal(&mut self, id: RequestId, error: &SessionError) -> Dispatch {
        tracing::warn!(session = self.id, id = %id, error = %error, "Closing session");
        self.close();
        Dispatch::Fatal(JsonRpcError::from_session(id, error).into())
    }

    fn initialize(&mut self, req: &JsonRpcRequest) -> Dispatch {
        let params: InitializeParams = match decode_params(req) {
            Ok(Some(params)) => params,
            Ok(None) => {
                return Dispatch::Reply(
                    JsonRpcError::invalid_params(req.id.clone(), "Missing initialize params")
                        .into(),
                )
            }
            Err(e) => {
                return Dispatch::Reply(
                    JsonRpcError::invalid_params(
                        req.id.clone(),
                        format!("Invalid initialize params: {e}"),
                    )
                    .into(),
                )
            }
        };

        if !is_supported_version(&params.protocol_version) {
            let error = SessionError::VersionMismatch {
                requested: params.protocol_version,
            };
            return self.fatal(req.id.clone(), &error);
        }

        let result = InitializeResult {
            protocol_version: params.protocol_version.clone(),
            capabilities: ServerCapabilities::default(),
            server_info: self.context.info.clone(),
        };

        tracing::info!(
            session = self.id,
            protocol_version = %params.protocol_version,
            client = params.client_info.as_ref().map_or("<anonymous>", |c| c.name.as_str()),
            "Session initialised"
        );

        self.protocol_version = Some(params.protocol_version);
        self.client_info = params.client_info;
        self.state = SessionState::Ready;

        reply_with(req.id.clone(), &result)
    }

    fn list_tools(&self, id: RequestId) -> Dispatch {
        let result = ListToolsResult {
            tools: self.context.registry.definitions(),
        };
        reply_with(id, &result)
    }

    fn prepare_call(&self, req: JsonRpcRequest) -> Dispatch {
        let params: ToolCallParams = match decode_params(&req) {
            Ok(Some(params)) => params,
            Ok(None) => {
                return Dispatch::Reply(
                    JsonRpcError::invalid_params(req.id, "Missing tool call params").into(),
                )
            }
            Err(e) => {
                return Dispatch::Reply(
                    JsonRpcError::invalid_params(req.id, format!("Invalid tool call params: {e}"))
                        .into(),
                )
            }
        };

        let prepared = self
            .context
            .registry
            .lookup(&params.name)
            .map_err(SessionError::from)
            .and_then(|tool| {
                let args = tool.descriptor.validate(&params.arguments)?;
                Ok((Arc::clone(&tool.handler), args))
            });

        match prepared {
            Ok((handler, args)) => Dispatch::Invoke(PreparedCall {
                id: req.id,
                tool: params.name,
                handler,
                args,
            }),
            Err(error) => {
                tracing::debug!(
                    session = self.id,
                    id = %req.id,
                    error = %error,
                    "Tool call rejected"
                );
                Dispatch::Reply(JsonRpcError::from_session(req.id, &error).into())
            }
        }
    }
}

fn decode_params<T: serde::de::DeserializeOwned>(
    req: &JsonRpcRequest,
) -> Result<Option<T>, serde_json::Error> {
    req.params
        .as_ref()
        .map(|p| serde_json::from_value(p.clone()))
        .transpose()
}

fn reply_with<T: serde::Serialize>(id: RequestId, result: &T) -> Dispatch {
    match serde_json::to_value(result) {
        Ok(value) => Dispatch::Reply(JsonRpcResponse::success(id, value).into()),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialise result");
            Dispatch::Reply(
                JsonRpcError::internal_error(id, "Internal error: failed to serialise result")
                    .into(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::mcp::protocol::{ErrorCode, MCP_PROTOCOL_VERSION};
    use crate::tools::text::builtin_registry;
    use crate::tools::{ParamSpec, ParamType, ToolDescriptor, ToolError};

    fn context() -> Arc<ServerContext> {
        let mut registry = builtin_registry().unwrap();
        registry
            .register(ToolDescriptor::new("explode", "always fails"), |_| {
                Err(ToolError::new("kaboom"))
            })
            .unwrap();
        registry
            .register(
                ToolDescriptor::new("panics", "panics").param(ParamSpec::required(
                    "text",
                    ParamType::String,
                    "ignored",
                )),
                |_| panic!("tool bug"),
            )
            .unwrap();
        Arc::new(ServerContext::new(ServerInfo::default(), registry))
    }

    fn connected() -> Session {
        let mut session = Session::new(1, context());
        session.connect();
        session
    }

    fn ready() -> Session {
        let mut session = connected();
        let dispatch = session.handle_line(&initialize_line(1, MCP_PROTOCOL_VERSION));
        assert!(matches!(dispatch, Dispatch::Reply(OutgoingMessage::Response(_))));
        session
    }

    fn initialize_line(id: i64, version: &str) -> String {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "protocolVersion": version,
                "capabilities": {},
                "clientInfo": {"name": "test-client", "version": "1.0.0"}
            }
        })
        .to_string()
    }

    fn request_line(id: i64, method: &str, params: &Value) -> String {
        json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}).to_string()
    }

    fn reply_result(dispatch: &Dispatch) -> Option<&Value> {
        match dispatch {
            Dispatch::Reply(OutgoingMessage::Response(resp)) => Some(&resp.result),
            _ => None,
        }
    }

    fn error_code(dispatch: &Dispatch) -> Option<i32> {
        match dispatch {
            Dispatch::Reply(OutgoingMessage::Error(e))
            | Dispatch::Fatal(OutgoingMessage::Error(e)) => Some(e.error.code),
            _ => None,
        }
    }

    #[test]
    fn session_lifecycle_states() {
        let mut session = Session::new(7, context());
        assert_eq!(session.state(), SessionState::Unconnected);
        session.connect();
        assert_eq!(session.state(), SessionState::Initializing);

        session.handle_line(&initialize_line(1, MCP_PROTOCOL_VERSION));
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.protocol_version(), Some(MCP_PROTOCOL_VERSION));
        assert_eq!(session.client_info().map(|c| c.name.as_str()), Some("test-client"));

        session.close();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn initialize_reports_server_identity() {
        let mut session = connected();
        let dispatch = session.handle_line(&initialize_line(1, MCP_PROTOCOL_VERSION));
        let result = reply_result(&dispatch).unwrap();
        assert_eq!(result["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "RandomTools");
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[test]
    fn list_before_initialize_is_fatal() {
        let mut session = connected();
        let dispatch = session.handle_line(&request_line(1, "tools/list", &json!({})));
        assert!(matches!(dispatch, Dispatch::Fatal(_)));
        assert_eq!(error_code(&dispatch), Some(ErrorCode::ProtocolOrder.code()));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn call_before_initialize_is_fatal() {
        let mut session = connected();
        let dispatch = session.handle_line(&request_line(
            1,
            "tools/call",
            &json!({"name": "validate_email", "arguments": {"email": "a@b.co"}}),
        ));
        assert_eq!(error_code(&dispatch), Some(ErrorCode::ProtocolOrder.code()));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn version_mismatch_is_fatal() {
        let mut session = connected();
        let dispatch = session.handle_line(&initialize_line(1, "1999-01-01"));
        assert!(matches!(dispatch, Dispatch::Fatal(_)));
        assert_eq!(error_code(&dispatch), Some(ErrorCode::VersionMismatch.code()));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn second_initialize_is_fatal() {
        let mut session = ready();
        let dispatch = session.handle_line(&initialize_line(2, MCP_PROTOCOL_VERSION));
        assert_eq!(error_code(&dispatch), Some(ErrorCode::ProtocolOrder.code()));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn missing_initialize_params_is_request_scoped() {
        let mut session = connected();
        let dispatch = session.handle_line(r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#);
        assert_eq!(error_code(&dispatch), Some(ErrorCode::InvalidParams.code()));
        assert_eq!(session.state(), SessionState::Initializing);
    }

    #[test]
    fn discovery_is_idempotent() {
        let mut session = ready();
        let first = session.handle_line(&request_line(2, "tools/list", &json!({})));
        let second = session.handle_line(&request_line(3, "tools/list", &json!({})));
        let first = reply_result(&first).unwrap();
        assert_eq!(Some(first), reply_result(&second));
        assert_eq!(first["tools"].as_array().unwrap().len(), 10);
    }

    #[test]
    fn unknown_tool_is_request_scoped() {
        let mut session = ready();
        let dispatch = session.handle_line(&request_line(
            2,
            "tools/call",
            &json!({"name": "nonexistent_tool", "arguments": {}}),
        ));
        assert!(matches!(dispatch, Dispatch::Reply(_)));
        assert_eq!(error_code(&dispatch), Some(ErrorCode::UnknownTool.code()));
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn argument_error_is_request_scoped() {
        let mut session = ready();
        let dispatch = session.handle_line(&request_line(
            2,
            "tools/call",
            &json!({"name": "calculate_reading_time", "arguments": {"text": "a", "wpm": "fast"}}),
        ));
        assert_eq!(error_code(&dispatch), Some(ErrorCode::InvalidParams.code()));
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn unknown_method_when_ready() {
        let mut session = ready();
        let dispatch = session.handle_line(&request_line(2, "resources/list", &json!({})));
        assert_eq!(error_code(&dispatch), Some(ErrorCode::MethodNotFound.code()));
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn malformed_json_keeps_session() {
        let mut session = ready();
        let dispatch = session.handle_line("{not json");
        assert_eq!(error_code(&dispatch), Some(ErrorCode::ParseError.code()));
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[test]
    fn notifications_are_ignored() {
        let mut session = connected();
        let dispatch =
            session.handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);
        assert!(matches!(dispatch, Dispatch::Ignore));
        assert_eq!(session.state(), SessionState::Initializing);
        assert!(matches!(session.handle_line("   "), Dispatch::Ignore));
    }

    #[test]
    fn ping_requires_ready() {
        let mut session = ready();
        let dispatch = session.handle_line(&request_line(2, "ping", &json!({})));
        assert_eq!(reply_result(&dispatch), Some(&json!({})));
    }

    #[tokio::test]
    async fn prepared_call_produces_tool_result() {
        let mut session = ready();
        let Dispatch::Invoke(call) = session.handle_line(&request_line(
            2,
            "tools/call",
            &json!({
                "name": "extract_dates",
                "arguments": {"text": "Meeting on 2023-12-25 or 12/31/2023"}
            }),
        )) else {
            panic!("Expected Invoke");
        };

        let OutgoingMessage::Response(resp) = call.execute().await else {
            panic!("Expected success response");
        };
        assert_eq!(resp.id, RequestId::Number(2));
        assert_eq!(
            resp.result["structuredContent"]["result"],
            json!(["2023-12-25", "12/31/2023"])
        );
        assert_eq!(resp.result["content"][0]["type"], "text");
    }

    #[tokio::test]
    async fn tool_failure_becomes_execution_error() {
        let mut session = ready();
        let Dispatch::Invoke(call) =
            session.handle_line(&request_line(2, "tools/call", &json!({"name": "explode"})))
        else {
            panic!("Expected Invoke");
        };

        let OutgoingMessage::Error(err) = call.execute().await else {
            panic!("Expected error response");
        };
        assert_eq!(err.error.code, ErrorCode::ToolExecution.code());
        assert!(err.error.message.contains("kaboom"));
    }

    #[tokio::test]
    async fn tool_panic_is_contained() {
        let mut session = ready();
        let Dispatch::Invoke(call) = session.handle_line(&request_line(
            2,
            "tools/call",
            &json!({"name": "panics", "arguments": {"text": "x"}}),
        )) else {
            panic!("Expected Invoke");
        };

        let OutgoingMessage::Error(err) = call.execute().await else {
            panic!("Expected error response");
        };
        assert_eq!(err.error.code, ErrorCode::ToolExecution.code());
        assert!(err.error.message.contains("tool bug"));
        assert_eq!(session.state(), SessionState::Ready);
    }
}
