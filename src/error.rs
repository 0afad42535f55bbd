//! Error types for text-tools-mcp.
//!
//! Two families live here:
//!
//! - [`ConfigError`]: failures while loading the configuration file.
//! - [`SessionError`]: the protocol error taxonomy shared by the server
//!   session and the client. Each variant maps to a JSON-RPC error code so a
//!   client can rebuild the typed error from the wire.

use std::path::PathBuf;

use serde_json::{json, Value};
use thiserror::Error;

use crate::mcp::protocol::{ErrorCode, JsonRpcErrorData};

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// Errors surfaced by a protocol session.
///
/// Request-scoped variants travel back as an error response and leave the
/// session running. [`SessionError::is_session_fatal`] identifies the ones
/// that terminate it.
#[derive(Error, Debug)]
pub enum SessionError {
    /// A message arrived out of the handshake sequence.
    #[error("protocol order violation: {0}")]
    ProtocolOrder(String),

    /// The client asked for a protocol version the server does not speak.
    #[error("unsupported protocol version: {requested}")]
    VersionMismatch {
        /// Version string sent by the client.
        requested: String,
    },

    /// The invocation named a tool that is not registered.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The invocation arguments failed schema validation.
    #[error("invalid arguments: {0}")]
    Argument(String),

    /// The tool callable itself failed.
    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    /// The transport ended while the request was outstanding.
    #[error("connection closed")]
    ConnectionClosed,

    /// Any other JSON-RPC error reported by the peer.
    #[error("JSON-RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i32,
        /// Error message.
        message: String,
    },

    /// Reading or writing the transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// A message could not be encoded or decoded.
    #[error("malformed message: {0}")]
    Codec(#[from] serde_json::Error),
}

impl SessionError {
    /// Returns the JSON-RPC error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::ProtocolOrder(_) => ErrorCode::ProtocolOrder,
            Self::VersionMismatch { .. } => ErrorCode::VersionMismatch,
            Self::UnknownTool(_) => ErrorCode::UnknownTool,
            Self::Argument(_) => ErrorCode::InvalidParams,
            Self::ToolExecution(_) => ErrorCode::ToolExecution,
            Self::ConnectionClosed => ErrorCode::ConnectionClosed,
            Self::Rpc { code, .. } => ErrorCode::from_code(*code),
            Self::Transport(_) | Self::Codec(_) => ErrorCode::InternalError,
        }
    }

    /// Short machine-readable name, sent as `data.kind` on the wire.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ProtocolOrder(_) => "protocol_order",
            Self::VersionMismatch { .. } => "version_mismatch",
            Self::UnknownTool(_) => "unknown_tool",
            Self::Argument(_) => "argument",
            Self::ToolExecution(_) => "tool_execution",
            Self::ConnectionClosed => "connection_closed",
            Self::Rpc { .. } => "rpc",
            Self::Transport(_) => "transport",
            Self::Codec(_) => "codec",
        }
    }

    /// Whether this error terminates the session.
    #[must_use]
    pub const fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::ProtocolOrder(_)
                | Self::VersionMismatch { .. }
                | Self::ConnectionClosed
                | Self::Transport(_)
        )
    }

    fn detail(&self) -> String {
        match self {
            Self::ProtocolOrder(detail)
            | Self::UnknownTool(detail)
            | Self::Argument(detail)
            | Self::ToolExecution(detail) => detail.clone(),
            Self::VersionMismatch { requested } => requested.clone(),
            Self::Rpc { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Converts this error into its wire representation.
    #[must_use]
    pub fn to_wire(&self) -> JsonRpcErrorData {
        JsonRpcErrorData::with_message(self.code(), self.to_string()).with_data(json!({
            "kind": self.kind(),
            "detail": self.detail(),
        }))
    }

    /// Rebuilds a typed error from a JSON-RPC error object.
    #[must_use]
    pub fn from_wire(error: &JsonRpcErrorData) -> Self {
        let detail = error
            .data
            .as_ref()
            .and_then(|d| d.get("detail"))
            .and_then(Value::as_str)
            .map_or_else(|| error.message.clone(), str::to_string);

        match ErrorCode::from_code(error.code) {
            ErrorCode::ProtocolOrder => Self::ProtocolOrder(detail),
            ErrorCode::VersionMismatch => Self::VersionMismatch { requested: detail },
            ErrorCode::UnknownTool => Self::UnknownTool(detail),
            ErrorCode::InvalidParams => Self::Argument(detail),
            ErrorCode::ToolExecution => Self::ToolExecution(detail),
            ErrorCode::ConnectionClosed => Self::ConnectionClosed,
            _ => Self::Rpc {
                code: error.code,
                message: error.message.clone(),
            },
        }
    }
}
