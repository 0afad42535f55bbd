//! Model Context Protocol (MCP) session protocol.
//!
//! This module implements the handshake, discovery and tool-invocation
//! protocol used to expose the text tools. Both sides speak JSON-RPC 2.0
//! messages framed one per line.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   lines    ┌─────────────┐     ┌─────────────┐    ┌─────────────┐
//! │  McpClient   │◀──────────▶│  Transport  │────▶│   Session   │───▶│  Registry   │
//! │ (pending ids)│            │ (stdio/TCP) │     │ (lifecycle) │    │   (tools)   │
//! └──────────────┘            └─────────────┘     └─────────────┘    └─────────────┘
//!                                    ▲                   │
//!                                    └──── McpServer ◀───┘
//!                                    (writer task, concurrent calls)
//! ```
//!
//! # Protocol Version
//!
//! This implementation prefers MCP protocol version 2024-11-05 and accepts
//! the versions listed in [`protocol::SUPPORTED_PROTOCOL_VERSIONS`].

pub mod client;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use client::McpClient;
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
pub use server::McpServer;
pub use session::{ServerContext, Session, SessionState};
