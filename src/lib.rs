//! text-tools-mcp: MCP server exposing small text-processing tools
//!
//! A long-lived server advertises named tools with typed arguments; clients
//! discover and invoke them over a persistent line-delimited JSON-RPC
//! connection.
//!
//! # Architecture
//!
//! - **Registry**: tools are registered once at startup and shared read-only
//! - **Session**: each connection runs an explicit handshake state machine
//! - **Correlation**: every request carries an id; responses may arrive in
//!   any order and pending requests fail cleanly when the connection drops
//!
//! # Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`error`]: Error types
//! - [`mcp`]: MCP protocol implementation (client and server)
//! - [`tools`]: Tool registry and the built-in text tools

pub mod config;
pub mod error;
pub mod mcp;
pub mod tools;
