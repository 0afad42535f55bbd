//! End-to-end tests: a real client and server session over an in-memory pipe.
//!
//! Covers the handshake, discovery, every built-in tool, request-scoped
//! failures, session-fatal failures and concurrent invocation.

use std::io;
use std::sync::Arc;

use serde_json::json;
use tokio::task::JoinHandle;
use tokio_test::{assert_err, assert_ok};

use text_tools_mcp::error::SessionError;
use text_tools_mcp::mcp::protocol::{ClientInfo, RequestKind, ServerInfo};
use text_tools_mcp::mcp::transport;
use text_tools_mcp::mcp::{McpClient, McpServer, ServerContext, SessionState};
use text_tools_mcp::tools::text::builtin_registry;
use text_tools_mcp::tools::ToolResult;

const TOOL_NAMES: [&str; 8] = [
    "extract_dates",
    "validate_email",
    "generate_slug",
    "check_password_strength",
    "capitalize_names",
    "extract_hashtags",
    "calculate_reading_time",
    "basic_sentiment",
];

/// Starts a server session on one end of a pipe and a client on the other.
fn connect() -> (McpClient, JoinHandle<io::Result<()>>) {
    let server = Arc::new(McpServer::new(ServerContext::new(
        ServerInfo::default(),
        builtin_registry().unwrap(),
    )));

    let (client_end, server_end) = tokio::io::duplex(64 * 1024);
    let (server_reader, server_writer) = transport::split(server_end);
    let served = tokio::spawn(async move {
        server
            .serve_connection(server_reader, server_writer)
            .await
    });

    let (reader, writer) = transport::split(client_end);
    (McpClient::connect(reader, writer), served)
}

async fn ready_client() -> (McpClient, JoinHandle<io::Result<()>>) {
    let (client, served) = connect();
    assert_ok!(client.initialize(ClientInfo::default()).await);
    (client, served)
}

fn text(s: &str) -> ToolResult {
    ToolResult::Text(s.to_string())
}

fn list(items: &[&str]) -> ToolResult {
    ToolResult::List(items.iter().map(ToString::to_string).collect())
}

#[tokio::test]
async fn handshake_reports_server_identity() {
    let (client, served) = connect();
    assert_eq!(client.state().await, SessionState::Initializing);

    let init = assert_ok!(client.initialize(ClientInfo::default()).await);
    assert_eq!(init.server_info.name, "RandomTools");
    assert_eq!(init.protocol_version, "2024-11-05");
    assert_eq!(client.state().await, SessionState::Ready);
    assert!(client.server_info().await.is_some());

    assert_ok!(client.ping().await);

    client.close().await;
    assert_ok!(served.await.unwrap());
}

#[tokio::test]
async fn discovery_is_ordered_and_idempotent() {
    let (client, served) = ready_client().await;

    let first = assert_ok!(client.list_tools().await);
    let second = assert_ok!(client.list_tools().await);
    assert_eq!(first, second);

    let names: Vec<&str> = first.iter().map(|tool| tool.name.as_str()).collect();
    assert_eq!(names, TOOL_NAMES);
    assert!(first.iter().all(|tool| tool.description.is_some()));

    client.close().await;
    assert_ok!(served.await.unwrap());
}

#[tokio::test]
async fn every_builtin_answers_its_scenario() {
    let (client, served) = ready_client().await;

    let cases = [
        (
            "extract_dates",
            json!({"text": "Meeting on 2023-12-25 or 12/31/2023"}),
            list(&["2023-12-25", "12/31/2023"]),
        ),
        (
            "validate_email",
            json!({"email": "user.name@example.com"}),
            ToolResult::Boolean(true),
        ),
        (
            "generate_slug",
            json!({"text": "My Awesome Blog Post 2023!"}),
            text("my-awesome-blog-post-2023"),
        ),
        (
            "check_password_strength",
            json!({"password": "SecurePass123"}),
            ToolResult::Boolean(true),
        ),
        (
            "capitalize_names",
            json!({"name": "jane austin"}),
            text("Jane Austin"),
        ),
        (
            "extract_hashtags",
            json!({"text": "Loving #Python and #MachineLearning"}),
            list(&["#Python", "#MachineLearning"]),
        ),
        (
            "calculate_reading_time",
            json!({"text": "This is a sample article. ".repeat(100)}),
            ToolResult::Integer(2),
        ),
        (
            "basic_sentiment",
            json!({"text": "Great experience but poor customer service"}),
            ToolResult::Integer(0),
        ),
    ];

    for (name, arguments, expected) in cases {
        let result = assert_ok!(client.call_tool(name, arguments).await);
        assert_eq!(result, expected, "{name}");
    }

    client.close().await;
    assert_ok!(served.await.unwrap());
}

#[tokio::test]
async fn optional_argument_takes_default_or_coerces() {
    let (client, served) = ready_client().await;
    let article = "word ".repeat(600);

    let default_wpm = assert_ok!(
        client
            .call_tool("calculate_reading_time", json!({"text": article}))
            .await
    );
    assert_eq!(default_wpm, ToolResult::Integer(3));

    let explicit = assert_ok!(
        client
            .call_tool("calculate_reading_time", json!({"text": article, "wpm": "100"}))
            .await
    );
    assert_eq!(explicit, ToolResult::Integer(6));

    client.close().await;
    assert_ok!(served.await.unwrap());
}

#[tokio::test]
async fn request_scoped_errors_keep_session_ready() {
    let (client, served) = ready_client().await;

    let err = assert_err!(client.call_tool("nope", json!({})).await);
    assert!(matches!(err, SessionError::UnknownTool(ref name) if name == "nope"));

    let err = assert_err!(client.call_tool("validate_email", json!({})).await);
    assert!(matches!(err, SessionError::Argument(_)));

    let err = assert_err!(
        client
            .call_tool("validate_email", json!({"email": "a@b.co", "extra": 1}))
            .await
    );
    assert!(matches!(err, SessionError::Argument(_)));

    let err = assert_err!(
        client
            .call_tool("calculate_reading_time", json!({"text": "x", "wpm": "fast"}))
            .await
    );
    assert!(matches!(err, SessionError::Argument(_)));

    let err = assert_err!(
        client
            .call_tool("calculate_reading_time", json!({"text": "x", "wpm": 0}))
            .await
    );
    assert!(matches!(err, SessionError::ToolExecution(_)));

    assert_eq!(client.state().await, SessionState::Ready);
    let still_works = assert_ok!(
        client
            .call_tool("capitalize_names", json!({"name": "ada lovelace"}))
            .await
    );
    assert_eq!(still_works, text("Ada Lovelace"));

    client.close().await;
    assert_ok!(served.await.unwrap());
}

#[tokio::test]
async fn discovery_before_handshake_closes_session() {
    let (client, served) = connect();

    let err = assert_err!(client.list_tools().await);
    assert!(matches!(err, SessionError::ProtocolOrder(_)));
    assert_eq!(client.state().await, SessionState::Closed);

    let err = assert_err!(client.ping().await);
    assert!(matches!(err, SessionError::ConnectionClosed));

    assert_ok!(served.await.unwrap());
}

#[tokio::test]
async fn unsupported_version_closes_session() {
    let (client, served) = connect();

    let params = json!({"protocolVersion": "1999-01-01", "capabilities": {}});
    let err = assert_err!(client.send(RequestKind::Initialize, Some(params)).await);
    assert!(matches!(
        err,
        SessionError::VersionMismatch { ref requested } if requested == "1999-01-01"
    ));
    assert_eq!(client.state().await, SessionState::Closed);

    assert_ok!(served.await.unwrap());
}

#[tokio::test]
async fn concurrent_calls_resolve_to_their_own_results() {
    let (client, served) = ready_client().await;

    let (slug, name, email, sentiment) = tokio::join!(
        client.call_tool("generate_slug", json!({"text": "Hello World"})),
        client.call_tool("capitalize_names", json!({"name": "grace hopper"})),
        client.call_tool("validate_email", json!({"email": "not-an-email"})),
        client.call_tool("basic_sentiment", json!({"text": "good great happy"})),
    );

    assert_eq!(assert_ok!(slug), text("hello-world"));
    assert_eq!(assert_ok!(name), text("Grace Hopper"));
    assert_eq!(assert_ok!(email), ToolResult::Boolean(false));
    assert_eq!(assert_ok!(sentiment), ToolResult::Integer(3));
    assert_eq!(client.pending_requests().await, 0);

    client.close().await;
    assert_ok!(served.await.unwrap());
}

#[tokio::test]
async fn server_hangup_fails_outstanding_request() {
    let (client_end, server_end) = tokio::io::duplex(64 * 1024);
    let (reader, writer) = transport::split(client_end);
    let client = McpClient::connect(reader, writer);

    let (mut server_reader, server_writer) = transport::split(server_end);
    let server = async move {
        // Read the request, then hang up without answering
        let line = server_reader.read_line().await.unwrap();
        assert!(line.is_some());
        drop(server_reader);
        drop(server_writer);
    };

    let (result, ()) = tokio::join!(client.ping(), server);
    let err = assert_err!(result);
    assert!(matches!(err, SessionError::ConnectionClosed));
    assert_eq!(client.state().await, SessionState::Closed);
    assert_eq!(client.pending_requests().await, 0);
}

#[tokio::test]
async fn requests_after_close_fail_immediately() {
    let (client, served) = ready_client().await;
    client.close().await;

    let err = assert_err!(
        client
            .call_tool("generate_slug", json!({"text": "late"}))
            .await
    );
    assert!(matches!(err, SessionError::ConnectionClosed));
    assert_ok!(served.await.unwrap());
}
