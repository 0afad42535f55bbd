//! text-tools-mcp: MCP server exposing small text-processing tools
//!
//! Runs the tool server over TCP or stdio, or drives a running server with a
//! scripted client session.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use text_tools_mcp::config::{self, Config, TransportKind};
use text_tools_mcp::error::SessionError;
use text_tools_mcp::mcp::protocol::{ClientInfo, ServerInfo};
use text_tools_mcp::mcp::{McpClient, McpServer, ServerContext};
use text_tools_mcp::tools::text::builtin_registry;

/// MCP server exposing small text-processing tools.
#[derive(Parser, Debug)]
#[command(name = "text-tools-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the tool server (default)
    Serve(ServeArgs),

    /// Connect to a running server and call every tool once
    Client {
        /// Server address
        #[arg(long, default_value = "127.0.0.1:8052")]
        addr: String,
    },
}

#[derive(clap::Args, Debug, Default)]
struct ServeArgs {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Serve a single session over stdin/stdout instead of TCP
    #[arg(long)]
    stdio: bool,

    /// Address to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides config)
    #[arg(long)]
    port: Option<u16>,
}

impl ServeArgs {
    /// Applies command-line overrides on top of the loaded configuration.
    fn apply(&self, cfg: &mut Config) {
        if self.stdio {
            cfg.server.transport = TransportKind::Stdio;
        }
        if let Some(host) = &self.host {
            cfg.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            cfg.server.port = port;
        }
    }
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN,
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
///
/// Logs go to stderr so stdout stays free for the stdio transport.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Entry point for the text-tools-mcp binary.
fn main() -> ExitCode {
    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to create Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match args.command {
        Some(Command::Client { addr }) => {
            init_tracing(get_log_level(args.verbose, args.quiet, "warn"));
            match runtime.block_on(run_client(&addr)) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!(error = %e, "Client session failed");
                    ExitCode::FAILURE
                }
            }
        }
        Some(Command::Serve(serve)) => serve_main(&runtime, &serve, args.verbose, args.quiet),
        None => serve_main(&runtime, &ServeArgs::default(), args.verbose, args.quiet),
    }
}

/// Loads configuration, builds the registry and runs the server.
fn serve_main(
    runtime: &tokio::runtime::Runtime,
    serve: &ServeArgs,
    verbose: u8,
    quiet: bool,
) -> ExitCode {
    let config_path = serve.config.as_deref();
    let mut cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };
    serve.apply(&mut cfg);
    if let Err(e) = cfg.validate() {
        eprintln!("Configuration error: {e}");
        return ExitCode::FAILURE;
    }

    init_tracing(get_log_level(verbose, quiet, &cfg.logging.level));

    info!(
        version = env!("CARGO_PKG_VERSION"),
        name = %cfg.server.name,
        "Starting text-tools-mcp server"
    );

    let registry = match builtin_registry() {
        Ok(registry) => registry,
        Err(e) => {
            error!(error = %e, "Failed to register tools");
            return ExitCode::FAILURE;
        }
    };
    info!(tools = registry.len(), "Tools registered");

    let server = McpServer::new(ServerContext::new(
        ServerInfo::new(cfg.server.name.clone()),
        registry,
    ));

    let result = runtime.block_on(run_server(server, &cfg));

    match result {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

/// Runs the server on the configured transport until shutdown.
async fn run_server(server: McpServer, cfg: &Config) -> std::io::Result<()> {
    match cfg.server.transport {
        TransportKind::Stdio => {
            info!("Serving over stdio");
            server.run_stdio().await
        }
        TransportKind::Tcp => {
            let listener = TcpListener::bind(cfg.server.bind_address()).await?;
            info!(addr = %listener.local_addr()?, "Listening for connections");
            Arc::new(server).run_tcp(listener).await;
            Ok(())
        }
    }
}

/// One scripted call: label, tool name and arguments.
fn demo_calls() -> Vec<(&'static str, &'static str, Value)> {
    vec![
        (
            "Date Extraction",
            "extract_dates",
            json!({"text": "Meeting on 2023-12-25 or 12/31/2023"}),
        ),
        (
            "Email Validation",
            "validate_email",
            json!({"email": "user.name@example.com"}),
        ),
        (
            "Generated Slug",
            "generate_slug",
            json!({"text": "My Awesome Blog Post 2023!"}),
        ),
        (
            "Password Strength",
            "check_password_strength",
            json!({"password": "SecurePass123"}),
        ),
        (
            "Capitalized Name",
            "capitalize_names",
            json!({"name": "jane austin"}),
        ),
        (
            "Hashtags Found",
            "extract_hashtags",
            json!({"text": "Loving #Python and #MachineLearning"}),
        ),
        (
            "Reading Time (mins)",
            "calculate_reading_time",
            json!({"text": "This is a sample article. ".repeat(100)}),
        ),
        (
            "Sentiment Score",
            "basic_sentiment",
            json!({"text": "Great experience but poor customer service"}),
        ),
    ]
}

/// Connects to a server, lists its tools and calls each one.
async fn run_client(addr: &str) -> Result<(), SessionError> {
    let client = McpClient::connect_tcp(addr).await?;
    let init = client.initialize(ClientInfo::default()).await?;
    info!(server = %init.server_info.name, version = %init.protocol_version, "Connected");

    let tools = client.list_tools().await?;
    println!("Available tools:");
    for tool in &tools {
        println!(
            "  - {}: {}",
            tool.name,
            tool.description.as_deref().unwrap_or_default()
        );
    }

    println!("\nCalling tools...");
    for (label, name, arguments) in demo_calls() {
        match client.call_tool(name, arguments).await {
            Ok(result) => println!("{label}: {result}"),
            Err(e) => println!("{label}: error: {e}"),
        }
    }

    client.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn log_level_from_flags() {
        assert_eq!(get_log_level(0, true, "trace"), Level::ERROR);
        assert_eq!(get_log_level(0, false, "debug"), Level::DEBUG);
        assert_eq!(get_log_level(0, false, "bogus"), Level::WARN);
        assert_eq!(get_log_level(2, false, "warn"), Level::DEBUG);
    }

    #[test]
    fn serve_overrides_apply() {
        let args = Args::parse_from(["text-tools-mcp", "serve", "--stdio", "--port", "9001"]);
        let Some(Command::Serve(serve)) = args.command else {
            panic!("expected serve subcommand");
        };
        let mut cfg = Config::default();
        serve.apply(&mut cfg);
        assert_eq!(cfg.server.transport, TransportKind::Stdio);
        assert_eq!(cfg.server.port, 9001);
        assert_eq!(cfg.server.host, "0.0.0.0");
    }

    #[test]
    fn demo_covers_every_builtin() {
        let registry = builtin_registry().unwrap();
        let calls = demo_calls();
        assert_eq!(calls.len(), registry.len());
        for (_, name, _) in calls {
            assert!(registry.lookup(name).is_ok(), "{name}");
        }
    }
}
