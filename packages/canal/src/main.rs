use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod auth;
mod cli;
mod client;
mod config;
mod db;
mod error;
mod handlers;
mod metrics;
mod models;
mod repository;
#[cfg(test)]
mod test_helpers;
mod ws;

use crate::auth::AuthState;
use crate::config::{AuthConfig, CanalConfig, FileConfig, ServerConfig};
use crate::db::Database;
use crate::metrics::ServerMetrics;
use crate::repository::ContactRepository;
use crate::ws::SessionRegistry;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "canal")]
#[command(about = "Realtime contact channel between the operator and psychologists")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Custom data directory (defaults to ~/.canal)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server in the foreground
    Server(ServerArgs),

    /// Open the interactive chat terminal
    Chat(ChatArgs),

    /// Send a single message and exit
    Send(SendArgs),
}

#[derive(Parser)]
struct ServerArgs {
    /// Port to listen on (overrides [server] port in canal.toml)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides [server] host in canal.toml)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Clean start - reset database (prompt for confirmation)
    #[arg(long)]
    reset_db: bool,
}

#[derive(Parser)]
struct ChatArgs {
    /// Identity to connect as, e.g. "admin" or "psychologist:3"
    identity: Option<String>,
}

#[derive(Parser)]
struct SendArgs {
    /// Message text
    content: String,

    /// Send toward this psychologist, opening the conversation on first
    /// contact (operator only)
    #[arg(long)]
    to: Option<i64>,

    /// Send into this conversation
    #[arg(long)]
    conversation: Option<i64>,

    /// Identity to send as, e.g. "admin" or "psychologist:3"
    #[arg(long)]
    identity: Option<String>,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub db: Arc<Database>,
    pub repository: Arc<ContactRepository>,
    /// One live socket per identity
    pub registry: SessionRegistry,
    /// Server metrics for observability
    pub metrics: Arc<ServerMetrics>,
    /// Server runtime configuration
    pub server_config: Arc<ServerConfig>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = CanalConfig::new(cli.data_dir.clone())?;

    match cli.command {
        // Bare `canal`: open the chat terminal with the configured identity
        None => cli::chat_command(&config, None).await,
        Some(Commands::Chat(args)) => cli::chat_command(&config, args.identity).await,
        Some(Commands::Send(args)) => {
            cli::send_command(
                &config,
                args.identity,
                args.to,
                args.conversation,
                args.content,
            )
            .await
        }
        Some(Commands::Server(args)) => run_server(args, config).await,
    }
}

async fn run_server(args: ServerArgs, config: CanalConfig) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "canal=debug,tower_http=debug,info"
    } else {
        "canal=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting Canal - operator/psychologist contact channel");

    // Handle database reset if requested
    if args.reset_db && config.db_path.exists() {
        println!("This will delete all stored conversations!");
        print!("Are you sure? (yes/no): ");
        use std::io::{self, Write};
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if input.trim() == "yes" {
            config.reset_database()?;
            println!("Database reset.");
        } else {
            println!("Cancelled.");
        }
    }

    let file_config: FileConfig = config::load_config(&config.data_dir)
        .extract()
        .context("Invalid configuration")?;

    // Initialize auth config
    let auth_config = Arc::new(AuthConfig::from_file(&file_config.auth)?);
    if auth_config.enabled {
        info!(
            "Authentication ENABLED ({} credential(s) in [auth.tokens])",
            auth_config.tokens.len()
        );
        if auth_config.tokens.is_empty() {
            warn!("[auth] is enabled with an empty [auth.tokens] table; every request will be rejected");
        }
    } else {
        info!("Authentication disabled (set CANAL_AUTH__ENABLED=true to enable)");
    }

    // Initialize server runtime config
    let server_config = Arc::new(ServerConfig::from_file(&file_config.server));

    // Initialize database
    info!("Initializing database...");
    let db = Arc::new(Database::new(&config).await?);
    let repository = Arc::new(ContactRepository::new(db.pool.clone()));

    // Initialize metrics and the per-identity socket registry
    let metrics = Arc::new(ServerMetrics::new());
    let registry = SessionRegistry::new();

    let app_state = AppState {
        db: db.clone(),
        repository,
        registry,
        metrics,
        server_config,
    };

    // Build auth sub-state
    let auth_state = AuthState {
        auth_config: auth_config.clone(),
    };

    // Build routes
    let app = Router::new()
        // Conversation routes
        .route("/api/conversations", get(handlers::list_conversations))
        .route("/api/conversations/me", get(handlers::get_my_conversation))
        .route(
            "/api/conversations/{id}/messages",
            get(handlers::get_history),
        )
        // Message creation
        .route("/api/messages", post(handlers::create_message))
        // Realtime relay
        .route("/ws", get(ws::websocket_handler))
        // Health endpoints
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler))
        // Identity resolution runs for every route; public ones pass through
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            auth::auth_middleware,
        ))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let host = args
        .host
        .or(file_config.server.host)
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let port = args.port.or(file_config.server.port).unwrap_or(7740);
    let addr = format!("{}:{}", host, port).parse::<SocketAddr>()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Canal listening on http://{}", actual_addr);
    info!("");
    info!("API endpoints:");
    info!("  GET    /api/conversations              - Operator's conversation list");
    info!("  GET    /api/conversations/me           - Calling psychologist's channel");
    info!("  GET    /api/conversations/:id/messages - History window");
    info!("  POST   /api/messages                   - Create a message");
    info!("  GET    /ws                             - Realtime relay socket");

    // Create shutdown signal handler
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received shutdown signal, cleaning up...");
    };

    // Run server with graceful shutdown
    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error");

    info!("Shutdown complete");
    server_result
}
