use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use dbkit_mcp::auth::AuthService;
use dbkit_mcp::config::{Config, OAuth2Config};
use dbkit_mcp::connector::manager::Manager;
use dbkit_mcp::secret::SecretStore;
use dbkit_mcp::server::McpServer;
use dbkit_mcp::transport;

/// How long to wait for in-flight HTTP work after a termination signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "dbkit-mcp")]
#[command(about = "Multi-tenant database toolbox server over the Model Context Protocol")]
struct Args {
    /// HTTP listen address (empty disables HTTP)
    #[arg(short, long)]
    addr: Option<String>,

    /// Enable the stdio transport (default when no HTTP address is given)
    #[arg(short, long)]
    stdio: bool,

    /// Path to a JSON configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Return tool results in the structured data field instead of text
    #[arg(short = 'd', long = "data")]
    use_data: bool,

    /// Path to a JSON OAuth2 client configuration file
    #[arg(short, long)]
    oauth2config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing — MUST write to stderr, not stdout.
    // The MCP server uses stdout as the JSON-RPC transport; any log line on
    // stdout would corrupt the protocol stream and appear as malformed
    // input to the client.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    info!("dbkit-mcp starting");

    let args = Args::parse();
    sqlx::any::install_default_drivers();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if args.use_data {
        config.use_data = true;
    }
    if let Some(path) = &args.oauth2config {
        let raw = std::fs::read_to_string(path)?;
        let oauth2: OAuth2Config = serde_json::from_str(&raw)?;
        config.connector.policy.oauth2 = Some(oauth2);
        config.connector.policy.require_identity_token = true;
    }
    config.init(args.addr.as_deref());
    config.validate()?;
    let config = Arc::new(config);
    info!("configuration loaded");

    let secrets = Arc::new(SecretStore::new());
    let auth = Arc::new(AuthService::new(config.connector.policy.clone()));
    let manager = Arc::new(
        Manager::new(Arc::new(config.connector.clone()), auth, secrets).await,
    );
    let server = McpServer::new(Arc::clone(&config), Arc::clone(&manager));

    let shutdown = CancellationToken::new();

    let http_task = args.addr.clone().map(|addr| {
        let server = server.clone();
        let manager = Arc::clone(&manager);
        let auth_required = config.connector.policy.oauth2.is_some();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            transport::serve_http(server, manager, &addr, auth_required, shutdown).await
        })
    });

    let use_stdio = args.stdio || args.addr.is_none();
    let mut stdio_task = if use_stdio {
        info!("listening on stdio");
        Some(tokio::spawn(transport::serve_stdio(server)))
    } else {
        None
    };

    let stdio_done = async {
        match stdio_task.as_mut() {
            Some(task) => match task.await {
                Ok(result) => result,
                Err(join_err) => Err(join_err.into()),
            },
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = shutdown_signal() => {
            info!("termination signal received, shutting down");
        }
        result = stdio_done => {
            if let Err(err) = result {
                shutdown.cancel();
                return Err(err.context("stdio server terminated"));
            }
            info!("stdio client disconnected");
        }
    }

    shutdown.cancel();
    if let Some(task) = http_task {
        match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
            Ok(Ok(Err(err))) => tracing::warn!("HTTP server error: {err}"),
            Ok(_) => {}
            Err(_) => tracing::warn!("HTTP server did not stop within the grace period"),
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
