use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use screenlink::config::ConfigStore;
use screenlink::state::AppState;
use screenlink::web;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// screenlink command line arguments
#[derive(Parser, Debug)]
#[command(name = "screenlink")]
#[command(version, about = "Screen sharing relay for remote viewers", long_about = None)]
struct CliArgs {
    /// Listen address (overrides database config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// HTTP port (overrides database config)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Data directory path (default: /var/lib/screenlink)
    #[arg(short = 'd', long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting screenlink v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg takes precedence
    let data_dir = args.data_dir.unwrap_or_else(get_data_dir);
    tracing::info!("Data directory: {}", data_dir.display());
    tokio::fs::create_dir_all(&data_dir).await?;

    let config_store = ConfigStore::new(&data_dir.join("screenlink.db")).await?;

    // Apply CLI argument overrides to config (only if explicitly specified)
    if args.address.is_some() || args.port.is_some() {
        config_store
            .update(|config| {
                if let Some(addr) = args.address {
                    config.web.bind_address = addr;
                }
                if let Some(port) = args.port {
                    config.web.http_port = port;
                }
            })
            .await?;
    }

    let config = config_store.get();
    tracing::info!(
        "Transports: peer {}, socket {} (fallback after {}ms, max {} sessions)",
        config.transport.peer_enabled,
        config.transport.socket_enabled,
        config.transport.fallback_timeout_ms,
        config.transport.max_sessions
    );

    let bind_ip: IpAddr = config
        .web
        .bind_address
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid bind address: {}", config.web.bind_address))?;
    let bind_addr = SocketAddr::new(bind_ip, config.web.http_port);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let state = AppState::new(config_store, shutdown_tx.clone());

    state.pipeline.start();
    state.spawn_maintenance();

    let app = web::create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("Starting HTTP server on {}", listener.local_addr()?);

    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    };

    tokio::select! {
        _ = shutdown_signal => {
            cleanup(&state);
        }
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!("HTTP server error: {}", e);
            }
            cleanup(&state);
        }
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "screenlink=error,tower_http=error",
        LogLevel::Warn => "screenlink=warn,tower_http=warn",
        LogLevel::Info => "screenlink=info,tower_http=info",
        LogLevel::Verbose => "screenlink=debug,tower_http=info",
        LogLevel::Debug => "screenlink=debug,tower_http=debug",
        LogLevel::Trace => "screenlink=trace,tower_http=debug",
    };

    // RUST_LOG takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the application data directory
fn get_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var("SCREENLINK_DATA_DIR") {
        return PathBuf::from(path);
    }
    PathBuf::from("/var/lib/screenlink")
}

/// Stop background work and close remaining sessions
fn cleanup(state: &Arc<AppState>) {
    let sessions = state.sessions.list();
    for session in &sessions {
        state.end_session(session.session_id, "server shutdown");
    }
    if !sessions.is_empty() {
        tracing::info!("Closed {} sessions", sessions.len());
    }

    state.pipeline.stop();
    tracing::info!("Frame pipeline stopped");
}
