//! looplytic-server - stem separation service entry point
//!
//! Startup order:
//! 1. Parse command line
//! 2. Load TOML bootstrap config (missing file = defaults)
//! 3. Initialize tracing, then log build identification
//! 4. Resolve and create the root folder layout
//! 5. Serve until Ctrl+C / SIGTERM, then cancel in-flight jobs

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use looplytic_common::config::{
    default_config_path, write_toml_config, LoggingConfig, RootFolderInitializer,
    RootFolderResolver, TomlConfig,
};
use looplytic_server::config::ServiceConfig;
use looplytic_server::{build_router, AppState};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for looplytic-server
#[derive(Parser, Debug)]
#[command(name = "looplytic-server")]
#[command(about = "Audio stem separation and analysis service")]
#[command(version)]
struct Args {
    /// TOML config file (default: platform config dir)
    #[arg(short, long, env = "LOOPLYTIC_CONFIG")]
    config: Option<PathBuf>,

    /// Folder holding uploads/ and separated/
    #[arg(short, long, env = "LOOPLYTIC_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long, env = "LOOPLYTIC_PORT")]
    port: Option<u16>,

    /// Address to bind (overrides config)
    #[arg(long, env = "LOOPLYTIC_BIND")]
    bind: Option<String>,

    /// Write a config file with default values and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.init_config {
        let path = args
            .config
            .clone()
            .or_else(default_config_path)
            .context("Could not determine config file location")?;
        write_toml_config(&TomlConfig::default(), &path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let mut toml_config =
        TomlConfig::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        toml_config.port = port;
    }
    if let Some(bind) = &args.bind {
        toml_config.bind_address = bind.clone();
    }

    init_tracing(&toml_config.logging)?;

    info!(
        "Starting LoopLytic server (looplytic-server) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    // CLI arg > LOOPLYTIC_ROOT_FOLDER > TOML > compiled default
    let root_folder = RootFolderResolver::new(args.root_folder.clone()).resolve(&toml_config);
    RootFolderInitializer::new(root_folder.clone())
        .ensure_directory_exists()
        .context("Failed to create root folder layout")?;

    let config = ServiceConfig::from_toml(&toml_config, root_folder);
    info!("Python interpreter: {}", config.toolchain.python.display());
    info!(
        "Demucs model: {} ({} output)",
        config.toolchain.model,
        config.toolchain.stem_format.extension()
    );

    let addr = config.listen_addr();
    let shutdown = CancellationToken::new();
    let state = AppState::new(config, shutdown.clone());
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("looplytic-server listening on http://{}", addr);
    info!("Health check: http://{}/api/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// RUST_LOG wins over the configured level
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{},tower_http=info", logging.level)))
        .context("Invalid log level")?;

    match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM and cancels running jobs
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }

    warn!("Cancelling in-flight separation jobs");
    shutdown.cancel();
}
