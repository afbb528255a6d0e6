use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use chatrelay_client::{BridgeClient, MessagingClient, Supervisor};
use chatrelay_gateway::GatewayServer;

mod config;

use config::RelayConfig;

/// Client events buffered between the session and the event pump
const EVENT_BUFFER: usize = 256;

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(version)]
#[command(about = "chatrelay — relay a messaging session to HTTP and WebSocket clients")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway
    Serve,

    /// Write a default config file
    Init,

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Set up logging; RUST_LOG wins when set
    let default_level = if cli.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve => cmd_serve(&cli.config).await,
        Commands::Init => cmd_init(&cli.config).await,
        Commands::Config => cmd_config(&cli.config).await,
    }
}

async fn cmd_serve(config_path: &Option<PathBuf>) -> Result<()> {
    let config = RelayConfig::load(config_path)?;
    let bind = config.gateway.bind_addr()?;

    let client: Arc<dyn MessagingClient> = Arc::new(BridgeClient::new(config.bridge.client_config()));
    let server = GatewayServer::new(bind, config.gateway.auth_token.clone(), client.clone())
        .with_subscriber_buffer(config.gateway.subscriber_buffer);

    let cancel = CancellationToken::new();
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

    let pump = server.event_pump().spawn(event_rx, cancel.clone());
    let supervisor = Supervisor::new(client, config.reconnect.policy(), event_tx).spawn(cancel.clone());
    let mut gateway = server.spawn(cancel.clone());
    info!("chatrelay started (bridge: {})", config.bridge.url);

    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("Shutting down");
        }
        result = &mut gateway => {
            cancel.cancel();
            let _ = pump.await;
            return result.context("Gateway task panicked")?;
        }
    }

    cancel.cancel();
    gateway.await.context("Gateway task panicked")??;
    let _ = pump.await;
    match supervisor.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Messaging session had stopped: {:#}", e),
        Err(e) => error!("Supervisor task panicked: {}", e),
    }
    info!("chatrelay stopped");
    Ok(())
}

async fn cmd_init(config_path: &Option<PathBuf>) -> Result<()> {
    let path = config_path
        .clone()
        .unwrap_or_else(|| config::config_dir().join("config.toml"));

    if path.exists() {
        warn!("Config already exists at {}", path.display());
        return Ok(());
    }
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create config dir: {}", dir.display()))?;
    }

    let default_config = include_str!("../../../config/default.toml");
    tokio::fs::write(&path, default_config)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    info!("Created default config at {}", path.display());
    println!("Edit {} and set API_TOKEN before running `chatrelay serve`.", path.display());
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let config = RelayConfig::load(config_path)?;
    println!("{:#?}", config);
    Ok(())
}
