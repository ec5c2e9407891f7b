//! Gemini Proxy daemon - records every Gemini API call on its way through

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use gemini_proxy::config::{API_KEY_ENV, Config};
use gemini_proxy::error::Result;
use gemini_proxy::interaction::InteractionLogger;
use gemini_proxy::proxy::ProxyServer;
use gemini_proxy::storage;

/// Gemini Proxy - Transparent HTTP proxy that logs every Gemini API interaction
#[derive(Parser)]
#[command(name = "gemini-proxy")]
#[command(about = "A transparent HTTP proxy that logs every Gemini API interaction")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the proxy server (default command)
    #[command(name = "serve")]
    Serve,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => serve(cli.config).await,
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,gemini_proxy=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    // A missing .env is normal; variables may come from the real environment.
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!("Loaded environment from {}", path.display());
    }

    let mut config = Config::load(config_path)?;
    config.apply_env(|name| std::env::var(name).ok());
    Ok(config)
}

async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    tracing::info!("Starting Gemini proxy");

    let config = load_config(config_path)?;
    tracing::debug!("Config loaded: {:?}", config);

    if config.proxy.api_key.is_none() {
        tracing::warn!(
            "{API_KEY_ENV} is not set; requests are forwarded with whatever key the caller supplies"
        );
    }

    let store = storage::connect(&config.storage).await?;
    tracing::info!("Interaction store ready ({})", store.backend());

    let logger = InteractionLogger::new(store);
    let server = ProxyServer::new(config.proxy, logger);
    server.serve().await
}
