mod config;
mod error;
mod ingest;
mod platform;
mod relay;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "discord-relay")]
#[command(version)]
#[command(about = "Relays Discord messages from source channels to destination channels")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "DISCORD_RELAY_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the destination connection and the ingestion endpoint
    Relay,

    /// Watch source channels and forward messages to a relay
    Watch,

    /// Validate the configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.verbose {
        "debug"
    } else {
        "info,discord_relay=debug"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    info!("Loading configuration from: {}", cli.config.display());
    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    match cli.command {
        Commands::Relay => {
            config.require_relay()?;
            log_relay_summary(&config);
            platform::discord::run(&config).await?;
        }
        Commands::Watch => {
            config.require_watcher()?;
            log_watcher_summary(&config);
            platform::watcher::run(&config).await?;
        }
        Commands::Check => {
            log_relay_summary(&config);
            log_watcher_summary(&config);
            let relay_ready = config.require_relay();
            let watcher_ready = config.require_watcher();
            info!(
                "Relay mode: {}",
                relay_ready.map_or_else(|e| e.to_string(), |_| "ready".into())
            );
            info!(
                "Watch mode: {}",
                watcher_ready.map_or_else(|e| e.to_string(), |_| "ready".into())
            );
        }
    }

    Ok(())
}

fn log_relay_summary(config: &Config) {
    let limits = config.limits();
    info!("  Destinations: {:?}", config.relay.destination_channel_ids);
    info!(
        "  Ingestion: http://{}{}",
        config.ingest.bind, config.ingest.path
    );
    info!("  Header: {}", config.relay.include_header);
    info!(
        "  Limits: {} chars, {} files, {} embeds",
        limits.max_text, limits.max_files, limits.max_embeds
    );
}

fn log_watcher_summary(config: &Config) {
    info!("  Sources: {:?}", config.watcher.source_channel_ids);
    info!("  Relay endpoint: {}", config.watcher.endpoint);
}
