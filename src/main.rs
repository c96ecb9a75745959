use anyhow::Result;
use clap::{Parser, Subcommand};
use editbridge::config::BridgeConfig;
use editbridge::content::ContentStore;
use editbridge::gateway;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "editbridge",
    about = "Synchronization bridge between a content authority and a cross-origin embedded frontend",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the persistence gateway.
    Serve {
        /// Override the configured bind host.
        #[arg(long)]
        host: Option<String>,
        /// Override the configured bind port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the current content snapshot as JSON.
    Snapshot,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut config = BridgeConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            let store = Arc::new(ContentStore::open(&config.storage.database_path)?);
            gateway::run_gateway(&config, store).await
        }
        Command::Snapshot => {
            let store = ContentStore::open(&config.storage.database_path)?;
            let snapshot = store.snapshot()?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
    }
}
