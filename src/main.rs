use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vidgate::config::{self, Config};

/// Account and session backend
#[derive(Parser)]
#[command(name = "vidgate")]
#[command(about = "Account, session-token and channel-profile REST backend", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "VIDGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level, used when RUST_LOG is unset
    #[arg(long, global = true, env = "VIDGATE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP gateway
    Serve {
        /// Listen host (overrides gateway.host)
        #[arg(long)]
        host: Option<String>,

        /// Listen port (overrides gateway.port)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Validate configuration and print a redacted summary
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let config = Config::load(&config_path)?;

    match cli.command {
        Command::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.gateway.host.clone());
            let port = port.unwrap_or(config.gateway.port);
            vidgate::gateway::run_gateway(&host, port, config).await
        }
        Command::CheckConfig => {
            let settings = config.token_settings()?;
            println!("Config file: {}", config_path.display());
            println!("{:#?}", config.gateway);
            println!("{:#?}", config.auth);
            println!("{settings:#?}");
            println!("Database: {}", config.database_path().display());
            println!("Media root: {}", config.media_root().display());
            println!("Configuration OK");
            Ok(())
        }
    }
}
