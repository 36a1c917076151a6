use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

mod api;
mod config;
mod server;
mod telemetry;

use config::{ServerConfig, DEFAULT_CONFIG_FILE};
use server::SyncServer;

#[derive(Parser)]
#[command(name = "drive-sync-server")]
#[command(about = "HTTP control server for recursive Drive folder sync")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level, overrides the configuration file
    #[arg(short, long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Bind address
        #[arg(long)]
        bind: Option<String>,

        /// Port
        #[arg(short, long)]
        port: Option<u16>,

        /// Directory that receives downloaded files
        #[arg(long)]
        download_dir: Option<PathBuf>,
    },
    /// Inspect or generate configuration
    Config {
        #[command(subcommand)]
        action: ConfigActions,
    },
}

#[derive(Subcommand)]
enum ConfigActions {
    /// Validate configuration file
    Validate,
    /// Show effective configuration
    Show,
    /// Generate default configuration
    Generate {
        /// Output path for configuration
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind, port, download_dir } => {
            let mut config = ServerConfig::load_or_default(cli.config.as_deref()).await?;
            if let Some(bind) = bind {
                config.server.bind_address = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(dir) = download_dir {
                config.sync.download_dir = dir;
            }
            if let Some(level) = cli.log_level {
                config.telemetry.log_level = level;
            }
            config.validate()?;

            let _guard = telemetry::init_logging(&config.telemetry)?;
            info!("Starting drive-sync-server v{}", env!("CARGO_PKG_VERSION"));

            let server = SyncServer::new(config).await?;
            server.run().await
        }
        Commands::Config { action } => match action {
            ConfigActions::Validate => validate_config(cli.config).await,
            ConfigActions::Show => show_config(cli.config).await,
            ConfigActions::Generate { output } => generate_config(output).await,
        },
    }
}

async fn validate_config(config_path: Option<PathBuf>) -> Result<()> {
    let path = config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let result = match ServerConfig::load(&path).await {
        Ok(config) => config.validate().map(|_| config),
        Err(e) => Err(e),
    };

    match result {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("Listen address: {}", config.bind_addr());
            println!("Download directory: {}", config.sync.download_dir.display());
            println!("Index file: {}", config.sync.index_path.display());
            Ok(())
        }
        Err(e) => {
            println!("✗ Configuration validation failed: {}", e);
            Err(e)
        }
    }
}

async fn show_config(config_path: Option<PathBuf>) -> Result<()> {
    let config = ServerConfig::load_or_default(config_path.as_deref()).await?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

async fn generate_config(output_path: Option<PathBuf>) -> Result<()> {
    let config = ServerConfig::default();

    if let Some(path) = output_path {
        config.save(&path).await?;
        println!("Configuration generated at {}", path.display());
    } else {
        println!("{}", toml::to_string_pretty(&config)?);
    }

    Ok(())
}
