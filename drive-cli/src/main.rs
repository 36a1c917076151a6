use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod client;

use client::{ControlClient, Progress, SyncParams};

#[derive(Parser)]
#[command(name = "drive-sync")]
#[command(about = "Drive folder sync client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Sync server URL
    #[arg(long, env = "DRIVE_SYNC_SERVER", default_value = "http://localhost:8000")]
    server: String,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Log level
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

#[derive(Subcommand)]
enum Commands {
    /// Check health of the sync server
    Health,
    /// Check whether a folder is readable without recursing
    TestAccess {
        /// Folder id or Drive URL
        folder: String,
        #[arg(long, env = "DRIVE_API_KEY")]
        api_key: Option<String>,
    },
    /// Analyze a folder tree without downloading
    Analyze {
        /// Folder id or Drive URL
        folder: String,
        #[arg(long, env = "DRIVE_API_KEY")]
        api_key: Option<String>,
        #[arg(long)]
        max_depth: Option<usize>,
    },
    /// Start a sync job
    Sync {
        /// Root folder id or Drive URL
        folder: String,
        #[arg(long, env = "DRIVE_API_KEY")]
        api_key: Option<String>,
        #[arg(long)]
        max_depth: Option<usize>,
        /// Download files even if already indexed
        #[arg(long)]
        force: bool,
        /// Return after starting instead of following progress
        #[arg(long)]
        detach: bool,
        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval: u64,
    },
    /// Show progress of a job
    Progress { download_id: String },
    /// Cancel a job
    Cancel { download_id: String },
    /// Make the next sync ignore the duplicate index
    ForceRedownload,
    /// List known jobs
    Jobs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("drive_cli={}", cli.log_level))),
        )
        .with_writer(std::io::stderr)
        .init();

    let client = ControlClient::new(&cli.server, Duration::from_secs(cli.timeout))?;
    let format = cli.format;

    match cli.command {
        Commands::Health => {
            info!("Checking health of sync server at {}", cli.server);
            match client.health().await {
                Ok(health) => {
                    println!("✅ Sync server is healthy");
                    print(format, &health)
                }
                Err(e) => {
                    println!("❌ Failed to check health: {e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::TestAccess { folder, api_key } => {
            let report = client.test_access(&folder, api_key.as_deref()).await?;
            print(format, &report)
        }
        Commands::Analyze { folder, api_key, max_depth } => {
            let analysis = client.analyze(&folder, api_key.as_deref(), max_depth).await?;
            print(format, &analysis)
        }
        Commands::Sync { folder, api_key, max_depth, force, detach, interval } => {
            let params = SyncParams {
                root_folder_id: folder,
                api_key,
                max_depth,
                force_redownload: force,
            };
            let download_id = client.start_sync(&params).await?;
            println!("Started job {}", download_id);

            if detach {
                return Ok(());
            }
            follow(&client, &download_id, Duration::from_millis(interval), format).await
        }
        Commands::Progress { download_id } => print(format, &client.progress(&download_id).await?),
        Commands::Cancel { download_id } => print(format, &client.cancel(&download_id).await?),
        Commands::ForceRedownload => print(format, &client.force_redownload().await?),
        Commands::Jobs => print(format, &client.jobs().await?),
    }
}

/// Poll a job until it finishes. Ctrl+C asks the server to cancel it and
/// keeps polling so the final state is shown.
async fn follow(client: &ControlClient, download_id: &str, every: Duration, format: OutputFormat) -> Result<()> {
    let mut ticker = tokio::time::interval(every);
    let mut cancel_sent = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !cancel_sent => {
                warn!("Interrupted, cancelling job {}", download_id);
                client.cancel(download_id).await?;
                cancel_sent = true;
                continue;
            }
            _ = ticker.tick() => {}
        }

        let raw = client.progress(download_id).await?;
        let progress: Progress = serde_json::from_value(raw.clone())?;
        debug!(status = %progress.status, "Polled progress");
        eprintln!("{}", progress.summary());

        if progress.is_terminal() {
            print(format, &raw)?;
            return match progress.status.as_str() {
                "completed" => Ok(()),
                "cancelled" => bail!("job {} was cancelled", download_id),
                _ => bail!(
                    "job {} failed: {}",
                    download_id,
                    progress.error.as_deref().unwrap_or("unknown error")
                ),
            };
        }
    }
}

fn print<T: Serialize>(format: OutputFormat, value: &T) -> Result<()> {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
    };
    println!("{}", rendered.trim_end());
    Ok(())
}
