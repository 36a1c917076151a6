use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use drive_core::DriveClientBuilder;
use drive_sync::{DuplicateIndex, LocalStore, SyncEngine};

use crate::api::{self, AppState};
use crate::config::ServerConfig;
use crate::telemetry::ServerMetrics;

/// HTTP front end around one sync engine
pub struct SyncServer {
    config: ServerConfig,
    engine: SyncEngine,
    metrics: ServerMetrics,
    shutdown: CancellationToken,
}

impl SyncServer {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let client = DriveClientBuilder::new(config.drive.api_base_url.clone())
            .timeout(config.drive.request_timeout)
            .connect_timeout(config.drive.connect_timeout)
            .user_agent(concat!("drive-sync-server/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build Drive client")?;

        let index = DuplicateIndex::open(&config.sync.index_path)
            .await
            .with_context(|| format!("failed to open index at {}", config.sync.index_path.display()))?;
        info!(
            path = %config.sync.index_path.display(),
            entries = index.len(),
            "Duplicate index loaded"
        );

        tokio::fs::create_dir_all(&config.sync.download_dir)
            .await
            .with_context(|| format!("failed to create {}", config.sync.download_dir.display()))?;
        let store = LocalStore::new(&config.sync.download_dir);

        let engine = SyncEngine::new(Arc::new(client), Arc::new(index), store, config.engine_options());

        Ok(Self {
            config,
            engine,
            metrics: ServerMetrics::new()?,
            shutdown: CancellationToken::new(),
        })
    }

    pub async fn run(self) -> Result<()> {
        let reaper = self
            .engine
            .spawn_reaper(self.config.sync.sweep_interval, self.shutdown.child_token());

        let state = AppState {
            engine: self.engine.clone(),
            metrics: self.metrics.clone(),
            default_key: self.config.drive.api_key.clone(),
        };
        let app = api::router(
            state,
            self.config.server.cors_permissive,
            self.config.telemetry.metrics_enabled,
        );

        let bind_addr = self.config.bind_addr();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", bind_addr))?;
        info!("Drive sync server listening on {}", bind_addr);

        let shutdown = self.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = shutdown.cancelled() => {}
                }
            })
            .await?;

        self.shutdown.cancel();
        if let Err(e) = reaper.await {
            warn!("Job reaper ended abnormally: {}", e);
        }
        self.stop().await
    }

    async fn stop(&self) -> Result<()> {
        let cancelled = self.engine.cancel_all();
        if cancelled > 0 {
            info!(jobs = cancelled, "Cancelled running jobs");
        }

        if let Err(e) = self.engine.index().persist().await {
            error!("Failed to persist duplicate index: {}", e);
            return Err(e.into());
        }

        info!("Drive sync server stopped");
        Ok(())
    }
}
