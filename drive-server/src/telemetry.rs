//! Logging and Prometheus metrics for the server
//!
//! - Console logging, compact or JSON
//! - Optional JSON log file with rotation
//! - Request and job metrics exposed at `/metrics`

use anyhow::Result;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use drive_sync::{JobStatus, SyncEngine};

/// Telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// JSON console output instead of compact lines
    #[serde(default)]
    pub json_logging: bool,
    #[serde(default = "default_true")]
    pub console_logging: bool,
    /// JSON log file; no file logging when unset
    #[serde(default)]
    pub log_file_path: Option<PathBuf>,
    #[serde(default)]
    pub log_rotation: LogRotation,
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Daily,
    Hourly,
    Never,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: false,
            console_logging: true,
            log_file_path: None,
            log_rotation: LogRotation::Daily,
            metrics_enabled: true,
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

fn level_filter(level: &str) -> EnvFilter {
    let level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "drive_sync_server={level},drive_server={level},drive_sync={level},drive_core={level},tower_http=info",
            level = level
        ))
    })
}

/// Install the global subscriber. The returned guard flushes the log file
/// and must live as long as the process.
pub fn init_logging(config: &TelemetryConfig) -> Result<Option<WorkerGuard>> {
    let json_console = (config.console_logging && config.json_logging)
        .then(|| fmt::layer().json().with_current_span(true));
    let plain_console = (config.console_logging && !config.json_logging)
        .then(|| fmt::layer().with_target(true).compact());

    let (file_layer, guard) = match &config.log_file_path {
        Some(log_path) => {
            let directory = log_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(directory)?;
            let file_name = log_path
                .file_name()
                .unwrap_or_else(|| OsStr::new("drive-sync-server.log"));

            let appender = match config.log_rotation {
                LogRotation::Daily => rolling::daily(directory, file_name),
                LogRotation::Hourly => rolling::hourly(directory, file_name),
                LogRotation::Never => rolling::never(directory, file_name),
            };
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .json()
                .with_current_span(true)
                .with_span_list(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(level_filter(&config.log_level))
        .with(json_console)
        .with(plain_console)
        .with(file_layer)
        .try_init()?;

    info!(
        level = %config.log_level,
        file = ?config.log_file_path,
        "Logging initialized"
    );
    Ok(guard)
}

/// Prometheus registry and collectors
#[derive(Clone)]
pub struct ServerMetrics {
    registry: Registry,
    pub requests_total: IntCounterVec,
    pub jobs_started_total: IntCounter,
    pub jobs: IntGaugeVec,
    pub index_entries: IntGauge,
}

impl ServerMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("drive_sync_requests_total", "Total control protocol requests"),
            &["endpoint"],
        )?;

        let jobs_started_total = IntCounter::new(
            "drive_sync_jobs_started_total",
            "Total number of sync jobs started",
        )?;

        let jobs = IntGaugeVec::new(
            Opts::new("drive_sync_jobs", "Jobs held in the registry by status"),
            &["status"],
        )?;

        let index_entries = IntGauge::new(
            "drive_sync_index_entries",
            "Files recorded in the duplicate index",
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(jobs_started_total.clone()))?;
        registry.register(Box::new(jobs.clone()))?;
        registry.register(Box::new(index_entries.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            jobs_started_total,
            jobs,
            index_entries,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn request(&self, endpoint: &str) {
        self.requests_total.with_label_values(&[endpoint]).inc();
    }

    /// Refresh gauges from the engine and encode everything as text
    pub fn render(&self, engine: &SyncEngine) -> Result<String> {
        let counts = engine.registry().status_counts();
        for status in [
            JobStatus::Analyzing,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Error,
            JobStatus::Cancelled,
        ] {
            let count = counts.get(&status).copied().unwrap_or(0);
            self.jobs.with_label_values(&[status.as_str()]).set(count as i64);
        }
        self.index_entries.set(engine.index().len() as i64);

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_defaults() {
        let parsed: TelemetryConfig = toml::from_str("log_rotation = \"hourly\"").unwrap();
        assert_eq!(parsed.log_level, "info");
        assert_eq!(parsed.log_rotation, LogRotation::Hourly);
        assert!(parsed.console_logging);
        assert!(parsed.log_file_path.is_none());
    }

    #[test]
    fn test_metrics_register() {
        let metrics = ServerMetrics::new().unwrap();
        metrics.request("sync");
        metrics.request("sync");
        metrics.jobs_started_total.inc();

        assert_eq!(metrics.requests_total.with_label_values(&["sync"]).get(), 2);
        let families = metrics.registry().gather();
        assert!(families.iter().any(|f| f.get_name() == "drive_sync_jobs_started_total"));
    }
}
