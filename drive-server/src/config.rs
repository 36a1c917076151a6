use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use drive_core::{ApiKey, DEFAULT_API_BASE};
use drive_sync::{EngineOptions, RetentionPolicy, RetryPolicy};

use crate::telemetry::TelemetryConfig;

pub const DEFAULT_CONFIG_FILE: &str = "drive-sync-server.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub drive: DriveSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub cors_permissive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveSettings {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Used when a request carries no key of its own
    #[serde(default)]
    pub api_key: Option<ApiKey>,
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    #[serde(default = "default_listing_concurrency")]
    pub listing_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,
    #[serde(default = "default_max_depth")]
    pub default_max_depth: usize,
    #[serde(default = "default_max_depth_limit")]
    pub max_depth_limit: usize,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(with = "humantime_serde", default = "default_retry_initial_delay")]
    pub retry_initial_delay: Duration,
    #[serde(with = "humantime_serde", default = "default_retry_max_delay")]
    pub retry_max_delay: Duration,
    #[serde(with = "humantime_serde", default = "default_job_timeout")]
    pub job_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_job_retention")]
    pub job_retention: Duration,
    #[serde(with = "humantime_serde", default = "default_sweep_interval")]
    pub sweep_interval: Duration,
    #[serde(default = "default_access_sample_size")]
    pub access_sample_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            cors_permissive: true,
        }
    }
}

impl Default for DriveSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_key: None,
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            listing_concurrency: default_listing_concurrency(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            index_path: default_index_path(),
            default_max_depth: default_max_depth(),
            max_depth_limit: default_max_depth_limit(),
            retry_attempts: default_retry_attempts(),
            retry_initial_delay: default_retry_initial_delay(),
            retry_max_delay: default_retry_max_delay(),
            job_timeout: default_job_timeout(),
            job_retention: default_job_retention(),
            sweep_interval: default_sweep_interval(),
            access_sample_size: default_access_sample_size(),
        }
    }
}

impl ServerConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: ServerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` if given, else the default file when present, else defaults
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path).await,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::load(DEFAULT_CONFIG_FILE).await,
            None => Ok(Self::default()),
        }
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.drive.api_base_url)?;

        if self.sync.retry_attempts == 0 {
            bail!("retry_attempts must be at least 1");
        }
        if self.sync.max_depth_limit == 0 {
            bail!("max_depth_limit must be at least 1");
        }
        if self.sync.default_max_depth == 0 || self.sync.default_max_depth > self.sync.max_depth_limit {
            bail!(
                "default_max_depth must be between 1 and {}",
                self.sync.max_depth_limit
            );
        }
        if self.sync.sweep_interval.is_zero() {
            bail!("sweep_interval must be greater than zero");
        }
        if self.sync.job_timeout.is_zero() {
            bail!("job_timeout must be greater than zero");
        }
        if self.drive.listing_concurrency == 0 {
            bail!("listing_concurrency must be at least 1");
        }

        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            default_max_depth: self.sync.default_max_depth,
            max_depth_limit: self.sync.max_depth_limit,
            listing_concurrency: self.drive.listing_concurrency,
            retry: RetryPolicy {
                max_attempts: self.sync.retry_attempts,
                initial_delay: self.sync.retry_initial_delay,
                max_delay: self.sync.retry_max_delay,
            },
            retention: RetentionPolicy {
                grace_period: self.sync.job_retention,
                job_timeout: self.sync.job_timeout,
            },
            access_sample_size: self.sync.access_sample_size,
        }
    }
}

// Default value functions
fn default_bind_address() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 8000 }
fn default_true() -> bool { true }

fn default_api_base_url() -> String { DEFAULT_API_BASE.to_string() }
fn default_request_timeout() -> Duration { Duration::from_secs(30) }
fn default_connect_timeout() -> Duration { Duration::from_secs(10) }
fn default_listing_concurrency() -> usize { 4 }

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("drive-sync")
}

fn default_download_dir() -> PathBuf { data_dir().join("downloads") }
fn default_index_path() -> PathBuf { data_dir().join("index.json") }
fn default_max_depth() -> usize { 10 }
fn default_max_depth_limit() -> usize { 50 }
fn default_retry_attempts() -> u32 { 3 }
fn default_retry_initial_delay() -> Duration { Duration::from_millis(500) }
fn default_retry_max_delay() -> Duration { Duration::from_secs(5) }
fn default_job_timeout() -> Duration { Duration::from_secs(30 * 60) }
fn default_job_retention() -> Duration { Duration::from_secs(10 * 60) }
fn default_sweep_interval() -> Duration { Duration::from_secs(60) }
fn default_access_sample_size() -> usize { 5 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_survive_toml() {
        let config = ServerConfig::default();
        let raw = toml::to_string_pretty(&config).unwrap();
        let parsed: ServerConfig = toml::from_str(&raw).unwrap();

        assert_eq!(parsed.server.port, 8000);
        assert_eq!(parsed.sync.job_timeout, Duration::from_secs(1800));
        assert_eq!(parsed.sync.download_dir, config.sync.download_dir);
        parsed.validate().unwrap();
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: ServerConfig = toml::from_str(
            r#"
            [server]
            port = 9100

            [sync]
            retry_initial_delay = "250ms"
            job_timeout = "5m"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.server.port, 9100);
        assert_eq!(parsed.server.bind_address, "127.0.0.1");
        assert_eq!(parsed.sync.retry_initial_delay, Duration::from_millis(250));
        assert_eq!(parsed.sync.job_timeout, Duration::from_secs(300));
        assert_eq!(parsed.sync.default_max_depth, 10);

        let options = parsed.engine_options();
        assert_eq!(options.retention.job_timeout, Duration::from_secs(300));
        assert_eq!(options.retry.initial_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_validation() {
        let mut config = ServerConfig::default();
        config.sync.retry_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.sync.default_max_depth = 60;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.drive.api_base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.sync.sweep_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");

        let mut config = ServerConfig::default();
        config.drive.api_key = Some(ApiKey::new("from-config"));
        config.save(&path).await.unwrap();

        let loaded = ServerConfig::load(&path).await.unwrap();
        assert_eq!(loaded.drive.api_key.unwrap().as_str(), "from-config");
    }
}
