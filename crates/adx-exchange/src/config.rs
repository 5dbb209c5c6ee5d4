use crate::error::{AdxError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level server configuration, loaded from
/// `<config_dir>/<run_type>.yaml` where `RUN_TYPE` selects dev, test or
/// prod. `CONFIG_PATH` overrides the config directory.
#[derive(Debug, Clone, Deserialize)]
pub struct AdxConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub ssps: Vec<SspConfig>,
    #[serde(default)]
    pub bidders: Vec<BidderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: String,
    #[serde(default = "default_max_log_size_mb")]
    pub max_size_mb: u64,
    #[serde(default = "default_log_rotation")]
    pub rotation: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub use_ssl: bool,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SspConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub qps_limit: u32,
    #[serde(default = "default_ssp_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Statically configured bidder defaults. The live bidder set comes
/// from the object-store definitions; these entries exist for ops
/// tooling and local setups without a definition store.
#[derive(Debug, Clone, Deserialize)]
pub struct BidderConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub endpoint: String,
    #[serde(default = "default_bidder_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub qps_limit: u32,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_read_timeout_ms() -> u64 {
    5000
}
fn default_write_timeout_ms() -> u64 {
    5000
}
fn default_max_connections() -> usize {
    100
}
fn default_shutdown_timeout_ms() -> u64 {
    30_000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_log_size_mb() -> u64 {
    100
}
fn default_log_rotation() -> String {
    "daily".to_string()
}
fn default_scan_interval_secs() -> u64 {
    30
}
fn default_protocol() -> String {
    "openrtb".to_string()
}
fn default_ssp_timeout_ms() -> u64 {
    3000
}
fn default_bidder_timeout_ms() -> u64 {
    2000
}
fn default_enabled() -> bool {
    true
}
fn default_retry_count() -> u32 {
    2
}
fn default_retry_delay_ms() -> u64 {
    100
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: String::new(),
            max_size_mb: default_max_log_size_mb(),
            rotation: default_log_rotation(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl ObjectStoreConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

impl SspConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl AdxConfig {
    /// Load the config file selected by `RUN_TYPE` (default `test`).
    pub fn load(config_dir: Option<&Path>) -> Result<Self> {
        let run_type = std::env::var("RUN_TYPE").unwrap_or_else(|_| "test".to_string());
        if !matches!(run_type.as_str(), "dev" | "test" | "prod") {
            return Err(AdxError::Config(format!(
                "invalid RUN_TYPE: {run_type}, must be 'dev', 'test' or 'prod'"
            )));
        }

        let dir = match config_dir {
            Some(d) => d.to_path_buf(),
            None => Self::default_config_dir(),
        };
        let path = dir.join(format!("{run_type}.yaml"));
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AdxError::Config(format!("failed to read {path:?}: {e}")))?;

        let config: AdxConfig = serde_yaml::from_str(&contents)
            .map_err(|e| AdxError::Config(format!("failed to parse {path:?}: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    fn default_config_dir() -> PathBuf {
        match std::env::var("CONFIG_PATH") {
            Ok(p) => PathBuf::from(p).join("conf"),
            Err(_) => PathBuf::from("conf"),
        }
    }

    fn validate(&self) -> Result<()> {
        for ssp in &self.ssps {
            if ssp.id.is_empty() {
                return Err(AdxError::Config("SSP with empty id".to_string()));
            }
        }
        for bidder in &self.bidders {
            if bidder.id.is_empty() {
                return Err(AdxError::Config("bidder with empty id".to_string()));
            }
        }
        Ok(())
    }

    pub fn enabled_ssps(&self) -> impl Iterator<Item = &SspConfig> {
        self.ssps.iter().filter(|s| s.enabled)
    }
}
