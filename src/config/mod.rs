//! Configuration management for pollsync

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Default API base URL
pub const DEFAULT_API_BASE_URL: &str = "https://api.pollsync.app/api/v1";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL all endpoints are resolved against
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Sent as `Accept-Language` on every request
    #[serde(default = "default_language")]
    pub language: String,

    /// Location of the persistent store (defaults to the platform data dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

/// Request gateway tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_cache_duration_secs")]
    pub cache_duration_secs: u64,

    #[serde(default = "default_cache_sweep_interval_secs")]
    pub cache_sweep_interval_secs: u64,

    /// Per-attempt deadline
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before retry `n` (0-based) is `backoff_base_ms * 2^n`
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

/// Telemetry queue tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Buffer size that triggers an immediate flush
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,

    #[serde(default = "default_telemetry_endpoint")]
    pub endpoint: String,
}

/// Offline sync engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_sync_interval_secs")]
    pub interval_secs: u64,

    /// Failed replays before a mutation is dead-lettered
    #[serde(default = "default_sync_max_attempts")]
    pub max_attempts: u32,

    /// Mutations older than this are dead-lettered instead of replayed
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u64,

    /// Read-only collections refreshed on every run
    #[serde(default = "default_snapshots")]
    pub snapshots: Vec<SnapshotSpec>,
}

/// A locally mirrored read-only collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSpec {
    /// Name under the `snapshot.` store namespace
    pub key: String,
    pub endpoint: String,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cache_duration_secs() -> u64 {
    5 * 60
}

fn default_cache_sweep_interval_secs() -> u64 {
    60 * 60
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    100
}

fn default_flush_interval_secs() -> u64 {
    30
}

fn default_session_timeout_secs() -> u64 {
    30 * 60
}

fn default_telemetry_endpoint() -> String {
    "/analytics/events".to_string()
}

fn default_sync_interval_secs() -> u64 {
    5 * 60
}

fn default_sync_max_attempts() -> u32 {
    10
}

fn default_max_age_hours() -> u64 {
    7 * 24
}

fn default_snapshots() -> Vec<SnapshotSpec> {
    vec![SnapshotSpec {
        key: "active_surveys".to_string(),
        endpoint: "/surveys/active".to_string(),
    }]
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            cache_duration_secs: default_cache_duration_secs(),
            cache_sweep_interval_secs: default_cache_sweep_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

impl GatewayConfig {
    pub fn cache_duration(&self) -> Duration {
        Duration::from_secs(self.cache_duration_secs)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: default_batch_size(),
            flush_interval_secs: default_flush_interval_secs(),
            session_timeout_secs: default_session_timeout_secs(),
            endpoint: default_telemetry_endpoint(),
        }
    }
}

impl TelemetryConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sync_interval_secs(),
            max_attempts: default_sync_max_attempts(),
            max_age_hours: default_max_age_hours(),
            snapshots: default_snapshots(),
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.max_age_hours as i64)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            language: default_language(),
            store_path: None,
            gateway: GatewayConfig::default(),
            telemetry: TelemetryConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl Config {
    /// Get the default config file path (~/.pollsync/config.yaml)
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::Invalid(
            "Could not determine home directory".to_string(),
        ))?;

        Ok(home.join(".pollsync").join("config.yaml"))
    }

    /// Load from an explicit path, or fall back to defaults when the default
    /// location has no file yet.
    pub fn load_at(path: Option<&str>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from(Path::new(p)),
            None => {
                let default = Self::default_path()?;
                if default.exists() {
                    Self::load_from(&default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()).into());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents).map_err(ConfigError::from)?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents =
            serde_yaml::to_string(self).map_err(|e| ConfigError::SaveError(e.to_string()))?;

        std::fs::write(path, contents)?;

        // Set file permissions to 600 on Unix systems
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }

        Ok(())
    }

    /// Reject settings that would stall the gateway or queues
    pub fn validate(&self) -> Result<()> {
        if self.gateway.max_attempts == 0 {
            return Err(ConfigError::Invalid("gateway.max_attempts must be at least 1".into()).into());
        }
        if self.telemetry.batch_size == 0 {
            return Err(ConfigError::Invalid("telemetry.batch_size must be at least 1".into()).into());
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            return Err(ConfigError::Invalid(format!(
                "api_base_url must be an http(s) URL, got {}",
                self.api_base_url
            ))
            .into());
        }
        Ok(())
    }

    /// Resolve the store location, creating nothing
    pub fn resolved_store_path(&self) -> Option<PathBuf> {
        self.store_path
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("pollsync").join("store.db")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.gateway.cache_duration(), Duration::from_secs(300));
        assert_eq!(config.gateway.cache_sweep_interval(), Duration::from_secs(3600));
        assert_eq!(config.gateway.max_attempts, 3);
        assert_eq!(config.telemetry.batch_size, 100);
        assert_eq!(config.telemetry.flush_interval(), Duration::from_secs(30));
        assert_eq!(config.telemetry.session_timeout(), Duration::from_secs(1800));
        assert_eq!(config.sync.interval(), Duration::from_secs(300));
        assert_eq!(config.sync.snapshots.len(), 1);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "api_base_url: http://localhost:8080\ngateway:\n  max_attempts: 5\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.api_base_url, "http://localhost:8080");
        assert_eq!(config.gateway.max_attempts, 5);
        assert_eq!(config.gateway.cache_duration_secs, 300);
        assert_eq!(config.telemetry.endpoint, "/analytics/events");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = Config::default();
        config.language = "de".to_string();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.language, "de");
    }

    #[test]
    fn test_load_missing_explicit_path() {
        let result = Config::load_at(Some("/definitely/not/here/config.yaml"));
        assert!(matches!(
            result,
            Err(crate::error::Error::Config(ConfigError::NotFound(_)))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = Config::default();
        config.gateway.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_http_url() {
        let mut config = Config::default();
        config.api_base_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());
    }
}
