use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the content store service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Blob/preview storage and quota configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Catalog database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// External media tool configuration
    #[serde(default)]
    pub media: MediaConfig,
    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Storage layout and quota limits
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding primary blobs, one file per content id
    #[serde(default = "default_blobs_path")]
    pub blobs_path: PathBuf,
    /// Directory holding preview thumbnails, one file per content id
    #[serde(default = "default_previews_path")]
    pub previews_path: PathBuf,
    /// Largest accepted single blob in bytes
    #[serde(default = "default_file_limit")]
    pub file_limit: u64,
    /// Largest aggregate size of the blobs directory in bytes
    #[serde(default = "default_store_limit")]
    pub store_limit: u64,
    /// Height of generated previews in pixels
    #[serde(default = "default_preview_height")]
    pub preview_height: u32,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// External media tools used for video previews
#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    /// Duration probe executable
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,
    /// Frame extractor executable
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
}

/// API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Shared secret required by mutating requests (empty = unprotected)
    #[serde(default)]
    pub token: String,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "content-store".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_blobs_path() -> PathBuf {
    PathBuf::from("files/blobs")
}

fn default_previews_path() -> PathBuf {
    PathBuf::from("files/previews")
}

fn default_file_limit() -> u64 {
    64 * 1024 * 1024 // 64MiB
}

fn default_store_limit() -> u64 {
    16 * 1024 * 1024 * 1024 // 16GiB
}

fn default_preview_height() -> u32 {
    256
}

fn default_database_path() -> PathBuf {
    PathBuf::from("store.sqlite")
}

fn default_max_connections() -> u32 {
    8
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    1364
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/store").required(false))
            .add_source(config::File::with_name("/etc/content-store/store").required(false))
            // Override with environment variables
            // STORE__STORAGE__FILE_LIMIT -> storage.file_limit
            .add_source(
                config::Environment::with_prefix("STORE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.storage.file_limit == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "storage.file_limit".to_string(),
                message: "Limit must be greater than 0".to_string(),
            });
        }
        if self.storage.store_limit == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "storage.store_limit".to_string(),
                message: "Limit must be greater than 0".to_string(),
            });
        }
        if self.storage.file_limit > self.storage.store_limit {
            return Err(ConfigValidationError::InvalidValue {
                field: "storage.file_limit".to_string(),
                message: "File limit must not exceed the store limit".to_string(),
            });
        }
        if self.storage.preview_height == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "storage.preview_height".to_string(),
                message: "Preview height must be greater than 0".to_string(),
            });
        }
        if self.storage.blobs_path == self.storage.previews_path {
            return Err(ConfigValidationError::InvalidValue {
                field: "storage.previews_path".to_string(),
                message: "Previews must not share the blobs directory".to_string(),
            });
        }
        if self.database.max_connections == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "database.max_connections".to_string(),
                message: "Pool needs at least one connection".to_string(),
            });
        }

        Ok(())
    }

    /// Whether mutating requests must carry the shared secret
    pub fn is_protected(&self) -> bool {
        !self.api.token.is_empty()
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blobs_path: default_blobs_path(),
            previews_path: default_previews_path(),
            file_limit: default_file_limit(),
            store_limit: default_store_limit(),
            preview_height: default_preview_height(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            run_migrations: true,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffprobe_path: default_ffprobe_path(),
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            token: String::new(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(default_api_port(), 1364);
        assert_eq!(default_preview_height(), 256);
        assert_eq!(default_file_limit(), 64 * 1024 * 1024);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
        assert!(!Config::default().is_protected());
    }

    #[test]
    fn test_file_limit_above_store_limit_rejected() {
        let mut config = Config::default();
        config.storage.file_limit = 200;
        config.storage.store_limit = 100;

        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { ref field, .. }) if field == "storage.file_limit"
        ));
    }

    #[test]
    fn test_shared_directories_rejected() {
        let mut config = Config::default();
        config.storage.previews_path = config.storage.blobs_path.clone();

        assert!(config.validate().is_err());
    }
}
