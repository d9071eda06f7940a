//! Ingestion configuration
//!
//! Loaded once at startup from the environment (and an optional `.env`),
//! then overridden by command-line flags and validated.

use crate::error::{IngestError, Result};
use crate::store::postgres::DbConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_MANIFEST_URL: &str = "http://data.gdeltproject.org/gdeltv2/masterfilelist.txt";

pub const DEFAULT_BASE_URL: &str = "http://data.gdeltproject.org/gdeltv2/";

pub const DEFAULT_DATA_DIR: &str = "./data";

/// Rows per batch, and therefore per insert transaction.
pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 120;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// HTTP client settings shared by the catalog and file fetches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    /// Attempts per file, including the first one
    pub max_retries: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub manifest_url: String,
    /// Relative URLs found in the manifest are resolved against this
    pub base_url: String,
    /// Staging directory for downloaded files
    pub data_dir: PathBuf,
    pub chunk_size: usize,
    /// Concurrent file tasks
    pub workers: usize,
    pub http: HttpConfig,
    pub database: DbConfig,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Available hardware concurrency, falling back to a single worker
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            manifest_url: DEFAULT_MANIFEST_URL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: default_workers(),
            http: HttpConfig::default(),
            database: DbConfig::default(),
        }
    }
}

impl IngestConfig {
    /// Load from `GDELT_*`, `DATABASE_URL` and `DB_*` variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            manifest_url: std::env::var("GDELT_MANIFEST_URL")
                .unwrap_or_else(|_| DEFAULT_MANIFEST_URL.to_string()),
            base_url: std::env::var("GDELT_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            data_dir: std::env::var("GDELT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR)),
            chunk_size: env_or("GDELT_CHUNK_SIZE", DEFAULT_CHUNK_SIZE),
            workers: env_or("GDELT_WORKERS", default_workers()),
            http: HttpConfig {
                connect_timeout_secs: env_or(
                    "GDELT_HTTP_CONNECT_TIMEOUT_SECS",
                    DEFAULT_CONNECT_TIMEOUT_SECS,
                ),
                read_timeout_secs: env_or("GDELT_HTTP_READ_TIMEOUT_SECS", DEFAULT_READ_TIMEOUT_SECS),
                max_retries: env_or("GDELT_HTTP_MAX_RETRIES", DEFAULT_MAX_RETRIES),
            },
            database: DbConfig::from_env(),
        };

        Ok(config)
    }

    /// Pool size: one connection per worker plus one for watermark and DDL
    pub fn max_connections(&self) -> u32 {
        self.database
            .max_connections
            .unwrap_or_else(|| u32::try_from(self.workers + 1).unwrap_or(u32::MAX))
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.manifest_url)
            .map_err(|e| IngestError::config(format!("invalid manifest URL '{}': {}", self.manifest_url, e)))?;
        Url::parse(&self.base_url)
            .map_err(|e| IngestError::config(format!("invalid base URL '{}': {}", self.base_url, e)))?;

        if self.chunk_size == 0 {
            return Err(IngestError::config("GDELT_CHUNK_SIZE must be greater than 0"));
        }
        if self.workers == 0 {
            return Err(IngestError::config("GDELT_WORKERS must be greater than 0"));
        }
        if self.http.max_retries == 0 {
            return Err(IngestError::config("GDELT_HTTP_MAX_RETRIES must be at least 1"));
        }
        if self.http.connect_timeout_secs == 0 || self.http.read_timeout_secs == 0 {
            return Err(IngestError::config("HTTP timeouts must be greater than 0"));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(IngestError::config("GDELT_DATA_DIR cannot be empty"));
        }

        self.database.validate()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = IngestConfig::default();
        assert_eq!(config.chunk_size, 100_000);
        assert_eq!(config.http.max_retries, 3);
        assert!(config.workers >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = IngestConfig {
            chunk_size: 0,
            ..IngestConfig::default()
        };
        assert!(config.validate().is_err());

        config.chunk_size = 10;
        config.workers = 0;
        assert!(config.validate().is_err());

        config.workers = 2;
        config.manifest_url = "not a url".to_string();
        assert!(config.validate().is_err());

        config.manifest_url = DEFAULT_MANIFEST_URL.to_string();
        config.http.max_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_connections_follows_workers() {
        let mut config = IngestConfig {
            workers: 4,
            ..IngestConfig::default()
        };
        assert_eq!(config.max_connections(), 5);

        config.database.max_connections = Some(2);
        assert_eq!(config.max_connections(), 2);
    }
}
