use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub files: FilesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    pub admin_token: String,
    pub hmac_key: String,
}

// Keeps secrets out of startup logs
impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("admin_token", &"<redacted>")
            .field("hmac_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilesConfig {
    /// Largest accepted upload, in bytes.
    pub max_size: u64,
    pub ttl_secs: i64,
    /// Zero disables the background sweeper.
    pub sweep_interval_secs: u64,
}

impl FilesConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("{} must be set", key))
        };
        let or_default = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let config = Self {
            server: ServerConfig {
                port: or_default("PORT", "8080")
                    .parse()
                    .context("PORT must be a port number")?,
                host: or_default("HOST", "0.0.0.0"),
            },
            database: DatabaseConfig {
                path: required("FILES_STASH_DB_PATH")?,
                max_connections: or_default("DB_MAX_CONNECTIONS", "5")
                    .parse()
                    .context("DB_MAX_CONNECTIONS must be a positive integer")?,
            },
            storage: StorageConfig {
                data_dir: PathBuf::from(required("FILES_STASH_DATA_DIR")?),
            },
            auth: AuthConfig {
                admin_token: required("FILES_STASH_ADMIN_TOKEN")?,
                hmac_key: required("FILES_STASH_HMAC_KEY")?,
            },
            files: FilesConfig {
                max_size: or_default("FILES_STASH_MAX_SIZE", "10485760")
                    .parse()
                    .context("FILES_STASH_MAX_SIZE must be a byte count")?,
                ttl_secs: or_default("FILES_STASH_TTL_SECS", "86400")
                    .parse()
                    .context("FILES_STASH_TTL_SECS must be a number of seconds")?,
                sweep_interval_secs: or_default("FILES_STASH_SWEEP_INTERVAL_SECS", "0")
                    .parse()
                    .context("FILES_STASH_SWEEP_INTERVAL_SECS must be a number of seconds")?,
            },
        };

        if config.files.ttl_secs <= 0 {
            bail!("FILES_STASH_TTL_SECS must be positive");
        }
        if config.database.max_connections == 0 {
            bail!("DB_MAX_CONNECTIONS must be at least 1");
        }

        Ok(config)
    }
}
