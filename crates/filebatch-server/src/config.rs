//! Configuration management

use filebatch_common::env;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::batch::{
    coordinator, step, watcher, KeyPolicy, LaunchConfig, LineFormat, SkipPolicy, StepConfig,
    WriteMode,
};

// ============================================================================
// Batch Configuration Constants
// ============================================================================

/// Input directory relative to `$HOME` when `FILEBATCH_INPUT_DIR` is unset.
pub const DEFAULT_INPUT_SUBDIR: &str = "Desktop/in";

/// Default directory poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = watcher::DEFAULT_POLL_INTERVAL.as_millis() as u64;

/// Default records per chunk transaction.
pub const DEFAULT_CHUNK_SIZE: usize = step::DEFAULT_CHUNK_SIZE;

/// Default column layout of input files.
pub const DEFAULT_FIELDS: &str = "id,name";

/// Default number of concurrently running jobs.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = coordinator::DEFAULT_MAX_CONCURRENT_JOBS;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://filebatch.db";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub batch: BatchConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
}

/// File pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    pub input_dir: PathBuf,
    pub poll_interval_ms: u64,
    pub chunk_size: usize,
    pub delimiter: char,
    pub fields: String,
    pub lines_to_skip: i64,
    pub skip_policy: SkipPolicy,
    pub write_mode: WriteMode,
    pub key_policy: KeyPolicy,
    pub max_concurrent_jobs: usize,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

impl BatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn line_format(&self) -> LineFormat {
        LineFormat::default()
            .with_delimiter(self.delimiter)
            .with_fields(&self.fields)
    }

    pub fn step_config(&self) -> StepConfig {
        StepConfig {
            chunk_size: self.chunk_size,
            skip_policy: self.skip_policy,
            lines_to_skip: self.lines_to_skip,
        }
    }

    pub fn launch_config(&self) -> LaunchConfig {
        LaunchConfig {
            key_policy: self.key_policy,
            max_concurrent_jobs: self.max_concurrent_jobs,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            delimiter: ',',
            fields: DEFAULT_FIELDS.to_string(),
            lines_to_skip: 0,
            skip_policy: SkipPolicy::default(),
            write_mode: WriteMode::default(),
            key_policy: KeyPolicy::default(),
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
        }
    }
}

fn default_input_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_INPUT_SUBDIR)
}

impl Config {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_env()?;
        config.validate()?;

        Ok(config)
    }

    /// Read the environment over the defaults without validating
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        Ok(Config {
            batch: BatchConfig {
                input_dir: env::optional::<PathBuf>("FILEBATCH_INPUT_DIR")?
                    .unwrap_or(defaults.batch.input_dir),
                poll_interval_ms: env::var_or(
                    "FILEBATCH_POLL_INTERVAL_MS",
                    defaults.batch.poll_interval_ms,
                )?,
                chunk_size: env::var_or("FILEBATCH_CHUNK_SIZE", defaults.batch.chunk_size)?,
                delimiter: env::var_or("FILEBATCH_DELIMITER", defaults.batch.delimiter)?,
                fields: env::string_or("FILEBATCH_FIELDS", defaults.batch.fields),
                lines_to_skip: env::var_or("FILEBATCH_LINES_TO_SKIP", defaults.batch.lines_to_skip)?,
                skip_policy: env::var_or("FILEBATCH_SKIP_POLICY", defaults.batch.skip_policy)?,
                write_mode: env::var_or("FILEBATCH_WRITE_MODE", defaults.batch.write_mode)?,
                key_policy: env::var_or("FILEBATCH_KEY_POLICY", defaults.batch.key_policy)?,
                max_concurrent_jobs: env::var_or(
                    "FILEBATCH_MAX_CONCURRENT_JOBS",
                    defaults.batch.max_concurrent_jobs,
                )?,
            },
            database: DatabaseConfig {
                url: env::string_or("DATABASE_URL", defaults.database.url),
                max_connections: env::var_or(
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                )?,
                connect_timeout_secs: env::var_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    defaults.database.connect_timeout_secs,
                )?,
            },
            server: ServerConfig {
                host: env::string_or("FILEBATCH_HOST", defaults.server.host),
                port: env::var_or("FILEBATCH_PORT", defaults.server.port)?,
                shutdown_timeout_secs: env::var_or(
                    "FILEBATCH_SHUTDOWN_TIMEOUT",
                    defaults.server.shutdown_timeout_secs,
                )?,
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch.chunk_size == 0 {
            anyhow::bail!("Chunk size must be greater than 0");
        }

        if self.batch.max_concurrent_jobs == 0 {
            anyhow::bail!("Max concurrent jobs must be greater than 0");
        }

        if self.batch.poll_interval_ms == 0 {
            anyhow::bail!("Poll interval must be greater than 0");
        }

        if self.batch.lines_to_skip < 0 {
            anyhow::bail!("Lines to skip cannot be negative");
        }

        self.batch
            .line_format()
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid line format: {}", e))?;

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch.chunk_size, 5);
        assert_eq!(config.batch.poll_interval(), Duration::from_millis(1000));
        assert!(config.batch.input_dir.ends_with("Desktop/in"));
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let mut config = Config::default();
        config.batch.chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_field_list_without_name() {
        let mut config = Config::default();
        config.batch.fields = "id,title".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn test_rejects_non_ascii_delimiter() {
        let mut config = Config::default();
        config.batch.delimiter = '¦';
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_component_configs_follow_batch_settings() {
        let mut config = Config::default();
        config.batch.chunk_size = 50;
        config.batch.delimiter = '|';
        config.batch.max_concurrent_jobs = 2;

        assert_eq!(config.batch.step_config().chunk_size, 50);
        assert_eq!(config.batch.line_format().delimiter, '|');
        assert_eq!(config.batch.launch_config().max_concurrent_jobs, 2);
    }
}
