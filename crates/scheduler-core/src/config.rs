//! Typed configuration surface for the scheduler process: a struct per
//! concern, every field with a `#[serde(default = "fn")]` backed by a
//! standalone default-value function, loaded from TOML with an
//! environment-variable override for the file path.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub worker: WorkerPoolConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub controller: ControllerConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,

    #[serde(default)]
    pub http: HttpConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker: WorkerPoolConfig::default(),
            database: DatabaseConfig::default(),
            controller: ControllerConfig::default(),
            shutdown: ShutdownConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file: {}", e)))?;

        let config: SchedulerConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `SCHEDULER_CONFIG`, then a short list of default paths,
    /// falling back to `SchedulerConfig::default()`.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = std::env::var("SCHEDULER_CONFIG") {
            return Self::load(&path);
        }

        let default_paths = ["./config/default.toml", "./config/production.toml", "/etc/scheduler/config.toml"];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker.max_concurrent == 0 {
            return Err(Error::Config("worker.max_concurrent must be > 0".to_string()));
        }
        if self.database.connection_limit < self.worker.max_concurrent * 2 {
            return Err(Error::Config(
                "database.connection_limit must be at least 2x worker.max_concurrent".to_string(),
            ));
        }
        if self.shutdown.grace_ms == 0 {
            return Err(Error::Config("shutdown.grace_ms must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Caps the number of firings the worker pool runs concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { max_concurrent: default_max_concurrent() }
    }
}

fn default_max_concurrent() -> usize {
    10
}

/// `connection_limit` must cover at least 2x the worker pool's concurrency
/// so in-flight firings never starve the rescheduling controller's own
/// queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_connection_limit")]
    pub connection_limit: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: default_database_url(), connection_limit: default_connection_limit() }
    }
}

fn default_database_url() -> String {
    "postgres://localhost/scheduler".to_string()
}

fn default_connection_limit() -> usize {
    20
}

/// `enabled` toggles the hourly sweep entirely; `batch_size` caps how many
/// jobs one sweep evaluates so a large job table doesn't monopolize a sweep
/// tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            batch_size: default_batch_size(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_batch_size() -> usize {
    50
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

/// How long the pool waits for in-flight firings to finish before aborting
/// them on shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_ms: default_grace_ms() }
    }
}

fn default_grace_ms() -> u64 {
    30_000
}

/// `max_sockets_per_host` bounds total open connections per target host;
/// `max_idle_per_host` only bounds how many of those `reqwest` keeps warm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_max_sockets_per_host")]
    pub max_sockets_per_host: usize,

    #[serde(default = "default_max_idle_per_host")]
    pub max_idle_per_host: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_sockets_per_host: default_max_sockets_per_host(),
            max_idle_per_host: default_max_idle_per_host(),
        }
    }
}

fn default_max_sockets_per_host() -> usize {
    50
}

fn default_max_idle_per_host() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(SchedulerConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_undersized_connection_pool() {
        let mut config = SchedulerConfig::default();
        config.worker.max_concurrent = 10;
        config.database.connection_limit = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let toml_str = r#"
            [worker]
            max_concurrent = 25
        "#;
        let config: SchedulerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.worker.max_concurrent, 25);
        assert_eq!(config.database.connection_limit, default_connection_limit());
    }
}
