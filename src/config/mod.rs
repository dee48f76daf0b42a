//! Configuration management for the concord coordinator
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files. Command-line flags are applied on top in
//! `main.rs`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::coordinator::CoordinatorConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Coordinator configuration
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from a variable lookup; unset variables keep
    /// their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Result<Option<T>>
        where
            T::Err: std::error::Error + Send + Sync + 'static,
        {
            lookup(key)
                .map(|v| v.trim().parse::<T>())
                .transpose()
                .with_context(|| format!("Invalid value for {key}"))
        }

        let mut config = Self::default();
        let coordinator = &mut config.coordinator;

        if let Some(addr) = parsed(&lookup, "CONCORD_BIND_ADDRESS")? {
            coordinator.bind_address = addr;
        }
        if let Some(secs) = parsed(&lookup, "CONCORD_EXPIRY_INTERVAL_SECS")? {
            coordinator.expiry_interval_secs = secs;
        }
        if let Some(secs) = parsed(&lookup, "CONCORD_SWEEP_INTERVAL_SECS")? {
            coordinator.sweep_interval_secs = secs;
        }
        if let Some(path) = lookup("CONCORD_SNAPSHOT_PATH") {
            coordinator.snapshot_path = PathBuf::from(path);
        }
        if let Some(persist) = parsed(&lookup, "CONCORD_PERSIST")? {
            coordinator.persist = persist;
        }
        if let Some(secs) = parsed(&lookup, "CONCORD_SUBSCRIPTION_IDLE_TIMEOUT_SECS")? {
            coordinator.subscription_idle_timeout_secs = Some(secs);
        }
        if let Some(enable) = parsed(&lookup, "CONCORD_ENABLE_CORS")? {
            coordinator.enable_cors = enable;
        }
        if let Some(enable) = parsed(&lookup, "CONCORD_ENABLE_REQUEST_LOGGING")? {
            coordinator.enable_request_logging = enable;
        }
        if let Some(enable) = parsed(&lookup, "CONCORD_FINAL_DUMP_ON_SHUTDOWN")? {
            coordinator.final_dump_on_shutdown = enable;
        }

        if let Some(level) = lookup("CONCORD_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(format) = lookup("CONCORD_LOG_FORMAT") {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.coordinator
            .validate()
            .context("Invalid coordinator configuration")?;

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("log format must be 'text' or 'json'");
        }

        Ok(())
    }
}
