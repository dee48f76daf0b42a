//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use super::registry::RegistryOptions;

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_EXPIRY_INTERVAL_SECS: u64 = 90;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;
const DEFAULT_SNAPSHOT_PATH: &str = "data/coordinator.json";

/// Upper bound for every interval setting (one year)
pub const MAX_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Configuration for the Coordinator server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Server bind address
    pub bind_address: SocketAddr,

    /// Heartbeat age (seconds) after which a provider is evicted
    pub expiry_interval_secs: u64,

    /// How often the sweep + snapshot tick runs (seconds)
    pub sweep_interval_secs: u64,

    /// Snapshot file location
    pub snapshot_path: PathBuf,

    /// Keep state in memory only
    pub persist: bool,

    /// Drop subscriptions idle this long (seconds); never when unset
    pub subscription_idle_timeout_secs: Option<u64>,

    /// Enable CORS for API
    pub enable_cors: bool,

    /// Enable request logging
    pub enable_request_logging: bool,

    /// Write one last snapshot during graceful shutdown
    pub final_dump_on_shutdown: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            expiry_interval_secs: DEFAULT_EXPIRY_INTERVAL_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
            persist: true,
            subscription_idle_timeout_secs: None,
            enable_cors: true,
            enable_request_logging: true,
            final_dump_on_shutdown: true,
        }
    }
}

impl CoordinatorConfig {
    /// Create a new config builder
    pub fn builder() -> CoordinatorConfigBuilder {
        CoordinatorConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.expiry_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "expiry_interval_secs".to_string(),
                reason: "Must be at least 1 second".to_string(),
            });
        }

        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sweep_interval_secs".to_string(),
                reason: "Must be at least 1 second".to_string(),
            });
        }

        let intervals = [
            ("expiry_interval_secs", Some(self.expiry_interval_secs)),
            ("sweep_interval_secs", Some(self.sweep_interval_secs)),
            (
                "subscription_idle_timeout_secs",
                self.subscription_idle_timeout_secs,
            ),
        ];
        for (field, secs) in intervals {
            if secs.is_some_and(|secs| secs > MAX_INTERVAL_SECS) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: format!("Must be at most {} seconds", MAX_INTERVAL_SECS),
                });
            }
        }

        if self.sweep_interval_secs > self.expiry_interval_secs {
            return Err(ConfigError::InvalidValue {
                field: "sweep_interval_secs".to_string(),
                reason: "Sweep must run at least once per expiry interval".to_string(),
            });
        }

        if self.subscription_idle_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "subscription_idle_timeout_secs".to_string(),
                reason: "Leave unset to disable instead of 0".to_string(),
            });
        }

        if self.persist && self.snapshot_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingField {
                field: "snapshot_path".to_string(),
            });
        }

        Ok(())
    }

    pub fn expiry_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Liveness settings handed to the registry
    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            expiry_interval: self.expiry_interval(),
            subscription_idle_timeout: self.subscription_idle_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Builder for CoordinatorConfig
#[derive(Debug, Default)]
pub struct CoordinatorConfigBuilder {
    bind_address: Option<SocketAddr>,
    expiry_interval_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
    snapshot_path: Option<PathBuf>,
    persist: Option<bool>,
    subscription_idle_timeout_secs: Option<u64>,
    enable_cors: Option<bool>,
    enable_request_logging: Option<bool>,
    final_dump_on_shutdown: Option<bool>,
}

impl CoordinatorConfigBuilder {
    /// Set bind address
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = Some(addr);
        self
    }

    /// Set bind address from string
    pub fn bind_address_str(mut self, addr: &str) -> Result<Self, ConfigError> {
        self.bind_address = Some(addr.parse().map_err(|_| ConfigError::InvalidValue {
            field: "bind_address".to_string(),
            reason: format!("Invalid address: {}", addr),
        })?);
        Ok(self)
    }

    /// Set expiry interval
    pub fn expiry_interval_secs(mut self, secs: u64) -> Self {
        self.expiry_interval_secs = Some(secs);
        self
    }

    /// Set sweep interval
    pub fn sweep_interval_secs(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = Some(secs);
        self
    }

    /// Set snapshot path
    pub fn snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    /// Enable/disable snapshot persistence
    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = Some(persist);
        self
    }

    /// Set subscription idle timeout
    pub fn subscription_idle_timeout_secs(mut self, secs: u64) -> Self {
        self.subscription_idle_timeout_secs = Some(secs);
        self
    }

    /// Enable/disable CORS
    pub fn enable_cors(mut self, enable: bool) -> Self {
        self.enable_cors = Some(enable);
        self
    }

    /// Enable/disable request logging
    pub fn enable_request_logging(mut self, enable: bool) -> Self {
        self.enable_request_logging = Some(enable);
        self
    }

    /// Enable/disable the shutdown snapshot
    pub fn final_dump_on_shutdown(mut self, enable: bool) -> Self {
        self.final_dump_on_shutdown = Some(enable);
        self
    }

    /// Build the config
    pub fn build(self) -> Result<CoordinatorConfig, ConfigError> {
        let config = CoordinatorConfig {
            bind_address: self.bind_address.unwrap_or_else(default_bind_address),
            expiry_interval_secs: self
                .expiry_interval_secs
                .unwrap_or(DEFAULT_EXPIRY_INTERVAL_SECS),
            sweep_interval_secs: self
                .sweep_interval_secs
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
            snapshot_path: self
                .snapshot_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_PATH)),
            persist: self.persist.unwrap_or(true),
            subscription_idle_timeout_secs: self.subscription_idle_timeout_secs,
            enable_cors: self.enable_cors.unwrap_or(true),
            enable_request_logging: self.enable_request_logging.unwrap_or(true),
            final_dump_on_shutdown: self.final_dump_on_shutdown.unwrap_or(true),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue { field: String, reason: String },
    MissingField { field: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
            Self::MissingField { field } => {
                write!(f, "Missing required field: {}", field)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for crate::error::Error {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
