use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::lifecycle::engine::EngineConfig;
use crate::lifecycle::registry::DEFAULT_REFRESH_INTERVAL;
use crate::lifecycle::types::{MIN_POLL_INTERVAL, OperationKind};
use crate::lifecycle::validation::AmountBounds;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "CONFIG_READ",
            ConfigError::Parse { .. } => "CONFIG_PARSE",
            ConfigError::Invalid(_) => "CONFIG_INVALID",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub backend: BackendConfig,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Environment variable holding the session token
    #[serde(default = "default_token_env")]
    pub session_token_env: String,
}

fn default_timeout_ms() -> u64 {
    15_000
}

fn default_token_env() -> String {
    "WALLET_SESSION_TOKEN".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EngineSettings {
    pub poll_interval_ms: u64,
    pub registry_refresh_interval_ms: u64,
    /// Give up polling after this many consecutive failed checks
    #[serde(default)]
    pub max_failure_streak: Option<u32>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            registry_refresh_interval_ms: DEFAULT_REFRESH_INTERVAL.as_millis() as u64,
            max_failure_streak: None,
        }
    }
}

impl EngineSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn registry_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.registry_refresh_interval_ms)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            poll_interval: self.poll_interval(),
            max_failure_streak: self.max_failure_streak,
        }
    }
}

/// Per-kind amount limits
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LimitsConfig {
    #[serde(default)]
    pub internal_transfer: AmountBounds,
    #[serde(default)]
    pub external_withdrawal: AmountBounds,
    #[serde(default)]
    pub fiat_withdrawal: AmountBounds,
}

impl LimitsConfig {
    pub fn for_kind(&self, kind: OperationKind) -> AmountBounds {
        match kind {
            OperationKind::InternalTransfer => self.internal_transfer,
            OperationKind::ExternalWithdrawal => self.external_withdrawal,
            OperationKind::FiatWithdrawal => self.fiat_withdrawal,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        Self::from_file(format!("config/{}.yaml", env))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig =
            serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
                path: "<inline>".to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("backend.base_url is empty".into()));
        }
        if self.engine.poll_interval() < MIN_POLL_INTERVAL {
            return Err(ConfigError::Invalid(format!(
                "engine.poll_interval_ms must be at least {}",
                MIN_POLL_INTERVAL.as_millis()
            )));
        }
        if self.engine.registry_refresh_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "engine.registry_refresh_interval_ms must be positive".into(),
            ));
        }
        for (name, bounds) in [
            ("internal_transfer", &self.limits.internal_transfer),
            ("external_withdrawal", &self.limits.external_withdrawal),
            ("fiat_withdrawal", &self.limits.fiat_withdrawal),
        ] {
            if let (Some(min), Some(max)) = (bounds.min, bounds.max)
                && min > max
            {
                return Err(ConfigError::Invalid(format!(
                    "limits.{name}: min {min} exceeds max {max}"
                )));
            }
        }
        Ok(())
    }
}
