//! Layered configuration: defaults, optional file, then `GRUNT__SECTION__KEY` variables.

use crate::error::ConfigError;
use config::{Config, Environment, File};
use grunt_core::Device;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "GRUNT";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GruntConfig {
    pub coordinator: CoordinatorConfig,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
}

/// Where the coordinator lives and how hard to try reaching it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub host: String,
    pub port: u16,
    /// Total attempts per request
    pub max_retries: u32,
    /// Backoff after the first failed attempt, doubled per further failure
    pub base_delay_ms: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub name_prefix: String,
    pub device: Device,
    pub poll_interval_secs: f64,
    /// Stop polling once this much time has passed; unbounded when unset
    pub runtime_budget_secs: Option<f64>,
    pub heartbeat_interval_secs: u64,
    pub stale_threshold_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8000,
            max_retries: 5,
            base_delay_ms: 1000,
            request_timeout_secs: 90,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name_prefix: default_name_prefix(),
            device: Device::Cpu,
            poll_interval_secs: 2.0,
            runtime_budget_secs: None,
            heartbeat_interval_secs: 90,
            stale_threshold_secs: 300,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// `<os-family>-grunt`, e.g. `unix-grunt`.
pub fn default_name_prefix() -> String {
    format!("{}-grunt", std::env::consts::FAMILY)
}

impl GruntConfig {
    /// Load from defaults, `path` (if given, it must exist) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, environment())
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config: GruntConfig = builder.add_source(env).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.worker.poll_interval()?;
        self.worker.runtime_budget()?;
        self.worker.heartbeat_interval()?;
        if self.coordinator.host.trim().is_empty() {
            return Err(ConfigError::Invalid("coordinator.host is empty".to_string()));
        }
        Ok(())
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}

impl CoordinatorConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Result<Duration, ConfigError> {
        seconds("worker.poll_interval_secs", self.poll_interval_secs)
    }

    pub fn runtime_budget(&self) -> Result<Option<Duration>, ConfigError> {
        self.runtime_budget_secs
            .map(|secs| seconds("worker.runtime_budget_secs", secs))
            .transpose()
    }

    pub fn heartbeat_interval(&self) -> Result<Duration, ConfigError> {
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "worker.heartbeat_interval_secs must be positive".to_string(),
            ));
        }
        Ok(Duration::from_secs(self.heartbeat_interval_secs))
    }
}

fn seconds(key: &str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        ConfigError::Invalid(format!(
            "{} must be a non-negative number, got {}",
            key, value
        ))
    })
}
