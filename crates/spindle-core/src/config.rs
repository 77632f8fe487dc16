//! Registry configuration
//!
//! Discovery policy, shutdown deadline and the default worker options that
//! every subscription starts from. Per-handler overrides live on
//! `HandlerDescriptor`.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What to do with a handler descriptor that cannot be registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryPolicy {
    /// Log a warning and keep going.
    #[default]
    WarnAndSkip,
    /// Abort registration before anything is opened.
    FailFast,
}

impl FromStr for DiscoveryPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warn" | "warn-and-skip" | "skip" => Ok(Self::WarnAndSkip),
            "fail" | "fail-fast" => Ok(Self::FailFast),
            other => Err(ConfigError::Invalid {
                key: "discovery",
                value: other.to_string(),
                reason: "expected 'warn-and-skip' or 'fail-fast'",
            }),
        }
    }
}

/// Settings passed to the engine client for one worker subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerOptions {
    /// Worker name reported to the engine on activation.
    pub name: String,

    /// Maximum number of jobs activated at once.
    pub max_jobs_active: u32,

    /// Lease duration of an activated job.
    pub timeout_ms: u64,

    /// Delay between polls when no job was available.
    pub poll_interval_ms: u64,

    /// Variables to fetch; empty means all.
    pub fetch_variables: Vec<String>,
}

impl WorkerOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_jobs_active: 32,
            timeout_ms: 5 * 60 * 1000,
            poll_interval_ms: 100,
            fetch_variables: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Registry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub discovery: DiscoveryPolicy,

    /// Deadline for closing all workers on shutdown.
    pub shutdown_timeout_ms: u64,

    /// Defaults applied to every subscription.
    pub worker: WorkerOptions,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            discovery: DiscoveryPolicy::default(),
            shutdown_timeout_ms: 10_000,
            worker: WorkerOptions::default(),
        }
    }
}

impl RegistryConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn with_discovery(mut self, discovery: DiscoveryPolicy) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Creates configuration from environment variables
    ///
    /// Recognised variables (all optional):
    /// - SPINDLE_DISCOVERY_POLICY (`warn-and-skip` | `fail-fast`)
    /// - SPINDLE_SHUTDOWN_TIMEOUT_MS (default: 10000)
    /// - SPINDLE_WORKER_NAME (default: "default")
    /// - SPINDLE_MAX_JOBS_ACTIVE (default: 32)
    /// - SPINDLE_JOB_TIMEOUT_MS (default: 300000)
    /// - SPINDLE_POLL_INTERVAL_MS (default: 100)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`RegistryConfig::from_env`] but reads values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("SPINDLE_DISCOVERY_POLICY") {
            config.discovery = raw.parse()?;
        }
        if let Some(raw) = lookup("SPINDLE_SHUTDOWN_TIMEOUT_MS") {
            config.shutdown_timeout_ms = parse_number("SPINDLE_SHUTDOWN_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("SPINDLE_WORKER_NAME") {
            config.worker.name = raw;
        }
        if let Some(raw) = lookup("SPINDLE_MAX_JOBS_ACTIVE") {
            config.worker.max_jobs_active = parse_number("SPINDLE_MAX_JOBS_ACTIVE", &raw)?;
        }
        if let Some(raw) = lookup("SPINDLE_JOB_TIMEOUT_MS") {
            config.worker.timeout_ms = parse_number("SPINDLE_JOB_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("SPINDLE_POLL_INTERVAL_MS") {
            config.worker.poll_interval_ms = parse_number("SPINDLE_POLL_INTERVAL_MS", &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shutdown_timeout_ms == 0 {
            return Err(zero("shutdown_timeout_ms"));
        }
        if self.worker.name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "worker.name",
                value: self.worker.name.clone(),
                reason: "must not be empty",
            });
        }
        if self.worker.max_jobs_active == 0 {
            return Err(zero("worker.max_jobs_active"));
        }
        if self.worker.timeout_ms == 0 {
            return Err(zero("worker.timeout_ms"));
        }
        if self.worker.poll_interval_ms == 0 {
            return Err(zero("worker.poll_interval_ms"));
        }
        Ok(())
    }
}

fn parse_number<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: "expected a non-negative integer",
    })
}

fn zero(key: &'static str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: "0".to_string(),
        reason: "must be greater than 0",
    }
}
