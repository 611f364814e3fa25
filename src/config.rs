//! Runtime configuration.
//!
//! Defaults are layered under an optional JSON file (`--config` / `LIFECYCLE_CONFIG`),
//! which is in turn layered under individual `LIFECYCLE_*` environment variables and
//! their command-line flags. `LifecycleArgs` is flattened into the node's own arguments.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{LifecycleError, Result};

pub const ENV_CONFIG_FILE: &str = "LIFECYCLE_CONFIG";

/// Which job executor the node runs scan jobs with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Distributed,
    SingleProcess,
}

impl FromStr for StrategyKind {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "distributed" => Ok(Self::Distributed),
            "single_process" | "single-process" | "local" => Ok(Self::SingleProcess),
            other => Err(LifecycleError::Config(format!(
                "unknown execution strategy '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Bounded wait for one acknowledgment round.
    pub ack_timeout_ms: u64,
    pub ack_poll_interval_ms: u64,
    /// How often a lost optimistic write is re-read and retried.
    pub conflict_retry_limit: u32,
    /// Re-dispatches of a single partition after its first attempt fails.
    pub partition_retry_limit: u32,
    pub partition_timeout_ms: u64,
    pub worker_count: usize,
    pub num_partitions: u32,
    pub strategy: StrategyKind,
    /// Finished job entries are swept after this long if nobody clears them.
    pub job_retention_ms: u64,
    pub heartbeat_stale_after_ms: u64,
    pub log_level: String,
    /// When set, the status store is persisted to this JSON file.
    pub store_path: Option<PathBuf>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 30_000,
            ack_poll_interval_ms: 500,
            conflict_retry_limit: 5,
            partition_retry_limit: 3,
            partition_timeout_ms: 60_000,
            worker_count: 4,
            num_partitions: 64,
            strategy: StrategyKind::Distributed,
            job_retention_ms: 60 * 60 * 1000,
            heartbeat_stale_after_ms: 10_000,
            log_level: "info".to_string(),
            store_path: None,
        }
    }
}

/// Command-line and environment overrides.
///
/// Every field is optional: a value that is absent keeps whatever the JSON file (or the
/// built-in default) says. Precedence, highest first: flag, environment variable, file,
/// default.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "lifecycle")]
pub struct LifecycleArgs {
    /// Optional JSON file layered under every other source
    #[arg(long = "config", env = ENV_CONFIG_FILE)]
    pub config_file: Option<PathBuf>,

    #[arg(long, env = "LIFECYCLE_ACK_TIMEOUT_MS")]
    pub ack_timeout_ms: Option<u64>,

    #[arg(long, env = "LIFECYCLE_ACK_POLL_INTERVAL_MS")]
    pub ack_poll_interval_ms: Option<u64>,

    #[arg(long, env = "LIFECYCLE_CONFLICT_RETRY_LIMIT")]
    pub conflict_retry_limit: Option<u32>,

    #[arg(long, env = "LIFECYCLE_PARTITION_RETRY_LIMIT")]
    pub partition_retry_limit: Option<u32>,

    #[arg(long, env = "LIFECYCLE_PARTITION_TIMEOUT_MS")]
    pub partition_timeout_ms: Option<u64>,

    #[arg(long, env = "LIFECYCLE_WORKER_COUNT")]
    pub worker_count: Option<usize>,

    #[arg(long, env = "LIFECYCLE_NUM_PARTITIONS")]
    pub num_partitions: Option<u32>,

    /// distributed | single_process
    #[arg(long, env = "LIFECYCLE_STRATEGY")]
    pub strategy: Option<StrategyKind>,

    #[arg(long, env = "LIFECYCLE_JOB_RETENTION_MS")]
    pub job_retention_ms: Option<u64>,

    #[arg(long, env = "LIFECYCLE_HEARTBEAT_STALE_AFTER_MS")]
    pub heartbeat_stale_after_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LIFECYCLE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Persist the status store to this JSON file
    #[arg(long, env = "LIFECYCLE_STORE_PATH")]
    pub store_path: Option<PathBuf>,
}

impl LifecycleArgs {
    /// Layers the overrides over the file (or the defaults) and validates the result.
    pub fn resolve(self) -> Result<LifecycleConfig> {
        let mut config = match &self.config_file {
            Some(path) => LifecycleConfig::from_file(path)?,
            None => LifecycleConfig::default(),
        };

        if let Some(v) = self.ack_timeout_ms {
            config.ack_timeout_ms = v;
        }
        if let Some(v) = self.ack_poll_interval_ms {
            config.ack_poll_interval_ms = v;
        }
        if let Some(v) = self.conflict_retry_limit {
            config.conflict_retry_limit = v;
        }
        if let Some(v) = self.partition_retry_limit {
            config.partition_retry_limit = v;
        }
        if let Some(v) = self.partition_timeout_ms {
            config.partition_timeout_ms = v;
        }
        if let Some(v) = self.worker_count {
            config.worker_count = v;
        }
        if let Some(v) = self.num_partitions {
            config.num_partitions = v;
        }
        if let Some(v) = self.strategy {
            config.strategy = v;
        }
        if let Some(v) = self.job_retention_ms {
            config.job_retention_ms = v;
        }
        if let Some(v) = self.heartbeat_stale_after_ms {
            config.heartbeat_stale_after_ms = v;
        }
        if let Some(v) = self.log_level {
            config.log_level = v;
        }
        if let Some(v) = self.store_path {
            config.store_path = Some(v);
        }

        config.validate()?;
        Ok(config)
    }
}

impl LifecycleConfig {
    /// Resolves the configuration from `LIFECYCLE_*` environment variables alone.
    pub fn from_env() -> Result<Self> {
        LifecycleArgs::try_parse_from(["lifecycle"])
            .map_err(|e| LifecycleError::Config(e.to_string()))?
            .resolve()
    }

    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LifecycleError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            LifecycleError::Config(format!("cannot parse {}: {}", path.display(), e))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(LifecycleError::Config("worker_count must be > 0".into()));
        }
        if self.num_partitions == 0 {
            return Err(LifecycleError::Config("num_partitions must be > 0".into()));
        }
        if self.ack_poll_interval_ms == 0 {
            return Err(LifecycleError::Config(
                "ack_poll_interval_ms must be > 0".into(),
            ));
        }
        self.log_level()?;
        Ok(())
    }

    pub fn log_level(&self) -> Result<tracing::Level> {
        self.log_level
            .parse::<tracing::Level>()
            .map_err(|_| LifecycleError::Config(format!("invalid log level '{}'", self.log_level)))
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn ack_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ack_poll_interval_ms)
    }

    pub fn partition_timeout(&self) -> Duration {
        Duration::from_millis(self.partition_timeout_ms)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_millis(self.job_retention_ms)
    }

    pub fn heartbeat_stale_after(&self) -> Duration {
        Duration::from_millis(self.heartbeat_stale_after_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(flags: &[&str]) -> Result<LifecycleConfig> {
        let argv = std::iter::once("lifecycle").chain(flags.iter().copied());
        LifecycleArgs::try_parse_from(argv)
            .map_err(|e| LifecycleError::Config(e.to_string()))?
            .resolve()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = LifecycleConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.strategy, StrategyKind::Distributed);
        assert_eq!(config.ack_timeout(), Duration::from_secs(30));
        assert_eq!(LifecycleArgs::default().resolve().unwrap(), config);
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = resolve(&[
            "--ack-timeout-ms",
            "250",
            "--worker-count",
            "2",
            "--strategy",
            "single-process",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(config.ack_timeout_ms, 250);
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.strategy, StrategyKind::SingleProcess);
        assert_eq!(config.log_level().unwrap(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = resolve(&["--worker-count", "zero"]).unwrap_err();
        assert!(matches!(err, LifecycleError::Config(_)));

        let err = resolve(&["--num-partitions", "0"]).unwrap_err();
        assert!(err.to_string().contains("num_partitions"));

        let err = resolve(&["--strategy", "round-robin"]).unwrap_err();
        assert!(matches!(err, LifecycleError::Config(_)));
    }

    #[test]
    fn test_file_is_layered_under_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lifecycle.json");
        std::fs::write(&path, r#"{"worker_count": 8, "num_partitions": 16}"#).unwrap();

        let config = resolve(&[
            "--config",
            path.to_str().unwrap(),
            "--worker-count",
            "3",
        ])
        .unwrap();

        assert_eq!(config.worker_count, 3);
        assert_eq!(config.num_partitions, 16);
        assert_eq!(config.partition_retry_limit, 3);
    }
}
