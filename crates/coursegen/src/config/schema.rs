use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::orchestrator::OrchestratorSettings;
use crate::worker::pool::{
    default_worker_count, PoolConfig, DEFAULT_CLAIM_LEASE_SECS, DEFAULT_POLL_INTERVAL_MS,
};
use crate::worker::retry::RetryConfig;

pub const CONFIG_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Seconds a job claim stays valid without renewal before another
    /// worker may take the job over.
    #[serde(default = "default_claim_lease_secs")]
    pub claim_lease_secs: u64,
    #[serde(default = "default_stuck_threshold_minutes")]
    pub stuck_threshold_minutes: u64,
    /// Stages after which generation pauses for approval.
    #[serde(default)]
    pub approval_gates: Vec<u8>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub generator: Option<GeneratorConfig>,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_claim_lease_secs() -> u64 {
    DEFAULT_CLAIM_LEASE_SECS
}

fn default_stuck_threshold_minutes() -> u64 {
    crate::stage::recovery::DEFAULT_STUCK_THRESHOLD_MINUTES as u64
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            database_path: None,
            worker_count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
            claim_lease_secs: default_claim_lease_secs(),
            stuck_threshold_minutes: default_stuck_threshold_minutes(),
            approval_gates: Vec::new(),
            retry: RetryConfig::default(),
            logging: LoggingConfig::default(),
            generator: None,
        }
    }
}

impl Config {
    /// Configured database path, else `~/.coursegen/data/coursegen.db`.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(crate::db::default_database_path)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            worker_count: self.worker_count,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            retry: self.retry.clone(),
            claim_lease: Duration::from_secs(self.claim_lease_secs),
            progress: None,
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            approval_gates: self.approval_gates.iter().copied().collect(),
            stuck_threshold: chrono::Duration::minutes(
                i64::try_from(self.stuck_threshold_minutes).unwrap_or(i64::MAX / 60_000),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// External command used as the generation capability. The prompt is
/// written to its stdin and the generated text read from stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}
