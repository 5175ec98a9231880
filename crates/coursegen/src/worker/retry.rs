//! Per-job-type retry policies with capped exponential backoff.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::job::JobType;

const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_BASE_DELAY_MS: u64 = 2_000;
const DEFAULT_MAX_DELAY_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }

    /// Whether a job that just failed its `attempt`-th delivery may run again.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }

    /// Delay before the next delivery after failed attempt `attempt` (1-based):
    /// `base * 2^(attempt-1)`, capped at `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

/// Default policy plus per-type overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub default: RetryPolicy,
    #[serde(default = "default_overrides")]
    pub overrides: HashMap<JobType, RetryPolicy>,
}

fn default_overrides() -> HashMap<JobType, RetryPolicy> {
    HashMap::from([
        (JobType::Test, RetryPolicy::none()),
        (JobType::Initialize, RetryPolicy::none()),
    ])
}

impl RetryConfig {
    pub fn policy_for(&self, job_type: JobType) -> RetryPolicy {
        self.overrides
            .get(&job_type)
            .copied()
            .unwrap_or(self.default)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default: RetryPolicy::default(),
            overrides: default_overrides(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(8_000));
        assert_eq!(policy.delay_for(10), Duration::from_millis(60_000));
        assert_eq!(policy.delay_for(200), Duration::from_millis(60_000));
    }

    #[test]
    fn test_allows_retry_bound() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
        assert!(!RetryPolicy::none().allows_retry(1));
    }

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.policy_for(JobType::Test).max_retries, 0);
        assert_eq!(config.policy_for(JobType::Initialize).max_retries, 0);
        assert_eq!(config.policy_for(JobType::Analyze).max_retries, 2);
        assert_eq!(config.policy_for(JobType::RegenerateSection).max_retries, 2);
    }

    #[test]
    fn test_overrides_from_json() {
        let config: RetryConfig = serde_json::from_str(
            r#"{"default":{"max_retries":1,"base_delay_ms":10,"max_delay_ms":100},
                "overrides":{"ANALYZE":{"max_retries":5,"base_delay_ms":1,"max_delay_ms":4}}}"#,
        )
        .unwrap();
        assert_eq!(config.policy_for(JobType::Analyze).max_retries, 5);
        assert_eq!(config.policy_for(JobType::Classify).max_retries, 1);
        assert!(!config.overrides.contains_key(&JobType::Test));
    }
}
