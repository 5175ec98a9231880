//! Process-wide log subscriber.
//!
//! Storage code logs through the `log` facade; worker and pipeline code uses
//! `tracing` spans. Both end up in the same `tracing-subscriber` registry.

use std::sync::Mutex;

use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::ConfigError;

/// Environment variable that overrides the configured level filter.
pub const LOG_ENV_VAR: &str = "COURSEGEN_LOG";

static INITIALIZED: Mutex<bool> = Mutex::new(false);

/// Installs the global subscriber. Later calls return `Ok(())` without
/// touching the subscriber already in place.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    let mut initialized = INITIALIZED.lock().unwrap_or_else(|e| e.into_inner());
    if *initialized {
        return Ok(());
    }

    let filter = build_env_filter(config)?;

    // Another log facade implementation may already be installed (e.g. by a
    // test harness); the tracing side still works without the bridge.
    let _ = tracing_log::LogTracer::init();

    let result = match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            Registry::default()
                .with(filter)
                .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr)),
        ),
        LogFormat::Text => tracing::subscriber::set_global_default(
            Registry::default()
                .with(filter)
                .with(fmt::layer().with_target(true).with_writer(std::io::stderr)),
        ),
    };

    result.map_err(|e| ConfigError::Validation {
        message: format!("Failed to install log subscriber: {}", e),
    })?;

    *initialized = true;
    Ok(())
}

fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    if let Ok(directives) = std::env::var(LOG_ENV_VAR) {
        if !directives.trim().is_empty() {
            return EnvFilter::try_new(&directives).map_err(|e| ConfigError::Validation {
                message: format!("Invalid {} value '{}': {}", LOG_ENV_VAR, directives, e),
            });
        }
    }

    EnvFilter::try_new(&config.level).map_err(|e| ConfigError::Validation {
        message: format!("Invalid log level '{}': {}", config.level, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_rejected() {
        let config = LoggingConfig {
            level: "coursegen=chatty".to_string(),
            format: LogFormat::Text,
        };
        if std::env::var(LOG_ENV_VAR).is_err() {
            assert!(build_env_filter(&config).is_err());
        }
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&config).is_ok());
    }
}
