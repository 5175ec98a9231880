use std::path::Path;

use crate::config::schema::{Config, CONFIG_VERSION};
use crate::error::ConfigError;
use crate::stage::Stage;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != CONFIG_VERSION {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be at least 1".to_string(),
        });
    }

    if config.stuck_threshold_minutes == 0 {
        return Err(ConfigError::Validation {
            message: "stuck_threshold_minutes must be greater than 0".to_string(),
        });
    }

    for gate in &config.approval_gates {
        if Stage::from_number(*gate).is_none() {
            return Err(ConfigError::Validation {
                message: format!("approval gate {} is not a stage (expected 1-6)", gate),
            });
        }
    }

    let policies = std::iter::once(("default".to_string(), &config.retry.default)).chain(
        config
            .retry
            .overrides
            .iter()
            .map(|(job_type, policy)| (job_type.to_string(), policy)),
    );
    for (name, policy) in policies {
        if policy.max_delay_ms < policy.base_delay_ms {
            return Err(ConfigError::Validation {
                message: format!(
                    "retry policy '{}': max_delay_ms ({}) is below base_delay_ms ({})",
                    name, policy.max_delay_ms, policy.base_delay_ms
                ),
            });
        }
    }

    if let Some(generator) = &config.generator {
        if generator.command.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "generator.command must not be empty".to_string(),
            });
        }
    }

    Ok(())
}
