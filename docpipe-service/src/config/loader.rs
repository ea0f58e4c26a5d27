//! Configuration loading from files and environment variables.

use config::{Config, Environment, File};

use crate::error::{ServiceError, ServiceResult};

use super::AppConfig;

/// Load configuration from `config.*` (optional) and `DOCPIPE__*` env vars
pub fn load_config() -> ServiceResult<AppConfig> {
    let config: AppConfig = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix("DOCPIPE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to build config: {}", e),
        })?
        .try_deserialize()
        .map_err(|e| ServiceError::Config {
            message: format!("Failed to deserialize config: {}", e),
        })?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &AppConfig) -> ServiceResult<()> {
    if config.pipeline.workers == 0 {
        return Err(ServiceError::Config {
            message: "pipeline.workers must be at least 1".to_string(),
        });
    }
    if config.classifier.batch_size == 0 {
        return Err(ServiceError::Config {
            message: "classifier.batch_size must be at least 1".to_string(),
        });
    }
    if config.monitor.base_interval_ms > config.monitor.max_interval_ms {
        return Err(ServiceError::Config {
            message: "monitor.base_interval_ms must not exceed monitor.max_interval_ms".to_string(),
        });
    }
    Ok(())
}
