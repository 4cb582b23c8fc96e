use crate::config::types::{BacklogConfig, Config, CrawlerConfig, StorageConfig};
use crate::ConfigError;

/// Upper bound for the worker pool size
const MAX_CONCURRENCY: usize = 256;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_backlog_config(&config.backlog)?;
    validate_crawler_config(&config.crawler)?;
    if let Some(storage) = &config.storage {
        validate_storage_config(storage)?;
    }
    Ok(())
}

/// Validates backlog configuration
fn validate_backlog_config(config: &BacklogConfig) -> Result<(), ConfigError> {
    if let Some(path) = &config.persist_to {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "persist-to cannot be empty".to_string(),
            ));
        }
    }

    if config.resume && config.persist_to.is_none() {
        return Err(ConfigError::Validation(
            "resume requires persist-to to be set".to_string(),
        ));
    }

    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > MAX_CONCURRENCY {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and {}, got {}",
            MAX_CONCURRENCY, config.concurrency
        )));
    }

    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}
