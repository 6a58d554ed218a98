/// Configuration loading from TOML file
use std::path::Path;
use tracing::info;

use crate::error::{CollectError, Result};
use crate::types::Config;

/// Load configuration from `path`, falling back to built-in defaults when
/// the file does not exist.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();

    let config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CollectError::ConfigError(format!("Failed to read config file: {}", e)))?;
        toml::from_str(&content)
            .map_err(|e| CollectError::ConfigError(format!("Failed to parse config: {}", e)))?
    } else {
        info!("No config file at {}, using defaults", path.display());
        Config::default()
    };

    // Validate config
    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &Config) -> Result<()> {
    if config.data_dir.is_empty() {
        return Err(CollectError::ConfigError("data_dir is empty".to_string()));
    }

    if config.quote_assets.is_empty() {
        return Err(CollectError::ConfigError(
            "quote_assets must list at least one quote asset".to_string(),
        ));
    }

    if config.history_days == 0 {
        return Err(CollectError::ConfigError(
            "history_days must be >= 1".to_string(),
        ));
    }

    if config.checkpoint_interval == 0 {
        return Err(CollectError::ConfigError(
            "checkpoint_interval must be >= 1".to_string(),
        ));
    }

    if config.metrics_batch_size == 0 || config.metrics_batch_size > 250 {
        return Err(CollectError::ConfigError(format!(
            "Invalid metrics_batch_size: {} (provider caps batches at 250)",
            config.metrics_batch_size
        )));
    }

    if config.max_retries == 0 {
        return Err(CollectError::ConfigError(
            "max_retries must be >= 1".to_string(),
        ));
    }

    for limits in [&config.exchange_rate_limit, &config.aggregator_rate_limit] {
        if limits.max_calls_per_minute == 0 {
            return Err(CollectError::ConfigError(
                "max_calls_per_minute must be >= 1".to_string(),
            ));
        }
    }

    Ok(())
}
