use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::secrets::SecretSource;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let worker = &config.worker;
    if worker.concurrency == 0 {
        return invalid("worker.concurrency must be at least 1");
    }
    if worker.item_timeout_secs == 0 {
        return invalid("worker.item_timeout_secs must be at least 1");
    }
    if worker.poll_interval_secs == 0 || worker.cleanup_interval_secs == 0 {
        return invalid("worker intervals must be at least 1 second");
    }
    if worker.lease_ttl_secs <= worker.item_timeout_secs {
        return invalid("worker.lease_ttl_secs must exceed worker.item_timeout_secs");
    }
    if worker.stale_after_secs < worker.item_timeout_secs {
        return invalid("worker.stale_after_secs must be at least worker.item_timeout_secs");
    }

    let resolver = &config.resolver;
    if resolver.confidence_threshold > 1000 {
        return invalid("resolver.confidence_threshold must be within 0..=1000");
    }
    if !(0.0..=1.0).contains(&resolver.min_acceptance) {
        return invalid("resolver.min_acceptance must be within 0..=1");
    }

    if config.cache.primary_ttl_days == 0 {
        return invalid("cache.primary_ttl_days must be at least 1");
    }

    if let Some(gemini) = &config.gemini {
        require_url("gemini.base_url", &gemini.base_url)?;
        require_secret("gemini.api_key", &gemini.api_key)?;
        if gemini.model.trim().is_empty() {
            return invalid("gemini.model must not be empty");
        }
    }

    if let Some(translation) = &config.translation {
        require_url("translation.endpoint", &translation.endpoint)?;
        require_url("translation.token_url", &translation.token_url)?;
        require_secret("translation.client_id", &translation.client_id)?;
        require_secret("translation.client_secret", &translation.client_secret)?;
    }

    if let Some(catalog) = &config.catalog {
        require_url("catalog.base_url", &catalog.base_url)?;
    }

    let visual = &config.visual;
    if visual.max_candidates == 0 || visual.max_image_bytes == 0 || visual.max_dimension == 0 {
        return invalid("visual limits must be positive");
    }

    Ok(())
}

fn invalid(message: &str) -> Result<(), ConfigError> {
    Err(ConfigError::Validation {
        message: message.to_string(),
    })
}

fn require_url(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Validation {
            message: format!("{} must be an http(s) URL, got '{}'", field, value),
        })
    }
}

fn require_secret(field: &str, source: &SecretSource) -> Result<(), ConfigError> {
    if source.is_configured() {
        Ok(())
    } else {
        Err(ConfigError::Validation {
            message: format!("{} needs one of value, file or env_var", field),
        })
    }
}
