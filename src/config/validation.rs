use crate::config::types::{
    BackoffConfig, BrowserConfig, Config, CrawlerConfig, ExtractionConfig, OutputConfig,
    ScopeConfig,
};
use crate::extract::QR_PAYLOAD_FIELD;
use crate::ConfigError;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_seeds(&config.seeds)?;
    validate_crawler_config(&config.crawler)?;
    validate_backoff_config(&config.backoff)?;
    validate_browser_config(&config.browser)?;
    validate_scope_config(&config.scope)?;
    validate_extraction_config(&config.extraction)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates seed locators
fn validate_seeds(seeds: &[String]) -> Result<(), ConfigError> {
    if seeds.is_empty() {
        return Err(ConfigError::Validation(
            "at least one seed locator is required".to_string(),
        ));
    }

    for seed in seeds {
        let url = Url::parse(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed '{}': {}", seed, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "Seed '{}' must use http or https",
                seed
            )));
        }
    }

    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 256 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 256, got {}",
            config.workers
        )));
    }

    if config.task_timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "task_timeout_ms must be >= 100ms, got {}ms",
            config.task_timeout_ms
        )));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    Ok(())
}

/// Validates backoff parameters
///
/// Jitter must stay below `multiplier - 1`, otherwise a jittered delay could
/// exceed the next un-jittered one and retry delays would stop growing.
fn validate_backoff_config(config: &BackoffConfig) -> Result<(), ConfigError> {
    if config.base_ms == 0 {
        return Err(ConfigError::Validation(
            "backoff base_ms must be > 0".to_string(),
        ));
    }

    if config.max_ms < config.base_ms {
        return Err(ConfigError::Validation(format!(
            "backoff max_ms ({}) must be >= base_ms ({})",
            config.max_ms, config.base_ms
        )));
    }

    if !config.multiplier.is_finite() || config.multiplier <= 1.0 {
        return Err(ConfigError::Validation(format!(
            "backoff multiplier must be > 1, got {}",
            config.multiplier
        )));
    }

    if !config.jitter.is_finite()
        || config.jitter < 0.0
        || config.jitter >= config.multiplier - 1.0
    {
        return Err(ConfigError::Validation(format!(
            "backoff jitter must be in [0, {}), got {}",
            config.multiplier - 1.0,
            config.jitter
        )));
    }

    Ok(())
}

/// Validates browser pool configuration
fn validate_browser_config(config: &BrowserConfig) -> Result<(), ConfigError> {
    if config.pool_size < 1 || config.pool_size > 64 {
        return Err(ConfigError::Validation(format!(
            "pool_size must be between 1 and 64, got {}",
            config.pool_size
        )));
    }

    if config.acquire_timeout_ms < 1 {
        return Err(ConfigError::Validation(
            "acquire_timeout_ms must be >= 1ms".to_string(),
        ));
    }

    if config.user_agents.iter().any(|ua| ua.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "user_agents cannot contain empty entries".to_string(),
        ));
    }

    Ok(())
}

/// Validates scope domain patterns
fn validate_scope_config(config: &ScopeConfig) -> Result<(), ConfigError> {
    for pattern in config.allow.iter().chain(config.deny.iter()) {
        validate_domain_pattern(pattern)?;
    }
    Ok(())
}

/// Validates extraction rules
fn validate_extraction_config(config: &ExtractionConfig) -> Result<(), ConfigError> {
    if let Some(selector) = &config.record_selector {
        validate_selector(selector)?;
    }
    validate_selector(&config.link_selector)?;
    validate_selector(&config.image_selector)?;

    let mut names = HashSet::new();
    for field in &config.fields {
        if field.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "field name cannot be empty".to_string(),
            ));
        }

        if field.name == QR_PAYLOAD_FIELD {
            return Err(ConfigError::Validation(format!(
                "field name '{}' is reserved for decoded QR payloads",
                QR_PAYLOAD_FIELD
            )));
        }

        if !names.insert(field.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate field name '{}'",
                field.name
            )));
        }

        validate_selector(&field.selector)?;
    }

    if config.block_markers.iter().any(|m| m.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "block_markers cannot contain empty entries".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.log_path.is_empty() {
        return Err(ConfigError::Validation(
            "log_path cannot be empty".to_string(),
        ));
    }

    if config.artifact_dir.is_empty() {
        return Err(ConfigError::Validation(
            "artifact_dir cannot be empty".to_string(),
        ));
    }

    if config.ledger_path.is_empty() {
        return Err(ConfigError::Validation(
            "ledger_path cannot be empty".to_string(),
        ));
    }

    if config.status_path.as_deref() == Some("") {
        return Err(ConfigError::Validation(
            "status_path cannot be empty when set".to_string(),
        ));
    }

    if config.status_interval_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "status_interval_ms must be >= 100ms, got {}ms",
            config.status_interval_ms
        )));
    }

    Ok(())
}

/// Checks that a CSS selector compiles
fn validate_selector(selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidSelector {
            selector: selector.to_string(),
            message: e.to_string(),
        })
}

/// Validates a domain pattern (supports wildcards)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    let domain = pattern.strip_prefix("*.").unwrap_or(pattern);

    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(format!(
            "Pattern '{}' has no domain after the wildcard",
            pattern
        )));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    Ok(())
}
