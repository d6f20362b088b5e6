use crate::config::types::{
    Config, EnrichmentConfig, HttpConfig, SchedulerConfig, StorageConfig, UserAgentConfig,
};
use crate::crawler::CustomRules;
use crate::model::{SiteDescriptor, SiteKind};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Upper bound on concurrent crawl jobs
const MAX_WORKERS_LIMIT: usize = 64;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_scheduler_config(&config.scheduler)?;
    validate_http_config(&config.http)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_storage_config(&config.storage)?;
    validate_enrichment_config(&config.enrichment)?;
    Ok(())
}

fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.check_interval_secs < 1 {
        return Err(ConfigError::Validation(
            "check-interval-secs must be >= 1".to_string(),
        ));
    }

    if config.max_workers < 1 || config.max_workers > MAX_WORKERS_LIMIT {
        return Err(ConfigError::Validation(format!(
            "max-workers must be between 1 and {}, got {}",
            MAX_WORKERS_LIMIT, config.max_workers
        )));
    }

    if config.default_cadence_minutes < 1 {
        return Err(ConfigError::Validation(
            "default-cadence-minutes must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_http_config(config: &HttpConfig) -> Result<(), ConfigError> {
    if config.timeout_secs < 1 || config.connect_timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "HTTP timeouts must be >= 1s, got timeout={}s connect={}s",
            config.timeout_secs, config.connect_timeout_secs
        )));
    }

    if config.fetch_retries > 10 {
        return Err(ConfigError::Validation(format!(
            "fetch-retries must be <= 10, got {}",
            config.fetch_retries
        )));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    if let Some(contact_url) = &config.contact_url {
        Url::parse(contact_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;
    }

    if let Some(email) = &config.contact_email {
        validate_email(email)?;
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.base_path.is_empty() {
        return Err(ConfigError::Validation(
            "base-path cannot be empty".to_string(),
        ));
    }

    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if config.seen_max_entries == Some(0) {
        return Err(ConfigError::Validation(
            "seen-max-entries must be >= 1 when set".to_string(),
        ));
    }

    Ok(())
}

fn validate_enrichment_config(config: &EnrichmentConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "enrichment max-attempts must be >= 1".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for step in &config.steps {
        if step.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "enrichment step name cannot be empty".to_string(),
            ));
        }
        if !names.insert(step.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate enrichment step '{}'",
                step.name
            )));
        }
    }

    if let Some(llm) = &config.llm {
        Url::parse(&llm.endpoint)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid LLM endpoint: {}", e)))?;
    }

    Ok(())
}

/// Validates one site descriptor against the global configuration
pub fn validate_site(site: &SiteDescriptor, config: &Config) -> Result<(), ConfigError> {
    validate_site_name(&site.name)?;

    let url = Url::parse(&site.source_url).map_err(|e| {
        ConfigError::InvalidUrl(format!("Site '{}' url '{}': {}", site.name, site.source_url, e))
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "Site '{}' url must use http or https",
            site.name
        )));
    }

    if site.cadence_minutes < 1 {
        return Err(ConfigError::Validation(format!(
            "Site '{}' cadence must be a positive number of minutes",
            site.name
        )));
    }

    if site.keywords.iter().any(|k| k.trim().is_empty()) {
        return Err(ConfigError::Validation(format!(
            "Site '{}' has an empty keyword",
            site.name
        )));
    }

    for rule in &site.filters {
        rule.validate().map_err(|e| {
            ConfigError::Validation(format!("Site '{}' filter: {}", site.name, e))
        })?;
    }

    if site.kind == SiteKind::Custom {
        CustomRules::from_config(&site.kind_specific_config)
            .and_then(|rules| rules.validate())
            .map_err(|e| {
                ConfigError::Validation(format!("Site '{}' custom rules: {}", site.name, e))
            })?;
    }

    if let Some(steps) = &site.enrichment {
        for step in steps {
            if !config.enrichment.steps.iter().any(|s| &s.name == step) {
                return Err(ConfigError::Validation(format!(
                    "Site '{}' references unknown enrichment step '{}'",
                    site.name, step
                )));
            }
        }
    }

    Ok(())
}

/// Site names become directory names, so keep them path-safe
fn validate_site_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::Validation(
            "site name cannot be empty".to_string(),
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
        || name.starts_with('.')
    {
        return Err(ConfigError::Validation(format!(
            "site name '{}' may contain only alphanumerics, '-', '_' and '.', and cannot start with '.'",
            name
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 || parts[0].is_empty() || !parts[1].contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }
    Ok(())
}
