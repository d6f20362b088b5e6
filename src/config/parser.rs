use crate::config::types::{Config, RuleFile};
use crate::config::validation::{validate, validate_site};
use crate::model::SiteDescriptor;
use crate::ConfigError;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use org_crawler::config::load_config;
///
/// let config = load_config(Path::new("config.toml")).unwrap();
/// println!("Workers: {}", config.scheduler.max_workers);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

/// Lists the rule files in a directory in a stable order
fn rule_files(dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_rule = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| matches!(ext, "yaml" | "yml" | "json"))
            .unwrap_or(false);
        if is_rule && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Loads every site rule file in `dir` into descriptors
///
/// Files ending in `.yaml`, `.yml` or `.json` are read in name order. String
/// values of the form `${VAR}` are replaced from the environment before the
/// rule is deserialized.
///
/// # Arguments
///
/// * `dir` - Rules directory
/// * `config` - Global configuration (default cadence, enrichment step names)
///
/// # Returns
///
/// * `Ok(Vec<SiteDescriptor>)` - Validated descriptors, unique by name
/// * `Err(ConfigError)` - A file failed to parse or validate, or two sites share a name
pub fn load_sites(dir: &Path, config: &Config) -> Result<Vec<SiteDescriptor>, ConfigError> {
    let mut sites = Vec::new();
    let mut names = HashSet::new();

    for path in rule_files(dir)? {
        let site = load_rule_file(&path, config.scheduler.default_cadence_minutes)?;
        validate_site(&site, config)?;

        if !names.insert(site.name.clone()) {
            return Err(ConfigError::DuplicateSite(site.name));
        }

        debug!("Loaded site '{}' from {}", site.name, path.display());
        sites.push(site);
    }

    info!("Loaded {} site(s) from {}", sites.len(), dir.display());
    Ok(sites)
}

/// Parses a single YAML or JSON rule file
pub fn load_rule_file(
    path: &Path,
    default_cadence_minutes: u32,
) -> Result<SiteDescriptor, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let mut value: Value = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&content)?,
        _ => serde_yaml::from_str(&content)?,
    };
    substitute_env(&mut value, &|name| std::env::var(name).ok());

    let rule: RuleFile = serde_json::from_value(value)?;
    Ok(rule.into_descriptor(default_cadence_minutes))
}

/// Computes a SHA-256 hash over the names and contents of all rule files
///
/// Used to detect edits to the rules directory between scheduler ticks.
pub fn compute_rules_hash(dir: &Path) -> Result<String, ConfigError> {
    let mut hasher = Sha256::new();
    for path in rule_files(dir)? {
        if let Some(name) = path.file_name() {
            hasher.update(name.to_string_lossy().as_bytes());
        }
        hasher.update(std::fs::read(&path)?);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env pattern is a valid regex")
    })
}

/// Replaces `${VAR}` references in every string of a JSON value
///
/// References to unset variables are left as written.
pub fn substitute_env(value: &mut Value, lookup: &dyn Fn(&str) -> Option<String>) {
    match value {
        Value::String(s) => {
            if s.contains("${") {
                let replaced = env_pattern().replace_all(s, |caps: &regex::Captures| {
                    lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
                });
                *s = replaced.into_owned();
            }
        }
        Value::Array(items) => {
            for item in items {
                substitute_env(item, lookup);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                substitute_env(item, lookup);
            }
        }
        _ => {}
    }
}
