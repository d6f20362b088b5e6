//! Configuration module for Org-Crawler
//!
//! This module handles the TOML global configuration and the directory of
//! YAML/JSON site rule files that become `SiteDescriptor`s.
//!
//! # Example
//!
//! ```no_run
//! use org_crawler::config::{load_config, load_sites};
//! use std::path::Path;
//!
//! let config = load_config(Path::new("config.toml")).unwrap();
//! let sites = load_sites(Path::new(&config.sources.rules_dir), &config).unwrap();
//! println!("{} sites, {} workers", sites.len(), config.scheduler.max_workers);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, EnrichmentConfig, HttpConfig, RuleFile, SchedulerConfig, SourcesConfig,
    StorageConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{
    compute_config_hash, compute_rules_hash, load_config, load_config_with_hash, load_rule_file,
    load_sites, substitute_env,
};
pub use validation::validate_site;
