use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::crawler::FilterRule;
use crate::enrich::{EnrichmentStep, LlmConfig};
use crate::model::{SiteDescriptor, SiteKind};
use crate::output::OutputFormat;
use crate::state::RetentionPolicy;

/// Main configuration structure for Org-Crawler
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
}

/// Control loop and worker pool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchedulerConfig {
    /// Seconds between due-site checks
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Maximum number of crawl jobs running at once
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Cadence for rule files that do not set one
    #[serde(default = "default_cadence_minutes")]
    pub default_cadence_minutes: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            max_workers: default_max_workers(),
            default_cadence_minutes: default_cadence_minutes(),
        }
    }
}

/// HTTP client and fetch retry configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Extra attempts after a retryable fetch failure
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,

    /// Delay between fetch attempts
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            fetch_retries: default_fetch_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url", default)]
    pub contact_url: Option<String>,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email", default)]
    pub contact_email: Option<String>,
}

/// Persistent state and item output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageConfig {
    /// Root of the `<site>/<date>/` output tree
    pub base_path: String,

    /// Path to the SQLite state database
    pub database_path: String,

    #[serde(default)]
    pub output_format: OutputFormat,

    /// Seen identity keys not seen for this many days are pruned; 0 keeps them forever
    #[serde(default = "default_seen_retention_days")]
    pub seen_retention_days: u32,

    /// Optional cap on seen identity keys per site
    #[serde(default)]
    pub seen_max_entries: Option<usize>,
}

impl StorageConfig {
    /// Builds the seen-set retention policy
    pub fn retention_policy(&self) -> RetentionPolicy {
        let days = Some(self.seen_retention_days).filter(|days| *days > 0);
        RetentionPolicy::new(days, self.seen_max_entries)
    }
}

/// Where site rule files live
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourcesConfig {
    #[serde(default = "default_rules_dir")]
    pub rules_dir: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            rules_dir: default_rules_dir(),
        }
    }
}

/// Enrichment pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EnrichmentConfig {
    /// Ordered steps applied to every new item
    #[serde(default)]
    pub steps: Vec<EnrichmentStep>,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Per-call timeout for providers
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,

    /// Minimum spacing between provider calls
    #[serde(default)]
    pub min_interval_ms: u64,

    /// OpenAI-compatible endpoint; without it LLM capabilities are unavailable
    #[serde(default)]
    pub llm: Option<LlmConfig>,

    /// Category name to keyword list for the local classifier
    #[serde(default)]
    pub categories: BTreeMap<String, Vec<String>>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            timeout_secs: default_provider_timeout_secs(),
            min_interval_ms: 0,
            llm: None,
            categories: BTreeMap::new(),
        }
    }
}

/// One site as written in a YAML or JSON rule file
///
/// Field aliases accept the older `url` / `crawl_type` / `update_frequency`
/// spelling.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleFile {
    pub name: String,

    #[serde(alias = "url")]
    pub source_url: String,

    #[serde(alias = "crawl_type")]
    pub kind: SiteKind,

    #[serde(default, alias = "update_frequency")]
    pub cadence_minutes: Option<u32>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub filters: Vec<FilterRule>,

    #[serde(default)]
    pub enrichment: Option<Vec<String>>,

    #[serde(default, alias = "config")]
    pub kind_specific_config: Map<String, Value>,
}

impl RuleFile {
    /// Converts the rule into a descriptor, filling in the default cadence
    pub fn into_descriptor(self, default_cadence_minutes: u32) -> SiteDescriptor {
        SiteDescriptor {
            name: self.name,
            source_url: self.source_url,
            kind: self.kind,
            cadence_minutes: self.cadence_minutes.unwrap_or(default_cadence_minutes),
            enabled: self.enabled,
            keywords: self.keywords,
            filters: self.filters,
            enrichment: self.enrichment,
            kind_specific_config: self.kind_specific_config,
            last_crawl_time: None,
        }
    }
}

fn default_check_interval_secs() -> u64 {
    60
}

fn default_max_workers() -> usize {
    5
}

fn default_cadence_minutes() -> u32 {
    crate::model::DEFAULT_CADENCE_MINUTES
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_fetch_retries() -> u32 {
    2
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_seen_retention_days() -> u32 {
    90
}

fn default_rules_dir() -> String {
    "rules".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_provider_timeout_secs() -> u64 {
    60
}

fn default_enabled() -> bool {
    true
}
