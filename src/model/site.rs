use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::crawler::FilterRule;

/// Cadence used when a rule file does not set one
pub const DEFAULT_CADENCE_MINUTES: u32 = 120;

/// The kind of source a site is, which selects its fetcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteKind {
    /// RSS 2.0, RSS 1.0/RDF or Atom feed
    #[serde(alias = "rss", alias = "atom")]
    Feed,

    /// HTML page scraped with selector rules or a named page extractor
    Custom,
}

impl SiteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feed => "feed",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for SiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A configured site and everything needed to crawl it
///
/// Descriptors are built at config-load time and held by the scheduler for
/// the life of the process. Only the scheduler writes `last_crawl_time`.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteDescriptor {
    /// Unique name, also used as the storage folder key
    pub name: String,

    /// Feed URL or first page URL
    pub source_url: String,

    pub kind: SiteKind,

    /// Minutes between the end of one crawl and the next
    pub cadence_minutes: u32,

    pub enabled: bool,

    /// Keyword filter; empty means every item is kept
    pub keywords: Vec<String>,

    /// Rule filter chain evaluated after the keyword filter
    pub filters: Vec<FilterRule>,

    /// Enrichment steps to run for this site; `None` runs every configured step
    pub enrichment: Option<Vec<String>>,

    /// Fetcher-specific settings, opaque to everything but the fetcher
    pub kind_specific_config: Map<String, Value>,

    pub last_crawl_time: Option<DateTime<Utc>>,
}

impl SiteDescriptor {
    /// Creates an enabled descriptor with the default cadence and no filtering
    pub fn new(name: impl Into<String>, source_url: impl Into<String>, kind: SiteKind) -> Self {
        Self {
            name: name.into(),
            source_url: source_url.into(),
            kind,
            cadence_minutes: DEFAULT_CADENCE_MINUTES,
            enabled: true,
            keywords: Vec::new(),
            filters: Vec::new(),
            enrichment: None,
            kind_specific_config: Map::new(),
            last_crawl_time: None,
        }
    }

    pub fn with_cadence(mut self, minutes: u32) -> Self {
        self.cadence_minutes = minutes;
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filters(mut self, filters: Vec<FilterRule>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.kind_specific_config.insert(key.into(), value);
        self
    }

    pub fn with_last_crawl_time(mut self, at: DateTime<Utc>) -> Self {
        self.last_crawl_time = Some(at);
        self
    }

    /// Returns the cadence as a chrono duration
    pub fn cadence(&self) -> Duration {
        Duration::minutes(i64::from(self.cadence_minutes))
    }

    /// Returns true if the site should be crawled at `now`
    ///
    /// A site that has never been crawled is due immediately. Disabled sites
    /// are never due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        match self.last_crawl_time {
            None => true,
            Some(last) => now.signed_duration_since(last) >= self.cadence(),
        }
    }

    /// Returns when the site will next become due, if it has been crawled before
    pub fn next_due_at(&self) -> Option<DateTime<Utc>> {
        self.last_crawl_time.map(|last| last + self.cadence())
    }

    /// Looks up a string value in the fetcher-specific config
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.kind_specific_config.get(key).and_then(Value::as_str)
    }
}
