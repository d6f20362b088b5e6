use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::enrich::EnrichmentResult;

/// One normalized piece of content produced by a fetcher
///
/// Items are created by a fetcher, enriched in place by the enrichment
/// pipeline and never modified after they are handed to an item sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlItem {
    /// Stable identity used for deduplication
    pub identity_key: String,

    pub title: String,

    pub link: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(default)]
    pub authors: Vec<String>,

    #[serde(default)]
    pub categories: BTreeSet<String>,

    /// Source-specific fields such as `arxiv_id` or `matched_keywords`
    #[serde(default)]
    pub extra: Map<String, Value>,

    /// Step name to enrichment result
    #[serde(default)]
    pub enrichment: BTreeMap<String, EnrichmentResult>,
}

impl CrawlItem {
    pub fn new(
        identity_key: impl Into<String>,
        title: impl Into<String>,
        link: impl Into<String>,
    ) -> Self {
        Self {
            identity_key: identity_key.into(),
            title: title.into(),
            link: link.into(),
            published_time: None,
            summary: None,
            authors: Vec::new(),
            categories: BTreeSet::new(),
            extra: Map::new(),
            enrichment: BTreeMap::new(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_published(mut self, at: DateTime<Utc>) -> Self {
        self.published_time = Some(at);
        self
    }

    pub fn with_authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = authors.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the summary or an empty string
    pub fn summary_text(&self) -> &str {
        self.summary.as_deref().unwrap_or("")
    }

    /// Returns a string-valued extra field
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

/// Sorts items newest first; items without a published time go last
///
/// The sort is stable, so undated items keep their fetch order.
pub fn sort_newest_first(items: &mut [CrawlItem]) {
    items.sort_by(|a, b| match (a.published_time, b.published_time) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}
