//! Post-fetch item filtering
//!
//! Two stages run between fetch and deduplication:
//! - the keyword filter, driven by the site's `keywords`
//! - the rule filter chain, driven by the site's `filters`

use crate::model::CrawlItem;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Keywords (case-insensitive) found in an item's title or summary
pub fn matched_keywords(item: &CrawlItem, keywords: &[String]) -> Vec<String> {
    let title = item.title.to_lowercase();
    let summary = item.summary_text().to_lowercase();

    keywords
        .iter()
        .filter(|keyword| {
            let keyword = keyword.to_lowercase();
            title.contains(&keyword) || summary.contains(&keyword)
        })
        .cloned()
        .collect()
}

/// Keeps items matching at least one keyword
///
/// With no keywords every item is kept unchanged. Kept items record the
/// keywords they matched in `extra.matched_keywords`. Order is preserved.
pub fn apply_keyword_filter(items: Vec<CrawlItem>, keywords: &[String]) -> Vec<CrawlItem> {
    if keywords.is_empty() {
        return items;
    }

    items
        .into_iter()
        .filter_map(|mut item| {
            let matched = matched_keywords(&item, keywords);
            if matched.is_empty() {
                return None;
            }
            item.extra.insert(
                "matched_keywords".to_string(),
                Value::Array(matched.into_iter().map(Value::String).collect()),
            );
            Some(item)
        })
        .collect()
}

/// One rule in a site's filter chain
///
/// Rules are written in rule files as tagged maps, e.g.
/// `{ type: title, keywords: [agent] }` or
/// `{ type: time_range, relative_hours: 48 }`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterRule {
    Title {
        keywords: Vec<String>,
        #[serde(default)]
        negate: bool,
    },
    Summary {
        keywords: Vec<String>,
        #[serde(default)]
        negate: bool,
    },
    Author {
        keywords: Vec<String>,
        #[serde(default)]
        negate: bool,
    },
    /// Half-open window `[start, end)` on `published_time`
    #[serde(alias = "time")]
    TimeRange {
        #[serde(default)]
        relative_hours: Option<i64>,
        #[serde(default)]
        start: Option<String>,
        #[serde(default)]
        end: Option<String>,
        #[serde(default)]
        negate: bool,
    },
    And {
        filters: Vec<FilterRule>,
        #[serde(default)]
        negate: bool,
    },
    Or {
        filters: Vec<FilterRule>,
        #[serde(default)]
        negate: bool,
    },
    Not {
        filter: Box<FilterRule>,
    },
}

/// Largest accepted `relative_hours` window (100 years)
pub const MAX_RELATIVE_HOURS: i64 = 24 * 365 * 100;

fn contains_any(haystack: &str, keywords: &[String]) -> bool {
    let haystack = haystack.to_lowercase();
    keywords
        .iter()
        .any(|keyword| haystack.contains(&keyword.to_lowercase()))
}

/// Parses a window bound as a date-time or a bare date, in UTC
fn parse_bound(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|n| n.and_utc())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|n| n.and_utc())
        })
}

impl FilterRule {
    /// Checks windows and bounds of this rule and every nested rule
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::TimeRange {
                relative_hours,
                start,
                end,
                ..
            } => {
                if let Some(hours) = relative_hours {
                    if !(0..=MAX_RELATIVE_HOURS).contains(hours) {
                        return Err(format!(
                            "relative_hours must be between 0 and {}, got {}",
                            MAX_RELATIVE_HOURS, hours
                        ));
                    }
                }
                for bound in [start, end].into_iter().flatten() {
                    if parse_bound(bound).is_none() {
                        return Err(format!("unparsable time bound '{}'", bound));
                    }
                }
                Ok(())
            }
            Self::And { filters, .. } | Self::Or { filters, .. } => {
                filters.iter().try_for_each(FilterRule::validate)
            }
            Self::Not { filter } => filter.validate(),
            Self::Title { .. } | Self::Summary { .. } | Self::Author { .. } => Ok(()),
        }
    }

    /// Evaluates the rule for one item
    ///
    /// # Arguments
    ///
    /// * `item` - The item to test
    /// * `now` - Reference time for relative time windows
    pub fn matches(&self, item: &CrawlItem, now: DateTime<Utc>) -> bool {
        let (result, negate) = match self {
            Self::Title { keywords, negate } => (contains_any(&item.title, keywords), *negate),
            Self::Summary { keywords, negate } => {
                (contains_any(item.summary_text(), keywords), *negate)
            }
            Self::Author { keywords, negate } => (
                item.authors
                    .iter()
                    .any(|author| contains_any(author, keywords)),
                *negate,
            ),
            Self::TimeRange {
                relative_hours,
                start,
                end,
                negate,
            } => (
                Self::in_window(item, now, *relative_hours, start, end),
                *negate,
            ),
            Self::And { filters, negate } => {
                (filters.iter().all(|f| f.matches(item, now)), *negate)
            }
            Self::Or { filters, negate } => {
                (filters.iter().any(|f| f.matches(item, now)), *negate)
            }
            Self::Not { filter } => (!filter.matches(item, now), false),
        };

        result != negate
    }

    fn in_window(
        item: &CrawlItem,
        now: DateTime<Utc>,
        relative_hours: Option<i64>,
        start: &Option<String>,
        end: &Option<String>,
    ) -> bool {
        let Some(published) = item.published_time else {
            return false;
        };

        let mut lower = start.as_deref().and_then(parse_bound);
        let mut upper = end.as_deref().and_then(parse_bound);

        if let Some(hours) = relative_hours {
            if let Some(window_start) =
                Duration::try_hours(hours).and_then(|span| now.checked_sub_signed(span))
            {
                lower = Some(lower.map_or(window_start, |l| l.max(window_start)));
            }
            if upper.is_none() {
                // An item published exactly now still belongs to the window
                upper = now.checked_add_signed(Duration::seconds(1));
            }
        }

        lower.map_or(true, |l| published >= l) && upper.map_or(true, |u| published < u)
    }
}

/// Keeps items matching every rule in the chain, preserving order
pub fn apply_rules(items: Vec<CrawlItem>, rules: &[FilterRule], now: DateTime<Utc>) -> Vec<CrawlItem> {
    if rules.is_empty() {
        return items;
    }
    items
        .into_iter()
        .filter(|item| rules.iter().all(|rule| rule.matches(item, now)))
        .collect()
}
