//! Custom fetcher for sites without a feed
//!
//! A custom site is described by `CustomRules`, deserialized from the
//! site's `kind_specific_config`. Either CSS selectors describe where each
//! item and its fields live, or `extractor` names a registered
//! `PageExtractor` that reads the whole page. Pagination follows
//! `next_page_selector` up to `max_pages`.

use super::fetcher::{fetch_document, EntryError, Fetch, FetchError};
use super::feed::parse_feed_date;
use super::parser::{
    element_text, parse_selector, resolve_link, select_all_text, select_attr, select_text,
};
use crate::model::{CrawlItem, SiteDescriptor};
use crate::url::identity_for_link;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Hard upper bound on pages per fetch
pub const MAX_PAGES_CAP: u32 = 50;

/// Largest accepted `date_offset_days`, in either direction
pub const MAX_DATE_OFFSET_DAYS: i64 = 3650;

/// Selector rules for a custom site
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct CustomRules {
    pub item_selector: Option<String>,
    pub title_selector: Option<String>,
    pub link_selector: Option<String>,
    pub summary_selector: Option<String>,
    pub author_selector: Option<String>,
    pub date_selector: Option<String>,

    /// Regex with year, month and day captures, e.g. `(\d{4})年(\d{1,2})月(\d{1,2})日`
    pub date_pattern: Option<String>,

    /// chrono format string for the date text
    pub date_format: Option<String>,

    /// Days added to every parsed date, for sites that publish a day off
    #[serde(default)]
    pub date_offset_days: i64,

    /// Regex with one capture applied to the link to form the identity key
    pub id_pattern: Option<String>,

    pub next_page_selector: Option<String>,

    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Registered page extractor to use instead of selectors
    pub extractor: Option<String>,
}

fn default_max_pages() -> u32 {
    1
}

impl CustomRules {
    /// Reads the rules out of a site's `kind_specific_config`
    pub fn from_config(config: &Map<String, Value>) -> Result<Self, String> {
        serde_json::from_value(Value::Object(config.clone()))
            .map_err(|e| format!("invalid custom rules: {}", e))
    }

    /// Checks that the rules are complete and every selector and pattern compiles
    pub fn validate(&self) -> Result<(), String> {
        if self.extractor.is_none() {
            self.compile().map(|_| ())?;
        }
        if let Some(selector) = &self.next_page_selector {
            parse_selector(selector)?;
        }
        if self.max_pages == 0 {
            return Err("max_pages must be >= 1".to_string());
        }
        if self.date_offset_days.abs() > MAX_DATE_OFFSET_DAYS {
            return Err(format!(
                "date_offset_days must be within +/-{}",
                MAX_DATE_OFFSET_DAYS
            ));
        }
        Ok(())
    }

    /// Effective page limit, clamped to `1..=MAX_PAGES_CAP`
    pub fn page_limit(&self) -> u32 {
        self.max_pages.clamp(1, MAX_PAGES_CAP)
    }

    fn compile(&self) -> Result<CompiledRules, String> {
        let required = |field: &Option<String>, name: &str| {
            field
                .as_deref()
                .ok_or_else(|| format!("{} is required without an extractor", name))
                .and_then(parse_selector)
        };
        let optional = |field: &Option<String>| field.as_deref().map(parse_selector).transpose();
        let pattern = |field: &Option<String>| {
            field
                .as_deref()
                .map(|p| Regex::new(p).map_err(|e| format!("invalid pattern '{}': {}", p, e)))
                .transpose()
        };

        Ok(CompiledRules {
            item: required(&self.item_selector, "item_selector")?,
            title: required(&self.title_selector, "title_selector")?,
            link: required(&self.link_selector, "link_selector")?,
            summary: optional(&self.summary_selector)?,
            author: optional(&self.author_selector)?,
            date: optional(&self.date_selector)?,
            date_pattern: pattern(&self.date_pattern)?,
            date_format: self.date_format.clone(),
            date_offset: Duration::try_days(self.date_offset_days)
                .ok_or_else(|| format!("date_offset_days {} is out of range", self.date_offset_days))?,
            id_pattern: pattern(&self.id_pattern)?,
        })
    }
}

struct CompiledRules {
    item: Selector,
    title: Selector,
    link: Selector,
    summary: Option<Selector>,
    author: Option<Selector>,
    date: Option<Selector>,
    date_pattern: Option<Regex>,
    date_format: Option<String>,
    date_offset: Duration,
    id_pattern: Option<Regex>,
}

impl CompiledRules {
    fn extract(&self, element: &ElementRef<'_>, page_url: &Url) -> Result<CrawlItem, EntryError> {
        let title = select_text(element, &self.title).unwrap_or_default();
        let link = select_attr(element, &self.link, "href")
            .and_then(|href| resolve_link(&href, page_url))
            .unwrap_or_default();

        if title.is_empty() && link.is_empty() {
            return Err(EntryError::MissingContent);
        }

        let site_id = self
            .id_pattern
            .as_ref()
            .and_then(|re| re.captures(&link))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());
        let identity_key = site_id
            .clone()
            .or_else(|| identity_for_link(&link))
            .ok_or(EntryError::MissingIdentity)?;

        let mut item = CrawlItem::new(identity_key, title, link);
        item.summary = self.summary.as_ref().and_then(|sel| summary_text(element, sel));
        item.authors = self
            .author
            .as_ref()
            .map(|sel| select_all_text(element, sel))
            .unwrap_or_default()
            .into_iter()
            .filter(|name| name != "..." && name != "…")
            .collect();
        item.published_time = self
            .date
            .as_ref()
            .and_then(|sel| select_text(element, sel))
            .and_then(|text| self.parse_date(&text));

        if let Some(id) = site_id {
            item.extra.insert("site_id".to_string(), Value::String(id));
        }

        Ok(item)
    }

    fn parse_date(&self, text: &str) -> Option<DateTime<Utc>> {
        let parsed = if let Some(pattern) = &self.date_pattern {
            let caps = pattern.captures(text)?;
            let year = caps.get(1)?.as_str().parse().ok()?;
            let month = caps.get(2)?.as_str().parse().ok()?;
            let day = caps.get(3)?.as_str().parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, day)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|n| n.and_utc())
        } else if let Some(format) = &self.date_format {
            NaiveDateTime::parse_from_str(text, format)
                .ok()
                .or_else(|| {
                    NaiveDate::parse_from_str(text, format)
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
                .map(|n| n.and_utc())
        } else {
            parse_feed_date(text)
        };

        parsed.and_then(|dt| dt.checked_add_signed(self.date_offset))
    }
}

/// Text of the summary element, or its `title` attribute when that is longer
///
/// Listing pages often truncate the visible summary and keep the full text
/// in the tooltip.
fn summary_text(element: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    let summary = element.select(selector).next()?;
    let text = element_text(&summary);
    let full = summary
        .value()
        .attr("title")
        .map(super::parser::clean_text)
        .unwrap_or_default();
    let best = if full.chars().count() > text.chars().count() {
        full
    } else {
        text
    };
    Some(best).filter(|s| !s.is_empty())
}

/// Reads every item off a parsed page
///
/// Each element of the returned vector is one item or the reason it was
/// skipped; the fetcher logs and drops the failures.
pub type PageExtractor =
    Arc<dyn Fn(&Html, &Url) -> Vec<Result<CrawlItem, EntryError>> + Send + Sync>;

/// Page extractors registered by name
#[derive(Clone, Default)]
pub struct PageExtractorRegistry {
    extractors: HashMap<String, PageExtractor>,
}

impl PageExtractorRegistry {
    pub fn register(&mut self, name: impl Into<String>, extractor: PageExtractor) {
        self.extractors.insert(name.into(), extractor);
    }

    pub fn get(&self, name: &str) -> Option<PageExtractor> {
        self.extractors.get(name).cloned()
    }
}

/// Items read from one page plus the link to the next one
#[derive(Debug, Default)]
pub struct PageResult {
    pub items: Vec<CrawlItem>,
    pub skipped: usize,
    pub next_page: Option<Url>,
}

/// Extracts items and the next-page link from one HTML page
///
/// # Arguments
///
/// * `site_name` - Used in log lines
/// * `body` - Page HTML
/// * `page_url` - Base for relative links
/// * `rules` - The site's rules
/// * `extractor` - Page extractor to use instead of the selectors, if any
///
/// # Returns
///
/// * `Ok(PageResult)` - Items (possibly none) and the next page URL
/// * `Err(String)` - The rules do not compile
pub fn extract_page(
    site_name: &str,
    body: &str,
    page_url: &Url,
    rules: &CustomRules,
    extractor: Option<&PageExtractor>,
) -> Result<PageResult, String> {
    let document = Html::parse_document(body);

    let results: Vec<Result<CrawlItem, EntryError>> = match extractor {
        Some(extractor) => extractor(&document, page_url),
        None => {
            let compiled = rules.compile()?;
            document
                .select(&compiled.item)
                .map(|element| compiled.extract(&element, page_url))
                .collect()
        }
    };

    let mut page = PageResult::default();
    for (index, result) in results.into_iter().enumerate() {
        match result {
            Ok(item) => page.items.push(item),
            Err(e) => {
                page.skipped += 1;
                warn!("[{}] Skipping malformed item #{} on {}: {}", site_name, index, page_url, e);
            }
        }
    }

    if let Some(selector) = &rules.next_page_selector {
        let selector = parse_selector(selector)?;
        page.next_page = document
            .select(&selector)
            .find_map(|el| el.value().attr("href"))
            .and_then(|href| resolve_link(href, page_url))
            .and_then(|link| Url::parse(&link).ok());
    }

    Ok(page)
}

/// Fetcher for `SiteKind::Custom` sites
pub struct CustomFetcher {
    client: Client,
    extractors: PageExtractorRegistry,
}

impl CustomFetcher {
    pub fn new(client: Client) -> Self {
        Self::with_extractors(client, PageExtractorRegistry::default())
    }

    pub fn with_extractors(client: Client, extractors: PageExtractorRegistry) -> Self {
        Self { client, extractors }
    }
}

#[async_trait]
impl Fetch for CustomFetcher {
    /// Fetches the first page and follows next-page links
    ///
    /// Only a failure on the first page fails the fetch; a later page that
    /// cannot be fetched or parsed ends pagination with the items so far.
    async fn fetch(&self, site: &SiteDescriptor) -> Result<Vec<CrawlItem>, FetchError> {
        let rules = CustomRules::from_config(&site.kind_specific_config)
            .map_err(|e| FetchError::parse(&site.source_url, e))?;
        rules
            .validate()
            .map_err(|e| FetchError::parse(&site.source_url, e))?;

        let extractor = match &rules.extractor {
            Some(name) => Some(self.extractors.get(name).ok_or_else(|| {
                FetchError::parse(&site.source_url, format!("unknown page extractor '{}'", name))
            })?),
            None => None,
        };

        let mut page_url = Url::parse(&site.source_url)
            .map_err(|e| FetchError::parse(&site.source_url, e.to_string()))?;
        let mut visited = HashSet::new();
        let mut items = Vec::new();

        for page_number in 0..rules.page_limit() {
            if !visited.insert(page_url.to_string()) {
                debug!("[{}] Pagination loop at {}, stopping", site.name, page_url);
                break;
            }

            let body = match fetch_document(&self.client, page_url.as_str()).await {
                Ok(body) => body,
                Err(e) if page_number == 0 => return Err(e),
                Err(e) => {
                    warn!("[{}] Stopping pagination: {}", site.name, e);
                    break;
                }
            };

            let page = match extract_page(&site.name, &body, &page_url, &rules, extractor.as_ref())
            {
                Ok(page) => page,
                Err(e) if page_number == 0 => {
                    return Err(FetchError::parse(page_url.as_str(), e));
                }
                Err(e) => {
                    warn!("[{}] Stopping pagination at {}: {}", site.name, page_url, e);
                    break;
                }
            };

            debug!(
                "[{}] Page {} yielded {} items ({} skipped)",
                site.name,
                page_number + 1,
                page.items.len(),
                page.skipped
            );
            items.extend(page.items);

            match page.next_page {
                Some(next) => page_url = next,
                None => break,
            }
        }

        Ok(items)
    }

    fn name(&self) -> &'static str {
        "custom"
    }
}
