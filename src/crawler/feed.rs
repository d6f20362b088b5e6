//! Feed fetcher for RSS 2.0, RSS 1.0/RDF and Atom sources
//!
//! Parsing happens in two stages. `parse_feed` walks the XML with the
//! `quick-xml` event reader and records every `<item>`/`<entry>` as a
//! `RawEntry`, a plain key/value view of the entry. An `EntryExtractor`
//! then turns each raw entry into a `CrawlItem`. A bad entry is skipped;
//! only an unreadable document fails the fetch.

use super::fetcher::{fetch_document, EntryError, Fetch, FetchError};
use super::parser::strip_tags;
use crate::model::{CrawlItem, SiteDescriptor};
use crate::url::identity_for_link;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use reqwest::Client;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Name of the extractor used when a site does not choose one
pub const GENERIC_EXTRACTOR: &str = "generic";

/// Extractor for arXiv listing feeds
pub const ARXIV_EXTRACTOR: &str = "arxiv";

/// Root elements accepted as a feed
const FEED_ROOTS: &[&str] = &["rss", "feed", "RDF"];

/// One feed entry as an opaque key/value mapping
///
/// Keys are element names as written in the document (`title`,
/// `dc:creator`), nested elements joined with `/` (`author/name`), and
/// attributes as `element@attr` (`category@term`). Attributes of the entry
/// element itself are stored as `@attr`. A `<link>` with a `rel` other than
/// `alternate` is stored under `link.<rel>` so it does not shadow the
/// article link.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntry {
    fields: BTreeMap<String, Vec<String>>,
}

impl RawEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.entry(key.into()).or_default().push(value.into());
    }

    /// First non-empty value for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)?
            .iter()
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
    }

    /// All values recorded for `key`, in document order
    pub fn get_all(&self, key: &str) -> &[String] {
        self.fields.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First non-empty value among `keys`, tried in order
    pub fn first_of(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|key| self.get(key))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// An element open inside the current entry
struct OpenElement {
    key: String,
    text: String,
}

fn qualified_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// Computes the entry-relative key for an element
fn element_key(e: &BytesStart<'_>, parent: Option<&str>) -> String {
    let mut name = qualified_name(e);

    if local_name(e) == "link" {
        let rel = e
            .try_get_attribute("rel")
            .ok()
            .flatten()
            .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()));
        if let Some(rel) = rel.filter(|rel| rel != "alternate") {
            name = format!("{}.{}", name, rel);
        }
    }

    match parent {
        Some(parent) => format!("{}/{}", parent, name),
        None => name,
    }
}

fn record_attributes(entry: &mut RawEntry, e: &BytesStart<'_>, key: &str) {
    for attr in e.attributes().flatten() {
        let attr_name = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        if let Ok(value) = attr.unescape_value() {
            entry.insert(format!("{}@{}", key, attr_name), value.into_owned());
        }
    }
}

/// Parses a feed document into raw entries
///
/// # Arguments
///
/// * `xml` - The feed body
///
/// # Returns
///
/// * `Ok(Vec<RawEntry>)` - One raw entry per `<item>` or `<entry>`, possibly none
/// * `Err(String)` - The body is not well-formed XML or has no feed root
pub fn parse_feed(xml: &str) -> Result<Vec<RawEntry>, String> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    let mut root_seen = false;
    let mut entries = Vec::new();
    let mut current: Option<RawEntry> = None;
    let mut stack: Vec<OpenElement> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if !root_seen {
                    let root = local_name(&e);
                    if !FEED_ROOTS.contains(&root.as_str()) {
                        return Err(format!("unexpected root element <{}>", root));
                    }
                    root_seen = true;
                    continue;
                }

                match current.as_mut() {
                    None => {
                        let name = local_name(&e);
                        if name == "item" || name == "entry" {
                            let mut entry = RawEntry::new();
                            record_attributes(&mut entry, &e, "");
                            current = Some(entry);
                        }
                    }
                    Some(entry) => {
                        let key = element_key(&e, stack.last().map(|el| el.key.as_str()));
                        record_attributes(entry, &e, &key);
                        stack.push(OpenElement {
                            key,
                            text: String::new(),
                        });
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(entry) = current.as_mut() {
                    let key = element_key(&e, stack.last().map(|el| el.key.as_str()));
                    record_attributes(entry, &e, &key);
                } else if !root_seen {
                    return Err("document has no feed content".to_string());
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(open) = stack.last_mut() {
                    match e.unescape() {
                        Ok(text) => open.text.push_str(&text),
                        Err(_) => open.text.push_str(&String::from_utf8_lossy(&e)),
                    }
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(open) = stack.last_mut() {
                    open.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                if let Some(entry) = current.as_mut() {
                    match stack.pop() {
                        Some(open) => {
                            let text = open.text.trim();
                            if !text.is_empty() {
                                entry.insert(open.key, text);
                            }
                        }
                        None => {
                            if let Some(entry) = current.take() {
                                entries.push(entry);
                            }
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "XML error at byte {}: {}",
                    reader.buffer_position(),
                    e
                ));
            }
            _ => {}
        }
        buf.clear();
    }

    if !root_seen {
        return Err("document has no feed root element".to_string());
    }

    Ok(entries)
}

/// Parses the date formats seen in feeds
///
/// RFC 2822 (`pubDate`), RFC 3339 (Atom, `dc:date`) and a few bare
/// date-time layouts, all read as UTC when no offset is given. Returns
/// `None` for anything else.
pub fn parse_feed_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    const LAYOUTS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];
    for layout in LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, layout) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Turns a raw entry into a crawl item
pub type EntryExtractor = Arc<dyn Fn(&RawEntry) -> Result<CrawlItem, EntryError> + Send + Sync>;

/// Entry extractors registered by name
#[derive(Clone)]
pub struct ExtractorRegistry {
    extractors: HashMap<String, EntryExtractor>,
}

impl Default for ExtractorRegistry {
    /// Registry with the built-in `generic` and `arxiv` extractors
    fn default() -> Self {
        let mut registry = Self {
            extractors: HashMap::new(),
        };
        registry.register(GENERIC_EXTRACTOR, Arc::new(extract_generic));
        registry.register(ARXIV_EXTRACTOR, Arc::new(extract_arxiv));
        registry
    }
}

impl ExtractorRegistry {
    pub fn register(&mut self, name: impl Into<String>, extractor: EntryExtractor) {
        self.extractors.insert(name.into(), extractor);
    }

    pub fn get(&self, name: &str) -> Option<EntryExtractor> {
        self.extractors.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.extractors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

const IDENTITY_KEYS: &[&str] = &["guid", "id", "@rdf:about"];
const LINK_KEYS: &[&str] = &["link", "link@href"];
const DATE_KEYS: &[&str] = &["pubDate", "published", "updated", "dc:date"];
const SUMMARY_KEYS: &[&str] = &["description", "summary", "content:encoded", "content"];
const AUTHOR_KEYS: &[&str] = &["dc:creator", "author/name", "author"];
const CATEGORY_KEYS: &[&str] = &["category", "category@term", "dc:subject"];

/// Keys consumed by `extract_generic`; everything else lands in `extra`
fn is_consumed_key(key: &str) -> bool {
    key.contains('@')
        || key == "title"
        || key.starts_with("author/")
        || IDENTITY_KEYS.contains(&key)
        || LINK_KEYS.contains(&key)
        || DATE_KEYS.contains(&key)
        || SUMMARY_KEYS.contains(&key)
        || AUTHOR_KEYS.contains(&key)
        || CATEGORY_KEYS.contains(&key)
}

/// Splits author fields into names
///
/// Handles comma-separated lists (`Alice, Bob`) and the RSS
/// `email (Name)` form. Duplicates are dropped, order is kept.
pub fn split_authors<'a>(values: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut authors: Vec<String> = Vec::new();
    for value in values {
        let value = strip_tags(value);
        let value = match (value.find('('), value.rfind(')')) {
            (Some(open), Some(close)) if open < close && value[..open].contains('@') => {
                value[open + 1..close].to_string()
            }
            _ => value,
        };
        for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if !authors.iter().any(|a| a == name) {
                authors.push(name.to_string());
            }
        }
    }
    authors
}

/// Extractor for ordinary RSS and Atom feeds
///
/// Reads `title`, `link`/`link@href`, `guid`/`id`/`@rdf:about`,
/// `pubDate`/`published`/`updated`/`dc:date`,
/// `description`/`summary`/`content`, `dc:creator`/`author`/`author/name`
/// and `category`/`category@term`/`dc:subject`. Any other element is copied
/// into `extra` under its key.
pub fn extract_generic(entry: &RawEntry) -> Result<CrawlItem, EntryError> {
    let title = entry.get("title").map(strip_tags).unwrap_or_default();
    let link = entry.first_of(LINK_KEYS).unwrap_or_default().to_string();

    if title.is_empty() && link.is_empty() {
        return Err(EntryError::MissingContent);
    }

    let identity_key = entry
        .first_of(IDENTITY_KEYS)
        .map(str::to_string)
        .or_else(|| identity_for_link(&link))
        .ok_or(EntryError::MissingIdentity)?;

    let mut item = CrawlItem::new(identity_key, title, link);
    item.published_time = entry.first_of(DATE_KEYS).and_then(parse_feed_date);
    item.summary = entry
        .first_of(SUMMARY_KEYS)
        .map(strip_tags)
        .filter(|s| !s.is_empty());

    let author_values = AUTHOR_KEYS
        .iter()
        .flat_map(|key| entry.get_all(key))
        .map(String::as_str);
    item.authors = split_authors(author_values);

    item.categories = CATEGORY_KEYS
        .iter()
        .flat_map(|key| entry.get_all(key))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();

    item.extra = passthrough_fields(entry);
    Ok(item)
}

fn passthrough_fields(entry: &RawEntry) -> Map<String, Value> {
    let mut extra = Map::new();
    for key in entry.keys().filter(|key| !is_consumed_key(key)) {
        let values: Vec<Value> = entry
            .get_all(key)
            .iter()
            .map(|v| Value::String(v.trim().to_string()))
            .collect();
        let value = if values.len() == 1 {
            values.into_iter().next().unwrap_or(Value::Null)
        } else {
            Value::Array(values)
        };
        extra.insert(key.to_string(), value);
    }
    extra
}

fn arxiv_patterns() -> &'static (Regex, Regex, Regex) {
    static PATTERNS: OnceLock<(Regex, Regex, Regex)> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        (
            Regex::new(r"arXiv:(\d{4}\.\d{4,5})").expect("arxiv id pattern is valid"),
            Regex::new(r"v\d+$").expect("arxiv version pattern is valid"),
            Regex::new(r"Announce Type:\s*([\w-]+)").expect("announce pattern is valid"),
        )
    })
}

/// Finds the arXiv identifier, without version suffix
///
/// Tried in order: the `oai:arXiv.org:<id>` guid, an `/abs/<id>` link and
/// an `arXiv:<id>` mention in the description.
pub fn arxiv_id(entry: &RawEntry, link: &str) -> Option<String> {
    let (in_text, version, _) = arxiv_patterns();

    let from_guid = entry
        .get("guid")
        .and_then(|guid| guid.split_once("arXiv.org:"))
        .map(|(_, id)| id.to_string());
    let from_link = link
        .split_once("/abs/")
        .map(|(_, id)| id.trim_end_matches('/').to_string());
    let from_text = || {
        entry
            .first_of(&["description", "summary"])
            .and_then(|text| in_text.captures(text))
            .map(|caps| caps[1].to_string())
    };

    from_guid
        .or(from_link)
        .filter(|id| !id.is_empty())
        .or_else(from_text)
        .map(|id| version.replace(&id, "").into_owned())
}

/// Removes the `arXiv:<id> Announce Type: <t> Abstract:` preamble
pub fn strip_arxiv_preamble(summary: &str) -> String {
    match summary.split_once("Abstract:") {
        Some((_, abstract_text)) => abstract_text.trim().to_string(),
        None => summary.trim().to_string(),
    }
}

/// Extractor for arXiv listing feeds
///
/// Builds on `extract_generic`, strips the announcement preamble from the
/// summary and adds `extra.arxiv_id` and `extra.arxiv_announce_type`.
pub fn extract_arxiv(entry: &RawEntry) -> Result<CrawlItem, EntryError> {
    let mut item = extract_generic(entry)?;

    if let Some(summary) = item.summary.take() {
        item.summary = Some(strip_arxiv_preamble(&summary)).filter(|s| !s.is_empty());
    }

    if let Some(id) = arxiv_id(entry, &item.link) {
        item.extra.insert("arxiv_id".to_string(), Value::String(id));
    }

    let (_, _, announce) = arxiv_patterns();
    let announce_type = entry
        .get("arxiv:announce_type")
        .map(str::to_string)
        .or_else(|| {
            entry
                .get("description")
                .and_then(|text| announce.captures(text))
                .map(|caps| caps[1].to_string())
        });
    if let Some(announce_type) = announce_type {
        item.extra.remove("arxiv:announce_type");
        item.extra.insert(
            "arxiv_announce_type".to_string(),
            Value::String(announce_type),
        );
    }

    Ok(item)
}

/// Runs an extractor over every entry, skipping the ones it rejects
pub fn extract_items(
    site_name: &str,
    entries: &[RawEntry],
    extractor: &EntryExtractor,
) -> Vec<CrawlItem> {
    let mut items = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        match extractor(entry) {
            Ok(item) => items.push(item),
            Err(e) => warn!("[{}] Skipping malformed entry #{}: {}", site_name, index, e),
        }
    }
    items
}

/// Fetcher for `SiteKind::Feed` sites
///
/// The extractor is chosen with `kind_specific_config.extractor`
/// (default `generic`).
pub struct FeedFetcher {
    client: Client,
    extractors: ExtractorRegistry,
}

impl FeedFetcher {
    pub fn new(client: Client) -> Self {
        Self::with_extractors(client, ExtractorRegistry::default())
    }

    pub fn with_extractors(client: Client, extractors: ExtractorRegistry) -> Self {
        Self { client, extractors }
    }
}

#[async_trait]
impl Fetch for FeedFetcher {
    async fn fetch(&self, site: &SiteDescriptor) -> Result<Vec<CrawlItem>, FetchError> {
        let name = site.config_str("extractor").unwrap_or(GENERIC_EXTRACTOR);
        let extractor = self.extractors.get(name).ok_or_else(|| {
            FetchError::parse(
                &site.source_url,
                format!(
                    "unknown extractor '{}' (known: {})",
                    name,
                    self.extractors.names().join(", ")
                ),
            )
        })?;

        let body = fetch_document(&self.client, &site.source_url).await?;
        let entries =
            parse_feed(&body).map_err(|detail| FetchError::parse(&site.source_url, detail))?;
        debug!("[{}] Feed has {} entries", site.name, entries.len());

        Ok(extract_items(&site.name, &entries, &extractor))
    }

    fn name(&self) -> &'static str {
        "feed"
    }
}
