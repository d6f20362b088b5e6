//! Crawler module for fetching, filtering and scheduling site crawls
//!
//! This module contains the core crawling logic, including:
//! - The `Fetch` trait with feed and selector-based page fetchers
//! - Keyword and rule filters applied to fetched items
//! - Deduplication against each site's seen set
//! - The crawl job pipeline and the scheduler that dispatches it

mod custom;
mod dedup;
mod feed;
mod fetcher;
mod filter;
mod job;
mod parser;
mod scheduler;

pub use custom::{
    extract_page, CustomFetcher, CustomRules, PageExtractor, PageExtractorRegistry, PageResult,
    MAX_PAGES_CAP,
};
pub use dedup::deduplicate;
pub use feed::{
    extract_arxiv, extract_generic, parse_feed, parse_feed_date, EntryExtractor,
    ExtractorRegistry, FeedFetcher, RawEntry, ARXIV_EXTRACTOR, GENERIC_EXTRACTOR,
};
pub use fetcher::{
    build_http_client, fetch_document, EntryError, Fetch, FetchError, FetcherRegistry,
};
pub use filter::{apply_keyword_filter, apply_rules, matched_keywords, FilterRule};
pub use job::{CrawlJob, JobContext};
pub use parser::{resolve_link, strip_tags};
pub use scheduler::{Scheduler, SchedulerOptions, SnapshotSource};
