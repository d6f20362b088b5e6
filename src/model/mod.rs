//! Core data model shared by the crawler, storage and output layers
//!
//! # Components
//!
//! - `SiteDescriptor`: a configured source and its crawl cadence
//! - `CrawlItem`: one normalized piece of content produced by a fetcher
//! - `CrawlOutcome`: the record of a single crawl job execution
//! - `ErrorKind`: the failure taxonomy attached to outcomes and enrichment results

mod item;
mod outcome;
mod site;

pub use item::{sort_newest_first, CrawlItem};
pub use outcome::{CrawlOutcome, ErrorKind};
pub use site::{SiteDescriptor, SiteKind, DEFAULT_CADENCE_MINUTES};
