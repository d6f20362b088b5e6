//! Output module for delivering new items
//!
//! This module handles:
//! - The `ItemSink` seam crawl jobs append new items through
//! - Date-partitioned JSON and org-mode files (`FileSink`)
//! - Per-site statistics reports

mod files;
mod org;
pub mod stats;
mod traits;

pub use files::{FileSink, ItemsDocument, SiteMetadata};
pub use org::{format_item, format_items};
pub use stats::{format_statistics, load_statistics, print_statistics};
pub use traits::{ItemSink, OutputError, OutputFormat, OutputResult};
