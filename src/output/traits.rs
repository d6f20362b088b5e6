//! Item sink trait and error types

use crate::model::CrawlItem;
use chrono::NaiveDate;
use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur during output operations
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write output: {0}")]
    Write(String),

    #[error("Failed to format output: {0}")]
    Format(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Which files a sink writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Org,
    #[default]
    Both,
}

impl OutputFormat {
    pub fn writes_json(&self) -> bool {
        matches!(self, Self::Json | Self::Both)
    }

    pub fn writes_org(&self) -> bool {
        matches!(self, Self::Org | Self::Both)
    }
}

/// Destination for new items
///
/// `append` must be idempotent at the identity level: appending an item whose
/// identity key is already stored for the same site and date is a no-op.
pub trait ItemSink: Send + Sync {
    /// Appends items to the site's partition for `crawl_date`
    ///
    /// # Arguments
    ///
    /// * `site_name` - Site the items came from
    /// * `items` - New items, already enriched
    /// * `crawl_date` - Date partition to write into
    fn append(&self, site_name: &str, items: &[CrawlItem], crawl_date: NaiveDate)
        -> OutputResult<()>;
}
