//! State store trait and error types

use crate::model::CrawlOutcome;
use crate::state::SeenSet;
use crate::storage::SiteStatistics;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable state shared by the scheduler and crawl jobs
///
/// Implementations serialize access internally, so one store can be shared
/// across workers behind an `Arc`.
pub trait StateStore: Send + Sync {
    // ===== Seen sets =====

    /// Loads the seen set of a site; unknown sites get an empty set
    fn load_seen_set(&self, site: &str) -> StorageResult<SeenSet>;

    /// Replaces the stored seen set of a site
    ///
    /// The replacement is atomic: on error the previous set is kept.
    fn save_seen_set(&self, site: &str, seen: &SeenSet) -> StorageResult<()>;

    // ===== Scheduler state =====

    /// Loads every persisted `last_crawl_time`, keyed by site name
    fn load_last_crawl_times(&self) -> StorageResult<HashMap<String, DateTime<Utc>>>;

    fn save_last_crawl_time(&self, site: &str, at: DateTime<Utc>) -> StorageResult<()>;

    // ===== Outcomes =====

    fn record_outcome(&self, outcome: &CrawlOutcome) -> StorageResult<()>;

    /// Most recent outcomes of a site, newest first
    fn recent_outcomes(&self, site: &str, limit: usize) -> StorageResult<Vec<CrawlOutcome>>;

    /// Aggregated per-site statistics, sorted by site name
    fn site_statistics(&self) -> StorageResult<Vec<SiteStatistics>>;
}
