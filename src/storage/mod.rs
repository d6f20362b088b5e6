//! Storage module for persisting crawler state
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Per-site seen sets used for deduplication
//! - Scheduler state (`last_crawl_time`) that survives restarts
//! - Crawl outcome history and statistics

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{StateStore, StorageError, StorageResult};

use chrono::{DateTime, Utc};
use std::path::Path;

/// Opens or creates the state database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStore)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to open or initialize the database
pub fn open_store(path: &Path) -> StorageResult<SqliteStore> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    SqliteStore::open(path)
}

/// Aggregated crawl history of one site
#[derive(Debug, Clone, PartialEq)]
pub struct SiteStatistics {
    pub site: String,
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub total_new_items: u64,
    pub seen_items: u64,
    pub last_crawl_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SiteStatistics {
    pub fn success_rate(&self) -> f64 {
        if self.total_runs == 0 {
            0.0
        } else {
            self.successful_runs as f64 / self.total_runs as f64 * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_rate() {
        let mut stats = SiteStatistics {
            site: "s".to_string(),
            total_runs: 0,
            successful_runs: 0,
            failed_runs: 0,
            total_new_items: 0,
            seen_items: 0,
            last_crawl_time: None,
            last_error: None,
        };
        assert_eq!(stats.success_rate(), 0.0);

        stats.total_runs = 4;
        stats.successful_runs = 3;
        assert_eq!(stats.success_rate(), 75.0);
    }

    #[test]
    fn test_open_store_creates_parent_dirs() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested/state.db");
        assert!(open_store(&path).is_ok());
        assert!(path.exists());
    }
}
