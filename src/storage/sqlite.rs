//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the StateStore trait.

use crate::model::{CrawlOutcome, ErrorKind};
use crate::state::SeenSet;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{StateStore, StorageError, StorageResult};
use crate::storage::SiteStatistics;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite state store
///
/// The connection sits behind a mutex so the store can be shared between
/// the control loop and the workers.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn parse_time(value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization(format!("bad timestamp '{}': {}", value, e)))
}

impl SqliteStore {
    /// Opens or creates a database file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Database("connection lock poisoned".to_string()))
    }

    fn outcome_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutcomeRow> {
        Ok(OutcomeRow {
            site: row.get(0)?,
            started_at: row.get(1)?,
            finished_at: row.get(2)?,
            success: row.get(3)?,
            new_item_count: row.get(4)?,
            fetched_count: row.get(5)?,
            attempts: row.get(6)?,
            error_kind: row.get(7)?,
            error_detail: row.get(8)?,
        })
    }
}

/// Raw `crawl_outcomes` row before timestamp parsing
struct OutcomeRow {
    site: String,
    started_at: String,
    finished_at: String,
    success: bool,
    new_item_count: i64,
    fetched_count: i64,
    attempts: i64,
    error_kind: Option<String>,
    error_detail: Option<String>,
}

impl OutcomeRow {
    fn into_outcome(self) -> StorageResult<CrawlOutcome> {
        Ok(CrawlOutcome {
            site_name: self.site,
            started_at: parse_time(&self.started_at)?,
            finished_at: parse_time(&self.finished_at)?,
            success: self.success,
            new_item_count: self.new_item_count.max(0) as usize,
            fetched_count: self.fetched_count.max(0) as usize,
            attempts: self.attempts.max(0) as u32,
            error_kind: self
                .error_kind
                .as_deref()
                .and_then(ErrorKind::from_db_string),
            error_detail: self.error_detail,
        })
    }
}

impl StateStore for SqliteStore {
    // ===== Seen sets =====

    fn load_seen_set(&self, site: &str) -> StorageResult<SeenSet> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT identity_key, last_seen FROM seen_items WHERE site = ?1")?;

        let rows = stmt
            .query_map(params![site], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut entries = Vec::with_capacity(rows.len());
        for (key, last_seen) in rows {
            entries.push((key, parse_time(&last_seen)?));
        }
        Ok(SeenSet::from_entries(entries))
    }

    fn save_seen_set(&self, site: &str, seen: &SeenSet) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM seen_items WHERE site = ?1", params![site])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO seen_items (site, identity_key, last_seen) VALUES (?1, ?2, ?3)",
            )?;
            for (key, last_seen) in seen.iter() {
                stmt.execute(params![site, key, last_seen.to_rfc3339()])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    // ===== Scheduler state =====

    fn load_last_crawl_times(&self) -> StorageResult<HashMap<String, DateTime<Utc>>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT site, last_crawl_time FROM site_state WHERE last_crawl_time IS NOT NULL",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut times = HashMap::new();
        for (site, at) in rows {
            times.insert(site, parse_time(&at)?);
        }
        Ok(times)
    }

    fn save_last_crawl_time(&self, site: &str, at: DateTime<Utc>) -> StorageResult<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO site_state (site, last_crawl_time) VALUES (?1, ?2)",
            params![site, at.to_rfc3339()],
        )?;
        Ok(())
    }

    // ===== Outcomes =====

    fn record_outcome(&self, outcome: &CrawlOutcome) -> StorageResult<()> {
        self.conn()?.execute(
            "INSERT INTO crawl_outcomes
                (site, started_at, finished_at, success, new_item_count, fetched_count,
                 attempts, error_kind, error_detail)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                outcome.site_name,
                outcome.started_at.to_rfc3339(),
                outcome.finished_at.to_rfc3339(),
                outcome.success,
                outcome.new_item_count as i64,
                outcome.fetched_count as i64,
                outcome.attempts as i64,
                outcome.error_kind.map(|k| k.to_db_string()),
                outcome.error_detail,
            ],
        )?;
        Ok(())
    }

    fn recent_outcomes(&self, site: &str, limit: usize) -> StorageResult<Vec<CrawlOutcome>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT site, started_at, finished_at, success, new_item_count, fetched_count,
                    attempts, error_kind, error_detail
             FROM crawl_outcomes WHERE site = ?1
             ORDER BY finished_at DESC, id DESC LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(params![site, limit as i64], Self::outcome_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(OutcomeRow::into_outcome).collect()
    }

    fn site_statistics(&self) -> StorageResult<Vec<SiteStatistics>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT site,
                    COUNT(*),
                    SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END),
                    SUM(new_item_count)
             FROM crawl_outcomes GROUP BY site ORDER BY site",
        )?;
        let runs = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stats = Vec::with_capacity(runs.len());
        for (site, total, succeeded, new_items) in runs {
            let seen_items: i64 = conn.query_row(
                "SELECT COUNT(*) FROM seen_items WHERE site = ?1",
                params![site],
                |row| row.get(0),
            )?;

            let last_crawl_time: Option<String> = conn
                .query_row(
                    "SELECT last_crawl_time FROM site_state WHERE site = ?1",
                    params![site],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();

            let last_error: Option<String> = conn
                .query_row(
                    "SELECT error_detail FROM crawl_outcomes
                     WHERE site = ?1 AND success = 0
                     ORDER BY finished_at DESC, id DESC LIMIT 1",
                    params![site],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();

            stats.push(SiteStatistics {
                site,
                total_runs: total.max(0) as u64,
                successful_runs: succeeded.max(0) as u64,
                failed_runs: (total - succeeded).max(0) as u64,
                total_new_items: new_items.max(0) as u64,
                seen_items: seen_items.max(0) as u64,
                last_crawl_time: last_crawl_time.as_deref().map(parse_time).transpose()?,
                last_error,
            });
        }

        Ok(stats)
    }
}
