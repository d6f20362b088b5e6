//! Database schema definitions
//!
//! Timestamps are stored as RFC 3339 text in UTC.

/// SQL schema for the state database
pub const SCHEMA_SQL: &str = r#"
-- Identity keys already delivered, per site
CREATE TABLE IF NOT EXISTS seen_items (
    site TEXT NOT NULL,
    identity_key TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    PRIMARY KEY (site, identity_key)
);

CREATE INDEX IF NOT EXISTS idx_seen_items_site ON seen_items(site);

-- Scheduler state that must survive restarts
CREATE TABLE IF NOT EXISTS site_state (
    site TEXT PRIMARY KEY,
    last_crawl_time TEXT
);

-- One row per finished crawl job
CREATE TABLE IF NOT EXISTS crawl_outcomes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    success INTEGER NOT NULL,
    new_item_count INTEGER NOT NULL DEFAULT 0,
    fetched_count INTEGER NOT NULL DEFAULT 0,
    attempts INTEGER NOT NULL DEFAULT 1,
    error_kind TEXT,
    error_detail TEXT
);

CREATE INDEX IF NOT EXISTS idx_crawl_outcomes_site ON crawl_outcomes(site, finished_at);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
