//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the imgedge job database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl jobs
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    root_url TEXT NOT NULL,
    status TEXT NOT NULL,
    config_hash TEXT NOT NULL,
    saved INTEGER NOT NULL DEFAULT 0,
    updated INTEGER NOT NULL DEFAULT 0,
    unchanged INTEGER NOT NULL DEFAULT 0,
    degraded INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    cancel_requested INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);

-- Pages a job has fully processed; insert-only
CREATE TABLE IF NOT EXISTS visited_pages (
    job_id INTEGER NOT NULL REFERENCES jobs(id),
    url TEXT NOT NULL,
    visited_at TEXT NOT NULL,
    PRIMARY KEY (job_id, url)
);

-- Images a job has discovered, one row per canonical image
CREATE TABLE IF NOT EXISTS job_images (
    job_id INTEGER NOT NULL REFERENCES jobs(id),
    image_key TEXT NOT NULL,
    source_url TEXT NOT NULL,
    canonical_path TEXT NOT NULL,
    status TEXT NOT NULL,
    error TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (job_id, image_key)
);

CREATE INDEX IF NOT EXISTS idx_job_images_status ON job_images(job_id, status);
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
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

/// Schema version stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: u32 = 2;
