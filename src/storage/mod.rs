//! Storage module for persisting crawl jobs
//!
//! This module handles all database operations for crawl jobs, including:
//! - SQLite database initialization and schema management
//! - Job status and counter persistence
//! - Visited page and queued image tracking for resumption
//! - Cross-process cancellation flags

mod schema;
mod sqlite;
mod traits;

pub use schema::SCHEMA_VERSION;
pub use sqlite::SqliteJobStore;
pub use traits::{JobStore, StorageError, StorageResult};

use std::path::Path;

/// Opens the job database at `path`
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteJobStore)` - Successfully opened storage
/// * `Err(StorageError)` - Failed to open or migrate the database
pub fn open_storage(path: &Path) -> StorageResult<SqliteJobStore> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    SqliteJobStore::open(path)
}
