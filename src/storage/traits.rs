//! Storage traits and error types
//!
//! This module defines the trait interface for job persistence backends and
//! associated error types.

use crate::state::{CrawlJob, ImageUpdate, JobSummary, QueuedImage};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Job not found: {0}")]
    JobNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt record in job {job_id}: {message}")]
    Corrupt { job_id: i64, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for crawl job persistence backends
///
/// A job's visited pages and queued images are append-only: backends never
/// delete rows, and a page recorded as visited stays visited.
pub trait JobStore: Send {
    // ===== Job Management =====

    /// Creates a `Pending` job and returns it
    fn create_job(&mut self, root_url: &str, config_hash: &str) -> StorageResult<CrawlJob>;

    /// Loads a job with its visited pages and queued images
    fn get_job(&self, job_id: i64) -> StorageResult<Option<CrawlJob>>;

    /// Summaries of all jobs, newest first
    fn list_jobs(&self) -> StorageResult<Vec<JobSummary>>;

    /// Writes the job row: status, counters and error
    ///
    /// The cancel flag is not touched; only the cancel operations write it.
    fn save_job(&mut self, job: &CrawlJob) -> StorageResult<()>;

    /// Most recent job that is `Pending` or `Running`
    fn latest_unfinished_job(&self) -> StorageResult<Option<i64>>;

    // ===== Progress =====

    /// Records a visited page; returns false if it was already recorded
    fn mark_page_visited(&mut self, job_id: i64, url: &str) -> StorageResult<bool>;

    /// Inserts queued images that are not yet known to the job
    fn upsert_images(&mut self, job_id: i64, images: &[QueuedImage]) -> StorageResult<()>;

    /// Applies terminal statuses to queued images
    ///
    /// An image that already has a terminal status keeps it.
    fn record_image_statuses(&mut self, job_id: i64, updates: &[ImageUpdate])
        -> StorageResult<()>;

    // ===== Checkpoints =====
    //
    // Each checkpoint is one atomic write: after a crash either all of it
    // is visible or none of it is.

    /// Applies a batch's image statuses and writes the job row
    fn checkpoint_batch(&mut self, job: &CrawlJob, updates: &[ImageUpdate]) -> StorageResult<()>;

    /// Records a visited page and writes the job row
    fn checkpoint_page(&mut self, job: &CrawlJob, url: &str) -> StorageResult<()>;

    // ===== Cancellation =====

    /// Flags a job for cancellation; returns false if the job does not exist
    fn request_cancel(&mut self, job_id: i64) -> StorageResult<bool>;

    fn is_cancel_requested(&self, job_id: i64) -> StorageResult<bool>;

    /// Clears the cancel flag, used when a cancelled job is resumed
    fn clear_cancel(&mut self, job_id: i64) -> StorageResult<()>;
}
