//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the JobStore trait.

use crate::image::{CacheKey, ImageRef};
use crate::state::{
    CrawlJob, ImageStatus, ImageUpdate, JobStatus, JobSummary, ProcessedCounts, QueuedImage,
};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{JobStore, StorageError, StorageResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

const JOB_COLUMNS: &str = "id, root_url, status, config_hash, saved, updated, unchanged, \
                           degraded, failed, error, created_at, updated_at";

/// SQLite job store
pub struct SqliteJobStore {
    conn: Connection,
}

impl SqliteJobStore {
    /// Opens (creating if needed) the job database at `path`
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database, used by tests and dry runs
    pub fn in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn load_visited(&self, job_id: i64) -> StorageResult<BTreeSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT url FROM visited_pages WHERE job_id = ?1")?;
        let pages = stmt
            .query_map(params![job_id], |row| row.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(pages)
    }

    fn load_images(&self, job_id: i64) -> StorageResult<BTreeMap<CacheKey, QueuedImage>> {
        let mut stmt = self.conn.prepare(
            "SELECT image_key, source_url, canonical_path, status, error
             FROM job_images WHERE job_id = ?1",
        )?;

        let rows = stmt
            .query_map(params![job_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut images = BTreeMap::new();
        for (key, source_url, canonical_path, status, error) in rows {
            let status = ImageStatus::from_db_string(&status).ok_or_else(|| {
                StorageError::Corrupt {
                    job_id,
                    message: format!("unknown image status '{}'", status),
                }
            })?;
            images.insert(
                CacheKey::from_raw(key),
                QueuedImage {
                    image: ImageRef::from_parts(source_url, canonical_path),
                    status,
                    error,
                },
            );
        }
        Ok(images)
    }
}

/// Raw `jobs` row before timestamps and status are validated
struct JobRow {
    id: i64,
    root_url: String,
    status: String,
    config_hash: String,
    counts: [i64; 5],
    error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            root_url: row.get(1)?,
            status: row.get(2)?,
            config_hash: row.get(3)?,
            counts: [row.get(4)?, row.get(5)?, row.get(6)?, row.get(7)?, row.get(8)?],
            error: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn status(&self) -> StorageResult<JobStatus> {
        JobStatus::from_db_string(&self.status).ok_or_else(|| StorageError::Corrupt {
            job_id: self.id,
            message: format!("unknown job status '{}'", self.status),
        })
    }

    fn counts(&self) -> ProcessedCounts {
        let [saved, updated, unchanged, degraded, failed] = self.counts.map(|c| c.max(0) as u64);
        ProcessedCounts {
            saved,
            updated,
            unchanged,
            degraded,
            failed,
        }
    }

    fn timestamp(&self, value: &str) -> StorageResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StorageError::Corrupt {
                job_id: self.id,
                message: format!("bad timestamp '{}': {}", value, e),
            })
    }

    fn into_job(self) -> StorageResult<CrawlJob> {
        let status = self.status()?;
        let counts = self.counts();
        let created_at = self.timestamp(&self.created_at)?;
        let updated_at = self.timestamp(&self.updated_at)?;
        Ok(CrawlJob {
            id: self.id,
            root_url: self.root_url,
            status,
            config_hash: self.config_hash,
            visited_pages: BTreeSet::new(),
            queued_images: BTreeMap::new(),
            counts,
            error: self.error,
            created_at,
            updated_at,
        })
    }
}

impl JobStore for SqliteJobStore {
    // ===== Job Management =====

    fn create_job(&mut self, root_url: &str, config_hash: &str) -> StorageResult<CrawlJob> {
        let now = Utc::now();
        let stamp = now.to_rfc3339();
        self.conn.execute(
            "INSERT INTO jobs (root_url, status, config_hash, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![root_url, JobStatus::Pending.to_db_string(), config_hash, stamp, stamp],
        )?;

        let mut job = CrawlJob::new(self.conn.last_insert_rowid(), root_url, config_hash);
        job.created_at = now;
        job.updated_at = now;
        Ok(job)
    }

    fn get_job(&self, job_id: i64) -> StorageResult<Option<CrawlJob>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                params![job_id],
                JobRow::from_row,
            )
            .optional()?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut job = row.into_job()?;
        job.visited_pages = self.load_visited(job_id)?;
        job.queued_images = self.load_images(job_id)?;
        Ok(Some(job))
    }

    fn list_jobs(&self) -> StorageResult<Vec<JobSummary>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {},
                (SELECT COUNT(*) FROM visited_pages v WHERE v.job_id = jobs.id),
                (SELECT COUNT(*) FROM job_images q WHERE q.job_id = jobs.id),
                (SELECT COUNT(*) FROM job_images q WHERE q.job_id = jobs.id AND q.status = 'queued')
             FROM jobs ORDER BY id DESC",
            JOB_COLUMNS
        ))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    JobRow::from_row(row)?,
                    row.get::<_, i64>(12)?,
                    row.get::<_, i64>(13)?,
                    row.get::<_, i64>(14)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(row, visited, queued, pending)| {
                let job = row.into_job()?;
                Ok(JobSummary {
                    visited_pages: visited as usize,
                    queued_images: queued as usize,
                    pending_images: pending as usize,
                    ..job.summary()
                })
            })
            .collect()
    }

    fn save_job(&mut self, job: &CrawlJob) -> StorageResult<()> {
        write_job(&self.conn, job)
    }

    fn latest_unfinished_job(&self) -> StorageResult<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM jobs WHERE status IN ('pending', 'running') ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    // ===== Progress =====

    fn mark_page_visited(&mut self, job_id: i64, url: &str) -> StorageResult<bool> {
        insert_visited(&self.conn, job_id, url)
    }

    fn upsert_images(&mut self, job_id: i64, images: &[QueuedImage]) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO job_images
                 (job_id, image_key, source_url, canonical_path, status, error, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for queued in images {
                stmt.execute(params![
                    job_id,
                    queued.key().as_str(),
                    queued.image.source_url(),
                    queued.image.canonical_path(),
                    queued.status.to_db_string(),
                    queued.error,
                    now
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn record_image_statuses(
        &mut self,
        job_id: i64,
        updates: &[ImageUpdate],
    ) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        write_statuses(&tx, job_id, updates)?;
        tx.commit()?;
        Ok(())
    }

    // ===== Checkpoints =====

    fn checkpoint_batch(&mut self, job: &CrawlJob, updates: &[ImageUpdate]) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        write_statuses(&tx, job.id, updates)?;
        write_job(&tx, job)?;
        tx.commit()?;
        Ok(())
    }

    fn checkpoint_page(&mut self, job: &CrawlJob, url: &str) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        insert_visited(&tx, job.id, url)?;
        write_job(&tx, job)?;
        tx.commit()?;
        Ok(())
    }

    // ===== Cancellation =====

    fn request_cancel(&mut self, job_id: i64) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "UPDATE jobs SET cancel_requested = 1 WHERE id = ?1",
            params![job_id],
        )?;
        Ok(changed > 0)
    }

    fn is_cancel_requested(&self, job_id: i64) -> StorageResult<bool> {
        let flag: Option<i64> = self
            .conn
            .query_row(
                "SELECT cancel_requested FROM jobs WHERE id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(flag.unwrap_or(0) != 0)
    }

    fn clear_cancel(&mut self, job_id: i64) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE jobs SET cancel_requested = 0 WHERE id = ?1",
            params![job_id],
        )?;
        Ok(())
    }
}

/// Writes the job row: status, counters and error
fn write_job(conn: &Connection, job: &CrawlJob) -> StorageResult<()> {
    let changed = conn.execute(
        "UPDATE jobs SET status = ?1, saved = ?2, updated = ?3, unchanged = ?4,
         degraded = ?5, failed = ?6, error = ?7, updated_at = ?8 WHERE id = ?9",
        params![
            job.status.to_db_string(),
            job.counts.saved as i64,
            job.counts.updated as i64,
            job.counts.unchanged as i64,
            job.counts.degraded as i64,
            job.counts.failed as i64,
            job.error,
            job.updated_at.to_rfc3339(),
            job.id
        ],
    )?;

    if changed == 0 {
        return Err(StorageError::JobNotFound(job.id));
    }
    Ok(())
}

/// Moves queued images to their terminal status; terminal ones are kept
fn write_statuses(conn: &Connection, job_id: i64, updates: &[ImageUpdate]) -> StorageResult<()> {
    let now = Utc::now().to_rfc3339();
    let mut stmt = conn.prepare(
        "UPDATE job_images SET status = ?1, error = ?2, updated_at = ?3
         WHERE job_id = ?4 AND image_key = ?5 AND status = 'queued'",
    )?;
    for update in updates {
        stmt.execute(params![
            update.status.to_db_string(),
            update.error,
            now,
            job_id,
            update.key.as_str()
        ])?;
    }
    Ok(())
}

fn insert_visited(conn: &Connection, job_id: i64, url: &str) -> StorageResult<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO visited_pages (job_id, url, visited_at) VALUES (?1, ?2, ?3)",
        params![job_id, url, Utc::now().to_rfc3339()],
    )?;
    Ok(inserted > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(path: &str) -> QueuedImage {
        QueuedImage::new(ImageRef::parse(&format!("https://example.com/{}", path)).unwrap())
    }

    #[test]
    fn test_create_and_get_job() {
        let mut store = SqliteJobStore::in_memory().unwrap();
        let job = store.create_job("https://example.com/", "abc123").unwrap();
        assert!(job.id > 0);
        assert_eq!(job.status, JobStatus::Pending);

        let loaded = store.get_job(job.id).unwrap().unwrap();
        assert_eq!(loaded.root_url, "https://example.com/");
        assert_eq!(loaded.config_hash, "abc123");
        assert!(loaded.visited_pages.is_empty());

        assert!(store.get_job(job.id + 1).unwrap().is_none());
    }

    #[test]
    fn test_progress_survives_reload() {
        let mut store = SqliteJobStore::in_memory().unwrap();
        let mut job = store.create_job("https://example.com/", "h").unwrap();

        let a = queued("a.jpg");
        let b = queued("uploads/b-300x200.jpg");
        store.upsert_images(job.id, &[a.clone(), b.clone()]).unwrap();
        assert!(store.mark_page_visited(job.id, "https://example.com/").unwrap());
        assert!(!store.mark_page_visited(job.id, "https://example.com/").unwrap());

        job.enqueue(a.image.clone());
        job.enqueue(b.image.clone());
        let update = ImageUpdate {
            key: a.key(),
            status: ImageStatus::Saved,
            error: None,
        };
        job.record(&update);
        job.transition(JobStatus::Running).unwrap();
        store.record_image_statuses(job.id, &[update]).unwrap();
        store.save_job(&job).unwrap();

        let loaded = store.get_job(job.id).unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Running);
        assert_eq!(loaded.counts.saved, 1);
        assert!(loaded.is_visited("https://example.com/"));
        assert_eq!(loaded.queued_images.len(), 2);
        assert_eq!(loaded.image_status(&a.key()), Some(ImageStatus::Saved));
        assert_eq!(loaded.image_status(&b.key()), Some(ImageStatus::Queued));
        assert_eq!(
            loaded.queued_images[&b.key()].image.canonical_path(),
            "uploads/b.jpg"
        );
    }

    #[test]
    fn test_terminal_image_status_is_kept() {
        let mut store = SqliteJobStore::in_memory().unwrap();
        let job = store.create_job("https://example.com/", "h").unwrap();
        let a = queued("a.jpg");
        store.upsert_images(job.id, &[a.clone()]).unwrap();

        for status in [ImageStatus::Degraded, ImageStatus::Failed] {
            store
                .record_image_statuses(
                    job.id,
                    &[ImageUpdate {
                        key: a.key(),
                        status,
                        error: None,
                    }],
                )
                .unwrap();
        }
        // Re-discovery does not reset the status either
        store.upsert_images(job.id, &[a.clone()]).unwrap();

        let loaded = store.get_job(job.id).unwrap().unwrap();
        assert_eq!(loaded.image_status(&a.key()), Some(ImageStatus::Degraded));
    }

    #[test]
    fn test_cancel_flag_is_independent_of_save() {
        let mut store = SqliteJobStore::in_memory().unwrap();
        let job = store.create_job("https://example.com/", "h").unwrap();

        assert!(!store.is_cancel_requested(job.id).unwrap());
        assert!(store.request_cancel(job.id).unwrap());
        store.save_job(&job).unwrap();
        assert!(store.is_cancel_requested(job.id).unwrap());

        store.clear_cancel(job.id).unwrap();
        assert!(!store.is_cancel_requested(job.id).unwrap());
        assert!(!store.request_cancel(999).unwrap());
    }

    #[test]
    fn test_save_unknown_job_fails() {
        let mut store = SqliteJobStore::in_memory().unwrap();
        let job = CrawlJob::new(42, "https://example.com/", "h");
        assert!(matches!(store.save_job(&job), Err(StorageError::JobNotFound(42))));
    }

    #[test]
    fn test_list_jobs_and_latest_unfinished() {
        let mut store = SqliteJobStore::in_memory().unwrap();
        let mut first = store.create_job("https://a.example.com/", "h").unwrap();
        let second = store.create_job("https://b.example.com/", "h").unwrap();
        store
            .upsert_images(second.id, &[queued("x.jpg")])
            .unwrap();

        first.transition(JobStatus::Running).unwrap();
        first.transition(JobStatus::Completed).unwrap();
        store.save_job(&first).unwrap();

        let jobs = store.list_jobs().unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, second.id);
        assert_eq!(jobs[0].queued_images, 1);
        assert_eq!(jobs[0].pending_images, 1);
        assert_eq!(jobs[1].status, JobStatus::Completed);

        assert_eq!(store.latest_unfinished_job().unwrap(), Some(second.id));
    }

    #[test]
    fn test_checkpoint_batch_is_atomic() {
        let mut store = SqliteJobStore::in_memory().unwrap();
        let mut job = store.create_job("https://example.com/", "h").unwrap();
        let a = queued("a.jpg");
        store.upsert_images(job.id, &[a.clone()]).unwrap();
        job.enqueue(a.image.clone());
        job.transition(JobStatus::Running).unwrap();

        let update = ImageUpdate {
            key: a.key(),
            status: ImageStatus::Saved,
            error: None,
        };
        job.record(&update);

        // The job row write fails after the status write in the same checkpoint
        store
            .conn
            .execute_batch(
                "CREATE TRIGGER fail_job_write BEFORE UPDATE ON jobs
                 BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
            )
            .unwrap();
        assert!(store.checkpoint_batch(&job, &[update.clone()]).is_err());

        let loaded = store.get_job(job.id).unwrap().unwrap();
        assert_eq!(loaded.image_status(&a.key()), Some(ImageStatus::Queued));
        assert_eq!(loaded.counts.total(), 0);

        store.conn.execute_batch("DROP TRIGGER fail_job_write;").unwrap();
        store.checkpoint_batch(&job, &[update]).unwrap();

        let loaded = store.get_job(job.id).unwrap().unwrap();
        assert_eq!(loaded.image_status(&a.key()), Some(ImageStatus::Saved));
        assert_eq!(loaded.counts.saved, 1);
        assert_eq!(loaded.status, JobStatus::Running);
    }

    #[test]
    fn test_checkpoint_page_is_atomic() {
        let mut store = SqliteJobStore::in_memory().unwrap();
        let job = store.create_job("https://example.com/", "h").unwrap();
        store
            .conn
            .execute_batch(
                "CREATE TRIGGER fail_job_write BEFORE UPDATE ON jobs
                 BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
            )
            .unwrap();

        assert!(store.checkpoint_page(&job, "https://example.com/a").is_err());
        let loaded = store.get_job(job.id).unwrap().unwrap();
        assert!(!loaded.is_visited("https://example.com/a"));
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        let id = {
            let mut store = SqliteJobStore::open(&path).unwrap();
            store.create_job("https://example.com/", "h").unwrap().id
        };
        let store = SqliteJobStore::open(&path).unwrap();
        assert!(store.get_job(id).unwrap().is_some());
    }
}
