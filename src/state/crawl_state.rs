use super::{CrawlJob, ImageUpdate, JobSummary, QueuedImage};
use crate::storage::JobStore;
use crate::{PipelineError, Result};
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared handle over the job store
///
/// Cheap to clone. Every method takes the store lock for the duration of
/// one storage call; none of them hold it across an `.await`.
#[derive(Clone)]
pub struct CrawlState {
    store: Arc<Mutex<Box<dyn JobStore>>>,
}

impl CrawlState {
    pub fn new(store: impl JobStore + 'static) -> Self {
        Self {
            store: Arc::new(Mutex::new(Box::new(store))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn JobStore>> {
        // A panic mid-call leaves at worst an uncommitted transaction behind
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn create_job(&self, root_url: &str, config_hash: &str) -> Result<CrawlJob> {
        let job = self.lock().create_job(root_url, config_hash)?;
        tracing::info!(job_id = job.id, root_url, "Created crawl job");
        Ok(job)
    }

    /// Loads a job, failing with `JobNotFound` if it does not exist
    pub fn load(&self, job_id: i64) -> Result<CrawlJob> {
        self.lock()
            .get_job(job_id)?
            .ok_or(PipelineError::JobNotFound(job_id))
    }

    pub fn summary(&self, job_id: i64) -> Result<JobSummary> {
        Ok(self.load(job_id)?.summary())
    }

    pub fn list(&self) -> Result<Vec<JobSummary>> {
        Ok(self.lock().list_jobs()?)
    }

    pub fn latest_unfinished(&self) -> Result<Option<i64>> {
        Ok(self.lock().latest_unfinished_job()?)
    }

    /// Persists the job row (status, counters, error)
    pub fn save(&self, job: &CrawlJob) -> Result<()> {
        Ok(self.lock().save_job(job)?)
    }

    /// Persists newly discovered images
    pub fn enqueue_images(&self, job_id: i64, images: &[QueuedImage]) -> Result<()> {
        if images.is_empty() {
            return Ok(());
        }
        Ok(self.lock().upsert_images(job_id, images)?)
    }

    /// Persists the outcome of one batch together with the job's counters,
    /// in one atomic write
    pub fn checkpoint_batch(&self, job: &CrawlJob, updates: &[ImageUpdate]) -> Result<()> {
        Ok(self.lock().checkpoint_batch(job, updates)?)
    }

    /// Records `url` as visited and saves the job, in one atomic write
    pub fn mark_visited(&self, job: &CrawlJob, url: &str) -> Result<()> {
        Ok(self.lock().checkpoint_page(job, url)?)
    }

    pub fn request_cancel(&self, job_id: i64) -> Result<()> {
        if !self.lock().request_cancel(job_id)? {
            return Err(PipelineError::JobNotFound(job_id));
        }
        tracing::info!(job_id, "Cancellation requested");
        Ok(())
    }

    pub fn is_cancel_requested(&self, job_id: i64) -> Result<bool> {
        Ok(self.lock().is_cancel_requested(job_id)?)
    }

    pub fn clear_cancel(&self, job_id: i64) -> Result<()> {
        Ok(self.lock().clear_cancel(job_id)?)
    }
}
