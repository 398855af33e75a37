use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Per-job execution guard
///
/// At most one [`JobLease`] exists per job id at a time within the
/// process; the crawler holds it for the whole of a run.
#[derive(Debug, Clone, Default)]
pub struct JobLocks {
    held: Arc<Mutex<HashSet<i64>>>,
}

impl JobLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the lease for `job_id`, or returns None if another driver holds it
    pub fn try_acquire(&self, job_id: i64) -> Option<JobLease> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(job_id) {
            return None;
        }
        Some(JobLease {
            job_id,
            held: self.held.clone(),
        })
    }

    pub fn is_held(&self, job_id: i64) -> bool {
        let held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.contains(&job_id)
    }
}

/// Exclusive right to drive one job; released on drop
#[derive(Debug)]
pub struct JobLease {
    job_id: i64,
    held: Arc<Mutex<HashSet<i64>>>,
}

impl JobLease {
    pub fn job_id(&self) -> i64 {
        self.job_id
    }
}

impl Drop for JobLease {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.job_id);
    }
}
