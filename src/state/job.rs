//! Crawl job state definitions
//!
//! A [`CrawlJob`] is the in-memory image of one persisted job: the pages it
//! has visited, every image it has queued, and the per-status counters.
//! An image is queued once however many variants the crawl produces for it.
//! A job only moves forward; pages are never un-visited and counters never
//! decrease.

use crate::image::{CacheKey, ImageRef};
use crate::PipelineError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Lifecycle of a crawl job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created but not yet picked up by a crawler
    Pending,
    /// A crawler is driving the job (or was, before a crash)
    Running,
    /// Every discovered page visited, every image terminal
    Completed,
    /// Unrecoverable job-level condition, e.g. unreachable sitemap
    Failed,
    /// Stopped on request
    Cancelled,
}

impl JobStatus {
    /// Returns true if no crawler will touch the job without a resume
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the job may move to `next`
    ///
    /// `Running -> Running` covers picking up a job whose previous driver
    /// crashed; `Failed`/`Cancelled -> Running` is an explicit resume.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Failed, Running)
                | (Cancelled, Running)
        )
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Per-image outcome within a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    /// Discovered, not yet processed
    Queued,
    /// Fetched from the origin, transformed and stored
    Saved,
    /// Transformed from an original that was already stored
    Updated,
    /// Every variant already present; nothing done
    Unchanged,
    /// A transform failed; the original is served instead
    Degraded,
    /// Even the original could not be obtained or a store write failed
    Failed,
}

impl ImageStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued)
    }

    /// Combines the outcomes of an image's variants into one status
    ///
    /// The more severe outcome wins: failed, then degraded, then saved,
    /// updated and unchanged.
    pub fn combine(self, other: ImageStatus) -> ImageStatus {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    fn severity(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Unchanged => 1,
            Self::Updated => 2,
            Self::Saved => 3,
            Self::Degraded => 4,
            Self::Failed => 5,
        }
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Saved => "saved",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "saved" => Some(Self::Saved),
            "updated" => Some(Self::Updated),
            "unchanged" => Some(Self::Unchanged),
            "degraded" => Some(Self::Degraded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Terminal image outcomes of a job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessedCounts {
    pub saved: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub degraded: u64,
    pub failed: u64,
}

impl ProcessedCounts {
    /// Counts one terminal outcome; `Queued` is ignored
    pub fn record(&mut self, status: ImageStatus) {
        match status {
            ImageStatus::Queued => {}
            ImageStatus::Saved => self.saved += 1,
            ImageStatus::Updated => self.updated += 1,
            ImageStatus::Unchanged => self.unchanged += 1,
            ImageStatus::Degraded => self.degraded += 1,
            ImageStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.saved + self.updated + self.unchanged + self.degraded + self.failed
    }
}

/// One image a job has to materialize into every configured variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedImage {
    pub image: ImageRef,
    pub status: ImageStatus,
    pub error: Option<String>,
}

impl QueuedImage {
    pub fn new(image: ImageRef) -> Self {
        Self {
            image,
            status: ImageStatus::Queued,
            error: None,
        }
    }

    /// Identity of the image within a job: the key of its original
    pub fn key(&self) -> CacheKey {
        CacheKey::original(&self.image)
    }
}

/// Terminal status to record for one queued image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpdate {
    pub key: CacheKey,
    pub status: ImageStatus,
    pub error: Option<String>,
}

/// A persisted crawl job
#[derive(Debug, Clone)]
pub struct CrawlJob {
    pub id: i64,
    pub root_url: String,
    pub status: JobStatus,
    pub config_hash: String,
    pub visited_pages: BTreeSet<String>,
    pub queued_images: BTreeMap<CacheKey, QueuedImage>,
    pub counts: ProcessedCounts,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CrawlJob {
    pub fn new(id: i64, root_url: impl Into<String>, config_hash: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            root_url: root_url.into(),
            status: JobStatus::Pending,
            config_hash: config_hash.into(),
            visited_pages: BTreeSet::new(),
            queued_images: BTreeMap::new(),
            counts: ProcessedCounts::default(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the job to `next`, rejecting illegal transitions
    pub fn transition(&mut self, next: JobStatus) -> Result<(), PipelineError> {
        if !self.status.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn is_visited(&self, page: &str) -> bool {
        self.visited_pages.contains(page)
    }

    /// Returns true if the page was not visited before
    pub fn mark_visited(&mut self, page: impl Into<String>) -> bool {
        self.visited_pages.insert(page.into())
    }

    /// Queues an image, returning false if it is already known
    pub fn enqueue(&mut self, image: ImageRef) -> bool {
        let queued = QueuedImage::new(image);
        let key = queued.key();
        if self.queued_images.contains_key(&key) {
            return false;
        }
        self.queued_images.insert(key, queued);
        true
    }

    /// Records a terminal outcome
    ///
    /// Only a `Queued` image can change status, so an outcome is counted at
    /// most once per image. Returns true if the update was applied.
    pub fn record(&mut self, update: &ImageUpdate) -> bool {
        if !update.status.is_terminal() {
            return false;
        }
        match self.queued_images.get_mut(&update.key) {
            Some(queued) if !queued.status.is_terminal() => {
                queued.status = update.status;
                queued.error = update.error.clone();
                self.counts.record(update.status);
                self.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    pub fn image_status(&self, key: &CacheKey) -> Option<ImageStatus> {
        self.queued_images.get(key).map(|q| q.status)
    }

    /// Images still waiting for a terminal status, in key order
    pub fn pending_images(&self) -> Vec<QueuedImage> {
        self.queued_images
            .values()
            .filter(|q| !q.status.is_terminal())
            .cloned()
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.queued_images
            .values()
            .filter(|q| !q.status.is_terminal())
            .count()
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            root_url: self.root_url.clone(),
            status: self.status,
            visited_pages: self.visited_pages.len(),
            queued_images: self.queued_images.len(),
            pending_images: self.pending_count(),
            processed_counts: self.counts,
            error: self.error.clone(),
            config_hash: self.config_hash.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Status report of a job as returned by the status API
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: i64,
    #[serde(rename = "rootURL")]
    pub root_url: String,
    pub status: JobStatus,
    pub visited_pages: usize,
    pub queued_images: usize,
    pub pending_images: usize,
    pub processed_counts: ProcessedCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub config_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
