//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the job loop that coordinates one crawl:
//! - Discovering pages from a sitemap (index) or a single root page
//! - Extracting images per page and queueing each image once
//! - Submitting fixed-size batches of images to the scheduler with a delay
//!   between them; every variant of an image is produced by the same task
//! - Persisting progress after every batch and every page
//! - Honouring cancellation requests and resuming interrupted jobs

use super::locks::JobLocks;
use crate::config::{CancelMode, Config};
use crate::extract::{extract_image_urls, parse_sitemap, ImageFilter, Sitemap};
use crate::image::{CacheKey, ImageRef, TransformSpec};
use crate::materialize::{
    ImageMaterializer, MaterializeError, MaterializeOutcome, Materialization,
};
use crate::origin::{FetchError, FetchedResource, OriginClient};
use crate::retry::RetryPolicy;
use crate::scheduler::{Scheduler, SchedulerError};
use crate::state::{
    CrawlJob, CrawlState, ImageStatus, ImageUpdate, JobStatus, ProcessedCounts, QueuedImage,
};
use crate::url::normalize_url;
use crate::{PipelineError, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use url::Url;

/// How often an abandon-batch crawler polls for a cancellation request
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Crawl behavior derived from configuration
#[derive(Debug, Clone)]
pub struct CrawlerSettings {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub relevant_sitemaps: Vec<String>,
    pub cancel_mode: CancelMode,
    /// Variants every discovered image is materialized into
    pub variants: Vec<TransformSpec>,
    pub filter: ImageFilter,
    pub page_retry: RetryPolicy,
    pub sitemap_retry: RetryPolicy,
}

impl CrawlerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.crawler.batch_size.max(1),
            batch_delay: config.crawler.batch_delay(),
            relevant_sitemaps: config.crawler.relevant_sitemaps.clone(),
            cancel_mode: config.crawler.cancel_mode,
            variants: config.transform.variant_specs(),
            filter: ImageFilter::from_config(&config.extract),
            page_retry: config.retry.origin.policy(),
            sitemap_retry: config.retry.sitemap.policy(),
        }
    }
}

/// Summary of one `Crawler::run`
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub job_id: i64,
    pub status: JobStatus,
    /// Pages listed by the sitemap (or the root page)
    pub pages_discovered: usize,
    /// Pages processed by this run
    pub pages_visited: usize,
    /// Pages skipped because an earlier run already visited them
    pub pages_skipped: usize,
    /// Pages that could not be fetched; recorded as visited
    pub pages_failed: usize,
    /// Images first queued by this run
    pub images_discovered: usize,
    /// Totals over the whole job, earlier runs included
    pub counts: ProcessedCounts,
    pub batches: usize,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct Progress {
    pages_discovered: usize,
    pages_visited: usize,
    pages_skipped: usize,
    pages_failed: usize,
    images_discovered: usize,
    batches: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Finished,
    Cancelled,
}

/// Where a job's pages come from
enum Discovery {
    Sitemap(Vec<String>),
    RootPage(String),
}

/// Drives crawl jobs
///
/// Cheap to clone; clones share the scheduler, the materializer and the
/// per-job locks, so two clones can never drive the same job at once.
#[derive(Clone)]
pub struct Crawler {
    origin: Arc<dyn OriginClient>,
    materializer: Arc<ImageMaterializer>,
    scheduler: Scheduler,
    state: CrawlState,
    locks: JobLocks,
    settings: Arc<CrawlerSettings>,
}

impl Crawler {
    pub fn new(
        origin: Arc<dyn OriginClient>,
        materializer: Arc<ImageMaterializer>,
        scheduler: Scheduler,
        state: CrawlState,
        settings: CrawlerSettings,
    ) -> Self {
        Self {
            origin,
            materializer,
            scheduler,
            state,
            locks: JobLocks::new(),
            settings: Arc::new(settings),
        }
    }

    pub fn state(&self) -> &CrawlState {
        &self.state
    }

    /// Runs `job_id` in the background
    pub fn spawn(&self, job_id: i64) -> JoinHandle<Result<CrawlReport>> {
        let crawler = self.clone();
        tokio::spawn(async move {
            let result = crawler.run(job_id).await;
            if let Err(e) = &result {
                tracing::error!(job_id, error = %e, "Crawl aborted");
            }
            result
        })
    }

    /// Runs a job to completion, cancellation or failure
    ///
    /// A job-level failure (unreachable sitemap or root page) is recorded on
    /// the job and returned as an `Ok` report with status `Failed`.
    /// Infrastructure errors (job database, scheduler) abort the run with
    /// `Err` and leave the job `Running`, so a later run resumes it.
    ///
    /// # Errors
    ///
    /// * `JobBusy` - another crawler in this process is driving the job
    /// * `JobNotFound` - no such job
    pub async fn run(&self, job_id: i64) -> Result<CrawlReport> {
        let _lease = self
            .locks
            .try_acquire(job_id)
            .ok_or(PipelineError::JobBusy(job_id))?;

        let started = Instant::now();
        let mut job = self.state.load(job_id)?;
        let mut progress = Progress::default();

        if job.status == JobStatus::Completed {
            tracing::info!(job_id, "Job already completed");
            return Ok(self.report(&job, &progress, started));
        }

        if matches!(job.status, JobStatus::Failed | JobStatus::Cancelled) {
            tracing::info!(job_id, previous = %job.status, "Resuming job");
            self.state.clear_cancel(job_id)?;
            job.error = None;
        }

        job.transition(JobStatus::Running)?;
        self.state.save(&job)?;
        tracing::info!(
            job_id,
            root_url = %job.root_url,
            visited = job.visited_pages.len(),
            pending = job.pending_count(),
            "Starting crawl"
        );

        match self.drive(&mut job, &mut progress).await {
            Ok(Flow::Finished) => job.transition(JobStatus::Completed)?,
            Ok(Flow::Cancelled) => {
                tracing::info!(job_id, "Crawl cancelled");
                job.transition(JobStatus::Cancelled)?;
            }
            Err(e) if e.is_job_failure() => {
                tracing::error!(job_id, error = %e, "Crawl failed");
                job.error = Some(e.to_string());
                job.transition(JobStatus::Failed)?;
            }
            // The stored job already reflects the last checkpoint; the
            // in-memory counters may include a batch that never committed.
            Err(e) => return Err(e),
        }

        self.state.save(&job)?;
        let report = self.report(&job, &progress, started);
        tracing::info!(
            job_id,
            status = %report.status,
            pages = report.pages_visited,
            batches = report.batches,
            saved = report.counts.saved,
            failed = report.counts.failed,
            elapsed_ms = report.elapsed_ms,
            "Crawl finished"
        );
        Ok(report)
    }

    async fn drive(&self, job: &mut CrawlJob, progress: &mut Progress) -> Result<Flow> {
        let discovery = self.discover(&job.root_url).await?;
        let (pages, root_mode) = match discovery {
            Discovery::Sitemap(pages) => (pages, false),
            Discovery::RootPage(page) => (vec![page], true),
        };
        progress.pages_discovered = pages.len();

        for page in &pages {
            if job.is_visited(page) {
                progress.pages_skipped += 1;
                continue;
            }
            if self.cancel_requested(job.id)? {
                return Ok(Flow::Cancelled);
            }

            let images = match self.fetch_page_images(page).await {
                Ok(images) => images,
                Err(e) if root_mode => {
                    return Err(PipelineError::RootUnreachable {
                        url: page.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!(job_id = job.id, page = %page, error = %e, "Skipping unreachable page");
                    progress.pages_failed += 1;
                    job.mark_visited(page.as_str());
                    self.state.mark_visited(job, page)?;
                    continue;
                }
            };

            let work = self.enqueue_page_images(job, &images, progress)?;
            tracing::debug!(
                job_id = job.id,
                page = %page,
                images = images.len(),
                pending = work.len(),
                "Page extracted"
            );

            if self.process_images(job, work, progress).await? == Flow::Cancelled {
                return Ok(Flow::Cancelled);
            }

            job.mark_visited(page.as_str());
            self.state.mark_visited(job, page)?;
            progress.pages_visited += 1;
        }

        // Images queued by a page that vanished from the sitemap since
        let leftovers = job.pending_images();
        if !leftovers.is_empty() {
            tracing::info!(job_id = job.id, count = leftovers.len(), "Processing leftover images");
            if self.process_images(job, leftovers, progress).await? == Flow::Cancelled {
                return Ok(Flow::Cancelled);
            }
        }

        Ok(Flow::Finished)
    }

    /// Lists the pages of a job
    async fn discover(&self, root_url: &str) -> Result<Discovery> {
        let root = normalize_url(root_url).map_err(|e| PipelineError::RootUnreachable {
            url: root_url.to_string(),
            reason: e.to_string(),
        })?;

        if !root.path().to_ascii_lowercase().ends_with(".xml") {
            return Ok(Discovery::RootPage(root.to_string()));
        }

        let sitemap = self
            .fetch_sitemap(root.as_str())
            .await
            .map_err(|e| PipelineError::SitemapUnreachable {
                url: root.to_string(),
                reason: e.to_string(),
            })?;

        let entries = match sitemap {
            Sitemap::UrlSet(pages) => pages,
            Sitemap::Index(children) => {
                let mut pages = Vec::new();
                for child in children.iter().filter(|c| self.is_relevant_sitemap(c)) {
                    match self.fetch_sitemap(child).await {
                        Ok(Sitemap::UrlSet(child_pages)) => pages.extend(child_pages),
                        Ok(Sitemap::Index(_)) => {
                            tracing::warn!(sitemap = %child, "Ignoring nested sitemap index");
                        }
                        Err(e) => {
                            tracing::warn!(sitemap = %child, error = %e, "Skipping unreachable sitemap");
                        }
                    }
                }
                pages
            }
        };

        let mut seen = HashSet::new();
        let pages: Vec<String> = entries
            .iter()
            .filter_map(|entry| match normalize_url(entry) {
                Ok(url) => Some(url.to_string()),
                Err(e) => {
                    tracing::debug!(entry = %entry, error = %e, "Skipping invalid sitemap entry");
                    None
                }
            })
            .filter(|page| seen.insert(page.clone()))
            .collect();

        tracing::info!(sitemap = %root, pages = pages.len(), "Sitemap discovered");
        Ok(Discovery::Sitemap(pages))
    }

    fn is_relevant_sitemap(&self, url: &str) -> bool {
        let relevant = &self.settings.relevant_sitemaps;
        relevant.is_empty() || relevant.iter().any(|suffix| url.ends_with(suffix.as_str()))
    }

    async fn fetch_sitemap(&self, url: &str) -> std::result::Result<Sitemap, FetchError> {
        let resource = self
            .fetch_with(&self.settings.sitemap_retry, "sitemap fetch", url)
            .await?;
        Ok(parse_sitemap(&resource.text()))
    }

    async fn fetch_with(
        &self,
        policy: &RetryPolicy,
        operation: &str,
        url: &str,
    ) -> std::result::Result<FetchedResource, FetchError> {
        policy
            .run(
                operation,
                || self.origin.fetch(url),
                || FetchError::Timeout {
                    url: url.to_string(),
                },
            )
            .await
    }

    /// Fetches a page and extracts its images; non-HTML pages have none
    async fn fetch_page_images(&self, page: &str) -> std::result::Result<Vec<ImageRef>, FetchError> {
        let resource = self
            .fetch_with(&self.settings.page_retry, "page fetch", page)
            .await?;

        if resource.content_type.is_some() && !resource.is_html() {
            tracing::debug!(page, content_type = ?resource.content_type, "Not an HTML page");
            return Ok(Vec::new());
        }

        let base = Url::parse(&resource.url)
            .or_else(|_| Url::parse(page))
            .map_err(|e| FetchError::InvalidUrl {
                url: page.to_string(),
                reason: e.to_string(),
            })?;

        let images = extract_image_urls(&resource.text(), &base, &self.settings.filter)
            .iter()
            .filter_map(|url| match ImageRef::from_url(url) {
                Ok(image) => Some(image),
                Err(e) => {
                    tracing::debug!(image = %url, error = %e, "Skipping image");
                    None
                }
            })
            .collect();

        Ok(images)
    }

    /// Queues the images of a page and returns the pending ones
    fn enqueue_page_images(
        &self,
        job: &mut CrawlJob,
        images: &[ImageRef],
        progress: &mut Progress,
    ) -> Result<Vec<QueuedImage>> {
        let mut fresh = Vec::new();
        let mut work = Vec::new();
        let mut seen: HashSet<CacheKey> = HashSet::new();

        for image in images {
            let key = CacheKey::original(image);
            if !seen.insert(key.clone()) {
                continue;
            }
            if job.enqueue(image.clone()) {
                fresh.push(QueuedImage::new(image.clone()));
            }
            if let Some(queued) = job.queued_images.get(&key) {
                if !queued.status.is_terminal() {
                    work.push(queued.clone());
                }
            }
        }

        progress.images_discovered += fresh.len();
        self.state.enqueue_images(job.id, &fresh)?;
        Ok(work)
    }

    /// Runs `work` in batches, persisting after each
    async fn process_images(
        &self,
        job: &mut CrawlJob,
        work: Vec<QueuedImage>,
        progress: &mut Progress,
    ) -> Result<Flow> {
        for chunk in work.chunks(self.settings.batch_size) {
            if progress.batches > 0 && !self.settings.batch_delay.is_zero() {
                tokio::time::sleep(self.settings.batch_delay).await;
            }
            if self.cancel_requested(job.id)? {
                return Ok(Flow::Cancelled);
            }

            let Some(updates) = self.run_batch(job.id, chunk).await else {
                return Ok(Flow::Cancelled);
            };

            for update in &updates {
                job.record(update);
            }
            self.state.checkpoint_batch(job, &updates)?;
            progress.batches += 1;

            tracing::info!(
                job_id = job.id,
                batch = progress.batches,
                size = chunk.len(),
                pending = job.pending_count(),
                "Batch complete"
            );
        }

        Ok(Flow::Finished)
    }

    /// Submits one batch and waits for it
    ///
    /// Each image is one scheduler task that produces all of its variants.
    /// Returns None if the batch was abandoned because of a cancellation
    /// request; abandoned tasks keep running but their results are dropped.
    async fn run_batch(&self, job_id: i64, chunk: &[QueuedImage]) -> Option<Vec<ImageUpdate>> {
        let handles: Vec<_> = chunk
            .iter()
            .cloned()
            .map(|queued| {
                let key = queued.key();
                let source_url = queued.image.source_url().to_string();
                let materializer = self.materializer.clone();
                let settings = self.settings.clone();
                let handle = self.scheduler.enqueue(move || async move {
                    let mut results = Vec::with_capacity(settings.variants.len());
                    for spec in &settings.variants {
                        let key = CacheKey::variant(&queued.image, spec);
                        results.push((key, materializer.materialize(&queued.image, spec).await));
                    }
                    results
                });
                (key, source_url, handle)
            })
            .collect();

        let collect = async move {
            let mut updates = Vec::with_capacity(handles.len());
            for (key, source_url, handle) in handles {
                updates.push(image_update(key, &source_url, handle.await));
            }
            updates
        };

        match self.settings.cancel_mode {
            CancelMode::BetweenBatches => Some(collect.await),
            CancelMode::AbandonBatch => {
                tokio::select! {
                    updates = collect => Some(updates),
                    _ = self.wait_for_cancel(job_id) => {
                        tracing::warn!(job_id, "Abandoning batch on cancellation");
                        None
                    }
                }
            }
        }
    }

    async fn wait_for_cancel(&self, job_id: i64) {
        loop {
            tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
            match self.state.is_cancel_requested(job_id) {
                Ok(true) => return,
                Ok(false) => {}
                Err(e) => tracing::warn!(job_id, error = %e, "Failed to poll cancellation"),
            }
        }
    }

    fn cancel_requested(&self, job_id: i64) -> Result<bool> {
        self.state.is_cancel_requested(job_id)
    }

    fn report(&self, job: &CrawlJob, progress: &Progress, started: Instant) -> CrawlReport {
        CrawlReport {
            job_id: job.id,
            status: job.status,
            pages_discovered: progress.pages_discovered,
            pages_visited: progress.pages_visited,
            pages_skipped: progress.pages_skipped,
            pages_failed: progress.pages_failed,
            images_discovered: progress.images_discovered,
            counts: job.counts,
            batches: progress.batches,
            elapsed_ms: started.elapsed().as_millis() as u64,
            error: job.error.clone(),
        }
    }
}

/// Outcome of each variant of one image, keyed by variant
type VariantResults = Vec<(CacheKey, std::result::Result<Materialization, MaterializeError>)>;

/// Folds the variants of one image into its job status
///
/// The image takes the most severe status among its variants, so a single
/// failed variant marks the whole image failed.
fn image_update(
    key: CacheKey,
    source_url: &str,
    result: std::result::Result<VariantResults, SchedulerError>,
) -> ImageUpdate {
    let variants = match result {
        Ok(variants) => variants,
        Err(e) => {
            tracing::warn!(source_url, key = %key, error = %e, "Image failed");
            return ImageUpdate {
                key,
                status: ImageStatus::Failed,
                error: Some(e.to_string()),
            };
        }
    };

    // No variants configured: nothing left to do for the image
    let mut status = if variants.is_empty() {
        ImageStatus::Unchanged
    } else {
        ImageStatus::Queued
    };
    let mut errors = Vec::new();
    for (variant_key, result) in variants {
        let (variant_status, error) = variant_status(result);
        if let Some(error) = error {
            tracing::warn!(source_url, key = %variant_key, error = %error, "Variant failed");
            errors.push(error);
        }
        status = status.combine(variant_status);
    }

    ImageUpdate {
        key,
        status,
        error: (!errors.is_empty()).then(|| errors.join("; ")),
    }
}

fn variant_status(
    result: std::result::Result<Materialization, MaterializeError>,
) -> (ImageStatus, Option<String>) {
    match result {
        Ok(Materialization::Ready(image)) if image.outcome == MaterializeOutcome::Unstored => (
            ImageStatus::Failed,
            Some(format!("Variant {} could not be stored", image.key)),
        ),
        Ok(Materialization::Ready(image)) => (status_for(image.outcome), None),
        Ok(Materialization::Fallback { cause, .. }) => {
            (ImageStatus::Failed, Some(cause.to_string()))
        }
        Err(e) => (ImageStatus::Failed, Some(e.to_string())),
    }
}

fn status_for(outcome: MaterializeOutcome) -> ImageStatus {
    match outcome {
        MaterializeOutcome::Cached => ImageStatus::Unchanged,
        MaterializeOutcome::Created => ImageStatus::Saved,
        MaterializeOutcome::CreatedFromCachedOriginal => ImageStatus::Updated,
        MaterializeOutcome::Degraded => ImageStatus::Degraded,
        MaterializeOutcome::Unstored => ImageStatus::Failed,
    }
}
