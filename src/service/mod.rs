//! Pipeline wiring and the exposed adapters
//!
//! [`Pipeline`] owns one instance of every component (blob store, origin
//! client, transform client, scheduler, materializer, crawl state, crawler)
//! built from a [`Config`]. The [`api`] handlers and the CLI are thin
//! adapters over it.

pub mod api;

use crate::blob::{BlobStore, FsBlobStore, MemoryBlobStore};
use crate::config::{Config, StoreBackend};
use crate::crawler::{Crawler, CrawlerSettings};
use crate::image::{ImageRef, TransformSpec};
use crate::materialize::{ImageMaterializer, MaterializeError, Materialization, RetryPolicies};
use crate::origin::{HttpOrigin, OriginClient};
use crate::scheduler::{Scheduler, SchedulerError};
use crate::state::CrawlState;
use crate::storage::{open_storage, JobStore};
use crate::transform::{HttpTransformService, TransformService};
use crate::url::normalize_url;
use crate::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use url::Url;

/// Result of a materialization run through the scheduler
pub type ScheduledMaterialization =
    std::result::Result<std::result::Result<Materialization, MaterializeError>, SchedulerError>;

/// A fully wired pipeline
///
/// Must be built inside a Tokio runtime (the scheduler and the coalescing
/// groups spawn their actors on construction).
pub struct Pipeline {
    config: Arc<Config>,
    config_hash: String,
    scheduler: Scheduler,
    materializer: Arc<ImageMaterializer>,
    crawler: Crawler,
}

impl Pipeline {
    /// Builds every component from configuration
    ///
    /// # Arguments
    ///
    /// * `config` - A validated configuration
    /// * `config_hash` - Hash of the configuration file, recorded on new jobs
    pub fn from_config(config: Config, config_hash: impl Into<String>) -> Result<Self> {
        let store: Arc<dyn BlobStore> = match config.store.backend {
            StoreBackend::Filesystem => Arc::new(FsBlobStore::new("filesystem", &config.store.root)?),
            StoreBackend::Memory => Arc::new(MemoryBlobStore::new("memory")),
        };

        let origin = Arc::new(HttpOrigin::from_config(&config.origin)?);

        let transformer = Arc::new(HttpTransformService::with_timeout(
            Url::parse(&config.transform.endpoint)?,
            Duration::from_millis(config.transform.timeout_ms),
            config.transform.gravity.clone(),
        )?);

        let jobs = open_storage(Path::new(&config.crawler.database_path))?;

        Self::from_parts(config, config_hash, store, origin, transformer, jobs)
    }

    /// Builds a pipeline around caller-supplied collaborators
    pub fn from_parts(
        config: Config,
        config_hash: impl Into<String>,
        store: Arc<dyn BlobStore>,
        origin: Arc<dyn OriginClient>,
        transformer: Arc<dyn TransformService>,
        jobs: impl JobStore + 'static,
    ) -> Result<Self> {
        let retry = RetryPolicies {
            origin: config.retry.origin.policy(),
            transform: config.retry.transform.policy(),
        };

        let mut materializer = ImageMaterializer::new(store, origin.clone(), transformer, retry);
        if let Some(public) = &config.store.public_url {
            materializer = materializer.with_public_base(Url::parse(public)?);
        }
        let materializer = Arc::new(materializer);

        let scheduler = Scheduler::new(config.scheduler.max_concurrent);
        let crawler = Crawler::new(
            origin,
            materializer.clone(),
            scheduler.clone(),
            CrawlState::new(jobs),
            CrawlerSettings::from_config(&config),
        );

        tracing::debug!(
            store = materializer.store().name(),
            max_concurrent = scheduler.limit(),
            "Pipeline ready"
        );

        Ok(Self {
            config: Arc::new(config),
            config_hash: config_hash.into(),
            scheduler,
            materializer,
            crawler,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn materializer(&self) -> &Arc<ImageMaterializer> {
        &self.materializer
    }

    pub fn crawler(&self) -> &Crawler {
        &self.crawler
    }

    pub fn state(&self) -> &CrawlState {
        self.crawler.state()
    }

    /// Creates a job for `root_url` without starting it
    pub fn create_job(&self, root_url: &str) -> Result<i64> {
        let root = normalize_url(root_url)?;
        Ok(self.state().create_job(root.as_str(), &self.config_hash)?.id)
    }

    /// Creates a job and drives it in the background
    ///
    /// Returns the new job id and the handle of the background run.
    pub fn start_job(
        &self,
        root_url: &str,
    ) -> Result<(i64, JoinHandle<Result<crate::crawler::CrawlReport>>)> {
        let job_id = self.create_job(root_url)?;
        Ok((job_id, self.crawler.spawn(job_id)))
    }

    /// Materializes one image through the scheduler
    pub async fn materialize(&self, image: ImageRef, spec: TransformSpec) -> ScheduledMaterialization {
        let materializer = self.materializer.clone();
        self.scheduler
            .enqueue(move || async move { materializer.materialize(&image, &spec).await })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteJobStore;

    #[tokio::test]
    async fn test_from_config_memory_backend() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::with_endpoint("http://127.0.0.1:9/transform");
        config.store.backend = StoreBackend::Memory;
        config.store.public_url = Some("https://cdn.example.com/images".to_string());
        config.crawler.database_path = dir.path().join("jobs.db").display().to_string();

        let pipeline = Pipeline::from_config(config, "abc123").unwrap();
        assert_eq!(pipeline.materializer().store().name(), "memory");
        assert_eq!(pipeline.scheduler().limit(), 5);
        assert_eq!(pipeline.config_hash(), "abc123");

        let key = crate::image::CacheKey::from_raw("variants/avif/a.jpg");
        assert_eq!(
            pipeline.materializer().public_url(&key).unwrap().as_str(),
            "https://cdn.example.com/images/variants/avif/a.jpg"
        );
    }

    #[tokio::test]
    async fn test_create_job_normalizes_root() {
        let config = Config::with_endpoint("http://127.0.0.1:9/transform");
        let pipeline = Pipeline::from_parts(
            config,
            "h",
            Arc::new(MemoryBlobStore::new("memory")),
            Arc::new(HttpOrigin::from_config(&Default::default()).unwrap()),
            Arc::new(
                HttpTransformService::with_timeout(
                    Url::parse("http://127.0.0.1:9/transform").unwrap(),
                    Duration::from_secs(1),
                    None,
                )
                .unwrap(),
            ),
            SqliteJobStore::in_memory().unwrap(),
        )
        .unwrap();

        let id = pipeline.create_job("https://Example.com/blog/#top").unwrap();
        let job = pipeline.state().load(id).unwrap();
        assert_eq!(job.root_url, "https://example.com/blog");
        assert_eq!(job.config_hash, "h");

        assert!(pipeline.create_job("ftp://example.com/").is_err());
    }
}
