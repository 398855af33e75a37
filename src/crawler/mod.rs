//! Crawler module for image discovery crawls
//!
//! This module contains the crawl job loop, including:
//! - Page discovery from sitemaps, sitemap indexes or a single root page
//! - Image extraction and image×variant queueing
//! - Batched submission to the scheduler with checkpoints after each batch
//! - Cancellation and resume
//! - Per-job leases so one job is driven by at most one crawler

mod coordinator;
mod locks;

pub use coordinator::{CrawlReport, Crawler, CrawlerSettings};
pub use locks::{JobLease, JobLocks};
