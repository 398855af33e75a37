//! State module for tracking crawl progress
//!
//! This module provides the crawl job model and the shared handle through
//! which crawlers and API handlers read and persist it.
//!
//! # Components
//!
//! - `CrawlJob`: visited pages, queued images and counters of one job
//! - `JobStatus` / `ImageStatus`: job lifecycle and per-image outcomes
//! - `CrawlState`: thread-safe handle over a [`JobStore`](crate::storage::JobStore)

mod crawl_state;
mod job;

pub use crawl_state::CrawlState;
pub use job::{
    CrawlJob, ImageStatus, ImageUpdate, JobStatus, JobSummary, ProcessedCounts, QueuedImage,
};
