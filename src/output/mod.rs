//! Output module for crawl reports and job summaries
//!
//! This module handles:
//! - Printing crawl reports and job summaries for operators
//! - Rendering the same data as JSON for scripts
//! - Blob store inventory statistics

pub mod stats;

pub use stats::{load_inventory, print_inventory, Inventory};

use crate::crawler::CrawlReport;
use crate::state::{JobSummary, ProcessedCounts};
use serde::Serialize;

/// Renders any report type as pretty JSON
pub fn to_json<T: Serialize>(value: &T) -> serde_json::Result<String> {
    serde_json::to_string_pretty(value)
}

fn counts_lines(counts: &ProcessedCounts) -> Vec<String> {
    vec![
        format!("  Saved:     {}", counts.saved),
        format!("  Updated:   {}", counts.updated),
        format!("  Unchanged: {}", counts.unchanged),
        format!("  Degraded:  {}", counts.degraded),
        format!("  Failed:    {}", counts.failed),
        format!("  Total:     {}", counts.total()),
    ]
}

/// Human-readable crawl report
pub fn render_report(report: &CrawlReport) -> String {
    let mut lines = vec![
        format!("=== Crawl Job {} ===", report.job_id),
        String::new(),
        format!("Status: {}", report.status),
    ];
    if let Some(error) = &report.error {
        lines.push(format!("Error: {}", error));
    }

    lines.push(String::new());
    lines.push("Pages:".to_string());
    lines.push(format!("  Discovered: {}", report.pages_discovered));
    lines.push(format!("  Visited:    {}", report.pages_visited));
    lines.push(format!("  Skipped:    {}", report.pages_skipped));
    lines.push(format!("  Failed:     {}", report.pages_failed));

    lines.push(String::new());
    lines.push(format!(
        "Images ({} newly queued, {} batches):",
        report.images_discovered, report.batches
    ));
    lines.extend(counts_lines(&report.counts));

    lines.push(String::new());
    lines.push(format!("Elapsed: {:.1}s", report.elapsed_ms as f64 / 1000.0));
    lines.join("\n")
}

pub fn print_report(report: &CrawlReport) {
    println!("{}", render_report(report));
}

/// Human-readable job summary
pub fn render_summary(summary: &JobSummary) -> String {
    let mut lines = vec![
        format!("=== Crawl Job {} ===", summary.id),
        String::new(),
        format!("Root URL:      {}", summary.root_url),
        format!("Status:        {}", summary.status),
        format!("Config hash:   {}", summary.config_hash),
        format!("Created:       {}", summary.created_at.format("%Y-%m-%d %H:%M:%S UTC")),
        format!("Updated:       {}", summary.updated_at.format("%Y-%m-%d %H:%M:%S UTC")),
        format!("Visited pages: {}", summary.visited_pages),
        format!(
            "Images:        {} queued, {} pending",
            summary.queued_images, summary.pending_images
        ),
    ];
    if let Some(error) = &summary.error {
        lines.push(format!("Error:         {}", error));
    }

    lines.push(String::new());
    lines.push("Processed:".to_string());
    lines.extend(counts_lines(&summary.processed_counts));
    lines.join("\n")
}

pub fn print_summary(summary: &JobSummary) {
    println!("{}", render_summary(summary));
}

/// One line per job, newest first
pub fn render_jobs(jobs: &[JobSummary]) -> String {
    if jobs.is_empty() {
        return "No crawl jobs found.".to_string();
    }

    let mut lines = vec![format!(
        "{:>6}  {:<10}  {:>6}  {:>8}  {:>8}  {}",
        "ID", "STATUS", "PAGES", "PENDING", "FAILED", "ROOT URL"
    )];
    for job in jobs {
        lines.push(format!(
            "{:>6}  {:<10}  {:>6}  {:>8}  {:>8}  {}",
            job.id,
            job.status.to_string(),
            job.visited_pages,
            job.pending_images,
            job.processed_counts.failed,
            job.root_url
        ));
    }
    lines.join("\n")
}

pub fn print_jobs(jobs: &[JobSummary]) {
    println!("{}", render_jobs(jobs));
}
