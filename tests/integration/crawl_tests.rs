//! Integration tests for the crawler
//!
//! These tests use wiremock to create a mock origin (sitemaps, pages and
//! images) and a mock transform service, and test the full crawl cycle
//! end-to-end.

use imgedge::blob::MemoryBlobStore;
use imgedge::config::{Config, RetrySettings, VariantConfig};
use imgedge::image::ImageFormat;
use imgedge::origin::HttpOrigin;
use imgedge::service::api::{handle, ApiRequest};
use imgedge::service::Pipeline;
use imgedge::state::JobStatus;
use imgedge::storage::open_storage;
use imgedge::transform::HttpTransformService;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retry(max_retries: u32) -> RetrySettings {
    RetrySettings {
        max_retries,
        initial_delay_ms: 10,
        max_delay_ms: 40,
        attempt_timeout_ms: 5_000,
    }
}

/// Creates a test pipeline producing one AVIF variant per image
fn create_pipeline(
    transform: &MockServer,
    db_path: &std::path::Path,
    configure: impl FnOnce(&mut Config),
) -> (Pipeline, Arc<MemoryBlobStore>) {
    let mut config = Config::with_endpoint(format!("{}/transform", transform.uri()));
    config.transform.variants = vec![VariantConfig::of(ImageFormat::Avif)];
    config.crawler.batch_size = 10;
    config.crawler.batch_delay_ms = 100;
    config.scheduler.max_concurrent = 4;
    config.retry.origin = fast_retry(1);
    config.retry.transform = fast_retry(1);
    config.retry.sitemap = fast_retry(2);
    configure(&mut config);

    let store = Arc::new(MemoryBlobStore::new("memory"));
    let origin = HttpOrigin::from_config(&config.origin).expect("origin client");
    let transformer = HttpTransformService::with_timeout(
        url::Url::parse(&config.transform.endpoint).expect("endpoint"),
        Duration::from_secs(5),
        None,
    )
    .expect("transform client");
    let jobs = open_storage(db_path).expect("job store");

    let pipeline = Pipeline::from_parts(
        config,
        "test-hash",
        store.clone(),
        Arc::new(origin),
        Arc::new(transformer),
        jobs,
    )
    .expect("pipeline");

    (pipeline, store)
}

async fn mount_transform(transform: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/transform"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"avif".to_vec())
                .insert_header("content-type", "image/avif"),
        )
        .mount(transform)
        .await;
}

async fn mount_images(origin: &MockServer) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/img/.+\.jpg$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"jpeg".to_vec())
                .insert_header("content-type", "image/jpeg"),
        )
        .mount(origin)
        .await;
}

async fn mount_page(origin: &MockServer, page_path: &str, body: String, expected: Option<u64>) {
    let mock = Mock::given(method("GET")).and(path(page_path)).respond_with(
        ResponseTemplate::new(200).set_body_raw(body, "text/html; charset=utf-8"),
    );
    match expected {
        Some(count) => mock.expect(count).mount(origin).await,
        None => mock.mount(origin).await,
    }
}

async fn mount_xml(origin: &MockServer, xml_path: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(xml_path))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/xml"))
        .mount(origin)
        .await;
}

fn gallery(prefix: &str, count: usize) -> String {
    let images: String = (0..count)
        .map(|i| format!(r#"<img src="/img/{}-{}.jpg" alt="">"#, prefix, i))
        .collect();
    format!("<html><body>{}</body></html>", images)
}

fn urlset(base: &str, pages: &[&str]) -> String {
    let entries: String = pages
        .iter()
        .map(|p| format!("<url><loc>{}{}</loc></url>", base, p))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{}</urlset>"#,
        entries
    )
}

#[tokio::test]
async fn test_sitemap_crawl_in_batches() {
    let origin = MockServer::start().await;
    let transform = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let base = origin.uri();

    mount_xml(&origin, "/sitemap.xml", urlset(&base, &["/gallery"])).await;
    mount_page(&origin, "/gallery", gallery("g", 25), Some(1)).await;
    mount_images(&origin).await;
    mount_transform(&transform).await;

    let (pipeline, store) = create_pipeline(&transform, &dir.path().join("jobs.db"), |_| {});
    let job_id = pipeline.create_job(&format!("{}/sitemap.xml", base)).unwrap();

    let started = Instant::now();
    let report = pipeline.crawler().run(job_id).await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.pages_discovered, 1);
    assert_eq!(report.pages_visited, 1);
    assert_eq!(report.images_discovered, 25);
    assert_eq!(report.batches, 3);
    assert_eq!(report.counts.saved, 25);
    assert_eq!(report.counts.total(), 25);
    // Two inter-batch delays of 100ms
    assert!(started.elapsed() >= Duration::from_millis(200));

    // 25 originals plus 25 variants
    assert_eq!(store.len().await, 50);

    let summary = pipeline.state().summary(job_id).unwrap();
    assert_eq!(summary.status, JobStatus::Completed);
    assert_eq!(summary.visited_pages, 1);
    assert_eq!(summary.pending_images, 0);
    assert_eq!(summary.config_hash, "test-hash");
}

#[tokio::test]
async fn test_every_variant_runs_in_the_image_batch() {
    let origin = MockServer::start().await;
    let transform = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let base = origin.uri();

    mount_xml(&origin, "/sitemap.xml", urlset(&base, &["/gallery"])).await;
    mount_page(&origin, "/gallery", gallery("v", 25), Some(1)).await;
    mount_images(&origin).await;
    Mock::given(method("POST"))
        .and(path("/transform"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"variant".to_vec()))
        .expect(50)
        .mount(&transform)
        .await;

    let (pipeline, store) = create_pipeline(&transform, &dir.path().join("jobs.db"), |c| {
        c.transform.variants = vec![
            VariantConfig::of(ImageFormat::Avif),
            VariantConfig::of(ImageFormat::Webp),
        ];
    });
    let job_id = pipeline.create_job(&format!("{}/sitemap.xml", base)).unwrap();
    let report = pipeline.crawler().run(job_id).await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.images_discovered, 25);
    assert_eq!(report.batches, 3);
    assert_eq!(report.counts.saved, 25);
    assert_eq!(report.counts.total(), 25);

    // 25 originals plus an avif and a webp variant of each
    assert_eq!(store.len().await, 75);
    assert_eq!(pipeline.state().summary(job_id).unwrap().queued_images, 25);
}

#[tokio::test]
async fn test_single_page_root() {
    let origin = MockServer::start().await;
    let transform = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let html = r#"<html><head><base href="/media/"></head><body>
        <img src="../img/hero-1200x800.jpg" srcset="../img/hero-600x400.jpg 600w, ../img/hero.jpg 1200w">
        <img src="data:image/gif;base64,R0lGODlhAQABAAAAACw=">
        <img src="/img/logo.svg">
        <div style="background-image: url('/img/band.jpg')"></div>
        <img src="https://elsewhere.example.org/img/foreign.jpg">
    </body></html>"#;
    mount_page(&origin, "/post", html.to_string(), Some(1)).await;
    mount_images(&origin).await;
    mount_transform(&transform).await;

    let (pipeline, _store) = create_pipeline(&transform, &dir.path().join("jobs.db"), |_| {});
    let job_id = pipeline.create_job(&format!("{}/post", origin.uri())).unwrap();
    let report = pipeline.crawler().run(job_id).await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    // hero-1200x800, hero-600x400 and hero collapse onto one canonical image
    assert_eq!(report.images_discovered, 2);
    assert_eq!(report.counts.saved, 2);
}

#[tokio::test]
async fn test_resume_skips_visited_pages() {
    let origin = MockServer::start().await;
    let transform = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("jobs.db");
    let base = origin.uri();

    mount_xml(&origin, "/sitemap.xml", urlset(&base, &["/a", "/b"])).await;
    mount_page(&origin, "/a", gallery("a", 3), Some(0)).await;
    mount_page(&origin, "/b", gallery("b", 3), Some(1)).await;
    mount_images(&origin).await;
    mount_transform(&transform).await;

    // First process: visits page a, then "crashes" while running
    let job_id = {
        let (pipeline, _store) = create_pipeline(&transform, &db_path, |_| {});
        let job_id = pipeline.create_job(&format!("{}/sitemap.xml", base)).unwrap();
        let mut job = pipeline.state().load(job_id).unwrap();
        job.transition(JobStatus::Running).unwrap();
        let page_a = format!("{}/a", base);
        job.mark_visited(page_a.as_str());
        pipeline.state().mark_visited(&job, &page_a).unwrap();
        job_id
    };

    // Second process resumes from the database
    let (pipeline, _store) = create_pipeline(&transform, &db_path, |_| {});
    assert_eq!(pipeline.state().latest_unfinished().unwrap(), Some(job_id));

    let report = pipeline.crawler().run(job_id).await.unwrap();
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.pages_skipped, 1);
    assert_eq!(report.pages_visited, 1);
    assert_eq!(report.counts.saved, 3);
    assert_eq!(pipeline.state().latest_unfinished().unwrap(), None);
}

#[tokio::test]
async fn test_sitemap_index_with_relevant_filter() {
    let origin = MockServer::start().await;
    let transform = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let base = origin.uri();

    let index = format!(
        r#"<?xml version="1.0"?><sitemapindex>
            <sitemap><loc>{0}/post-sitemap.xml</loc></sitemap>
            <sitemap><loc>{0}/author-sitemap.xml</loc></sitemap>
        </sitemapindex>"#,
        base
    );
    mount_xml(&origin, "/sitemap_index.xml", index).await;
    mount_xml(&origin, "/post-sitemap.xml", urlset(&base, &["/p1", "/missing"])).await;
    Mock::given(method("GET"))
        .and(path("/author-sitemap.xml"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&origin)
        .await;
    mount_page(&origin, "/p1", gallery("p", 2), Some(1)).await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&origin)
        .await;
    mount_images(&origin).await;
    mount_transform(&transform).await;

    let (pipeline, _store) = create_pipeline(&transform, &dir.path().join("jobs.db"), |config| {
        config.crawler.relevant_sitemaps = vec!["post-sitemap.xml".to_string()];
    });
    let job_id = pipeline
        .create_job(&format!("{}/sitemap_index.xml", base))
        .unwrap();
    let report = pipeline.crawler().run(job_id).await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.pages_discovered, 2);
    assert_eq!(report.pages_visited, 1);
    assert_eq!(report.pages_failed, 1);
    assert_eq!(report.counts.saved, 2);
}

#[tokio::test]
async fn test_unreachable_sitemap_fails_job() {
    let origin = MockServer::start().await;
    let transform = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    // Initial attempt plus two retries
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&origin)
        .await;

    let (pipeline, _store) = create_pipeline(&transform, &dir.path().join("jobs.db"), |_| {});
    let job_id = pipeline
        .create_job(&format!("{}/sitemap.xml", origin.uri()))
        .unwrap();
    let report = pipeline.crawler().run(job_id).await.unwrap();

    assert_eq!(report.status, JobStatus::Failed);
    let summary = pipeline.state().summary(job_id).unwrap();
    assert_eq!(summary.status, JobStatus::Failed);
    assert!(summary.error.unwrap().contains("Sitemap unreachable"));
}

#[tokio::test]
async fn test_image_failures_do_not_fail_job() {
    let origin = MockServer::start().await;
    let transform = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let html = r#"<img src="/img/ok.jpg"><img src="/broken/missing.jpg"><img src="/img/bad-transform.jpg">"#;
    mount_page(&origin, "/", html.to_string(), None).await;
    mount_images(&origin).await;
    Mock::given(method("GET"))
        .and(path("/broken/missing.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&origin)
        .await;

    // The transform service rejects one image outright
    Mock::given(method("POST"))
        .and(path("/transform"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"avif".to_vec()))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&transform)
        .await;
    Mock::given(method("POST"))
        .and(path("/transform"))
        .respond_with(ResponseTemplate::new(422).set_body_string("unsupported"))
        .with_priority(2)
        .mount(&transform)
        .await;

    let (pipeline, _store) = create_pipeline(&transform, &dir.path().join("jobs.db"), |config| {
        config.scheduler.max_concurrent = 1;
    });
    let job_id = pipeline.create_job(&format!("{}/", origin.uri())).unwrap();
    let report = pipeline.crawler().run(job_id).await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.counts.total(), 3);
    assert_eq!(report.counts.saved, 1);
    assert_eq!(report.counts.degraded, 1);
    assert_eq!(report.counts.failed, 1);
}

#[tokio::test]
async fn test_api_start_status_and_cancel() {
    let origin = MockServer::start().await;
    let transform = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    mount_page(&origin, "/", gallery("x", 5), None).await;
    mount_images(&origin).await;
    mount_transform(&transform).await;

    let (pipeline, _store) = create_pipeline(&transform, &dir.path().join("jobs.db"), |_| {});

    let body = format!(r#"{{"rootURL": "{}/"}}"#, origin.uri());
    let started = handle(&pipeline, &ApiRequest::post("/?action=start", body)).await;
    assert_eq!(started.status, 202);
    let started: serde_json::Value = serde_json::from_slice(&started.body).unwrap();
    let job_id = started["job"].as_i64().unwrap();

    // Poll until the background run finishes
    let status_request = ApiRequest::get(&format!("/?action=status&job={}", job_id));
    let deadline = Instant::now() + Duration::from_secs(10);
    let status = loop {
        let response = handle(&pipeline, &status_request).await;
        assert_eq!(response.status, 200);
        let status: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        if status["status"] == "completed" || Instant::now() > deadline {
            break status;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    };

    assert_eq!(status["status"], "completed");
    assert_eq!(status["rootURL"], format!("{}/", origin.uri()));
    assert_eq!(status["visitedPages"], 1);
    assert_eq!(status["processedCounts"]["saved"], 5);

    let cancel = handle(
        &pipeline,
        &ApiRequest::post(&format!("/?action=cancel&job={}", job_id), ""),
    )
    .await;
    assert_eq!(cancel.status, 202);

    let missing = handle(&pipeline, &ApiRequest::get("/?action=status&job=999")).await;
    assert_eq!(missing.status, 404);

    let bad_body = handle(&pipeline, &ApiRequest::post("/?action=start", "{}")).await;
    assert_eq!(bad_body.status, 400);
}

#[tokio::test]
async fn test_cancelled_job_resumes() {
    let origin = MockServer::start().await;
    let transform = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    mount_page(&origin, "/", gallery("c", 12), None).await;
    mount_images(&origin).await;
    mount_transform(&transform).await;

    let (pipeline, _store) = create_pipeline(&transform, &dir.path().join("jobs.db"), |_| {});
    let job_id = pipeline.create_job(&format!("{}/", origin.uri())).unwrap();

    pipeline.state().request_cancel(job_id).unwrap();
    let cancelled = pipeline.crawler().run(job_id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert_eq!(cancelled.counts.total(), 0);

    let resumed = pipeline.crawler().run(job_id).await.unwrap();
    assert_eq!(resumed.status, JobStatus::Completed);
    assert_eq!(resumed.counts.saved, 12);
    assert_eq!(resumed.batches, 2);
}
