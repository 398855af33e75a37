//! Integration tests for single-image materialization and serving
//!
//! These tests use wiremock to stand in for both the origin and the
//! transform service, and drive the pipeline through its API handlers.

use imgedge::blob::MemoryBlobStore;
use imgedge::config::{Config, FetchFailureMode, RetrySettings};
use imgedge::image::{ImageFormat, ImageRef, TransformSpec};
use imgedge::materialize::{MaterializeOutcome, Materialization};
use imgedge::origin::HttpOrigin;
use imgedge::service::api::{handle, ApiRequest};
use imgedge::service::Pipeline;
use imgedge::storage::SqliteJobStore;
use imgedge::transform::HttpTransformService;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const JPEG: &[u8] = b"\xff\xd8\xff\xe0original-jpeg";
const AVIF: &[u8] = b"avif-bytes";

fn fast_retry(max_retries: u32) -> RetrySettings {
    RetrySettings {
        max_retries,
        initial_delay_ms: 10,
        max_delay_ms: 40,
        attempt_timeout_ms: 5_000,
    }
}

/// Builds a pipeline with an in-memory store against the given mock servers
fn pipeline(
    transform: &MockServer,
    configure: impl FnOnce(&mut Config),
) -> (Pipeline, Arc<MemoryBlobStore>) {
    let mut config = Config::with_endpoint(format!("{}/transform", transform.uri()));
    config.retry.origin = fast_retry(1);
    config.retry.transform = fast_retry(3);
    configure(&mut config);

    let store = Arc::new(MemoryBlobStore::new("memory"));
    let origin = HttpOrigin::from_config(&config.origin).expect("origin client");
    let transformer = HttpTransformService::with_timeout(
        url::Url::parse(&config.transform.endpoint).expect("endpoint"),
        Duration::from_secs(5),
        None,
    )
    .expect("transform client");

    let pipeline = Pipeline::from_parts(
        config,
        "test-hash",
        store.clone(),
        Arc::new(origin),
        Arc::new(transformer),
        SqliteJobStore::in_memory().expect("job store"),
    )
    .expect("pipeline");

    (pipeline, store)
}

fn encoded(source_url: &str) -> String {
    format!(
        "/{}",
        url::form_urlencoded::byte_serialize(source_url.as_bytes()).collect::<String>()
    )
}

async fn mount_original(origin: &MockServer, image_path: &str, expected_fetches: u64) {
    Mock::given(method("GET"))
        .and(path(image_path))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(JPEG)
                .insert_header("content-type", "image/jpeg"),
        )
        .expect(expected_fetches)
        .mount(origin)
        .await;
}

#[tokio::test]
async fn test_materialize_then_cache_hit() {
    let origin = MockServer::start().await;
    let transform = MockServer::start().await;

    mount_original(&origin, "/uploads/a.jpg", 1).await;
    Mock::given(method("POST"))
        .and(path("/transform"))
        .and(query_param("format", "avif"))
        .and(query_param("width", "300"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(AVIF)
                .insert_header("content-type", "image/avif"),
        )
        .expect(1)
        .mount(&transform)
        .await;

    let (pipeline, store) = pipeline(&transform, |_| {});
    let image = ImageRef::parse(&format!("{}/uploads/a.jpg", origin.uri())).unwrap();
    let spec = TransformSpec::new(ImageFormat::Avif).with_width(300);

    let first = pipeline.materialize(image.clone(), spec.clone()).await.unwrap().unwrap();
    assert_eq!(first.outcome(), Some(MaterializeOutcome::Created));
    let after_first = store.op_counts();
    assert_eq!(after_first.put, 2, "original and variant are both stored");

    let second = pipeline.materialize(image, spec).await.unwrap().unwrap();
    let Materialization::Ready(ready) = second else {
        panic!("expected a ready image");
    };
    assert_eq!(ready.outcome, MaterializeOutcome::Cached);
    assert_eq!(&ready.bytes[..], AVIF);
    assert_eq!(ready.content_type, "image/avif");

    let after_second = store.op_counts();
    assert_eq!(after_second.put, after_first.put);
    assert_eq!(after_second.get, after_first.get + 1);
}

#[tokio::test]
async fn test_serve_negotiates_format() {
    let origin = MockServer::start().await;
    let transform = MockServer::start().await;

    mount_original(&origin, "/photo.jpg", 1).await;
    Mock::given(method("POST"))
        .and(path("/transform"))
        .and(query_param("format", "webp"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"webp-bytes".to_vec())
                .insert_header("content-type", "image/webp"),
        )
        .expect(1)
        .mount(&transform)
        .await;

    let (pipeline, _store) = pipeline(&transform, |_| {});
    let request = ApiRequest::get(&encoded(&format!("{}/photo.jpg", origin.uri())))
        .with_header("Accept", "image/webp,image/*,*/*;q=0.8");

    let response = handle(&pipeline, &request).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-type"), Some("image/webp"));
    assert_eq!(response.header("cache-control"), Some("public, max-age=31536000"));
    assert_eq!(response.header("x-imgedge-outcome"), Some("created"));
    assert_eq!(&response.body[..], b"webp-bytes");

    let again = handle(&pipeline, &request).await;
    assert_eq!(again.status, 200);
    assert_eq!(again.header("x-imgedge-outcome"), Some("cached"));
}

#[tokio::test]
async fn test_concurrent_requests_coalesce() {
    let origin = MockServer::start().await;
    let transform = MockServer::start().await;

    mount_original(&origin, "/hero.jpg", 1).await;
    Mock::given(method("POST"))
        .and(path("/transform"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(AVIF)
                .insert_header("content-type", "image/avif")
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&transform)
        .await;

    let (pipeline, store) = pipeline(&transform, |_| {});
    let pipeline = Arc::new(pipeline);
    let request = ApiRequest::get(&encoded(&format!("{}/hero.jpg", origin.uri())))
        .with_header("Accept", "image/avif,image/webp");

    let mut handles = Vec::new();
    for _ in 0..10 {
        let pipeline = pipeline.clone();
        let request = request.clone();
        handles.push(tokio::spawn(async move { handle(&pipeline, &request).await }));
    }

    for handle in handles {
        let response = handle.await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(&response.body[..], AVIF);
    }

    let variant_key = "variants/avif/autoxauto-scale-down-q80/hero.jpg";
    assert_eq!(store.puts_for(variant_key), 1);
}

#[tokio::test]
async fn test_transform_failure_degrades_to_original() {
    let origin = MockServer::start().await;
    let transform = MockServer::start().await;

    mount_original(&origin, "/b.jpg", 1).await;
    Mock::given(method("POST"))
        .and(path("/transform"))
        .respond_with(ResponseTemplate::new(503))
        .expect(4)
        .mount(&transform)
        .await;

    let (pipeline, store) = pipeline(&transform, |_| {});
    let request = ApiRequest::get(&encoded(&format!("{}/b.jpg", origin.uri())))
        .with_header("Accept", "image/avif");

    let response = handle(&pipeline, &request).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("x-imgedge-outcome"), Some("degraded"));
    assert_eq!(response.header("cache-control"), Some("no-cache"));
    assert_eq!(response.header("content-type"), Some("image/jpeg"));
    assert_eq!(&response.body[..], JPEG);

    // Only the original was stored
    assert!(store.contains("originals/b.jpg").await);
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_missing_original_is_bad_gateway() {
    let origin = MockServer::start().await;
    let transform = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gone.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&origin)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(AVIF))
        .expect(0)
        .mount(&transform)
        .await;

    let (pipeline, _store) = pipeline(&transform, |_| {});
    let source = format!("{}/gone.jpg", origin.uri());
    let response = handle(&pipeline, &ApiRequest::get(&encoded(&source))).await;
    assert_eq!(response.status, 502);

    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert!(body["error"].as_str().unwrap().contains("404"));
}

#[tokio::test]
async fn test_missing_original_can_redirect() {
    let origin = MockServer::start().await;
    let transform = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&origin)
        .await;

    let (pipeline, _store) = pipeline(&transform, |config| {
        config.serve.fetch_failure = FetchFailureMode::Redirect;
    });
    let source = format!("{}/gone.jpg", origin.uri());
    let response = handle(&pipeline, &ApiRequest::get(&encoded(&source))).await;
    assert_eq!(response.status, 302);
    assert_eq!(response.header("location"), Some(source.as_str()));
}

#[tokio::test]
async fn test_redirect_to_public_variant() {
    let origin = MockServer::start().await;
    let transform = MockServer::start().await;

    mount_original(&origin, "/c.jpg", 1).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(AVIF))
        .mount(&transform)
        .await;

    let (pipeline, _store) = pipeline(&transform, |config| {
        config.store.public_url = Some("https://cdn.example.com/img".to_string());
    });
    let request = ApiRequest::get(&format!(
        "{}?redirect=1&width=640",
        encoded(&format!("{}/c.jpg", origin.uri()))
    ))
    .with_header("Accept", "image/avif");

    let response = handle(&pipeline, &request).await;
    assert_eq!(response.status, 302);
    assert_eq!(
        response.header("location"),
        Some("https://cdn.example.com/img/variants/avif/640xauto-scale-down-q80/c.jpg")
    );
}

#[tokio::test]
async fn test_invalid_requests() {
    let transform = MockServer::start().await;
    let (pipeline, _store) = pipeline(&transform, |_| {});

    let not_a_url = handle(&pipeline, &ApiRequest::get("/not-a-url")).await;
    assert_eq!(not_a_url.status, 400);

    let svg = handle(
        &pipeline,
        &ApiRequest::get(&encoded("https://example.com/logo.svg")),
    )
    .await;
    assert_eq!(svg.status, 400);

    let bad_quality = handle(
        &pipeline,
        &ApiRequest::get(&format!("{}?quality=0", encoded("https://example.com/a.jpg"))),
    )
    .await;
    assert_eq!(bad_quality.status, 400);

    let favicon = handle(&pipeline, &ApiRequest::get("/favicon.ico")).await;
    assert_eq!(favicon.status, 404);
}
