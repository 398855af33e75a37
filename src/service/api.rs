//! Exposed HTTP adapters
//!
//! Framework-agnostic handlers: an embedding server turns its requests into
//! [`ApiRequest`] and writes back the [`ApiResponse`]. Routes:
//!
//! | Request | Handler |
//! |---------|---------|
//! | `POST ?action=start` with `{"rootURL": ...}` | [`start`] |
//! | `GET ?action=status&job=<id>` | [`status`] |
//! | `POST ?action=cancel&job=<id>` | [`cancel`] |
//! | `GET /<encoded-source-url>` | [`serve_image`] |

use super::Pipeline;
use crate::config::FetchFailureMode;
use crate::image::{Fit, FormatNegotiator, ImageRef, TransformSpec};
use crate::materialize::{MaterializeOutcome, Materialization};
use crate::PipelineError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// A request as seen by the handlers
#[derive(Debug, Clone, Default)]
pub struct ApiRequest {
    pub method: String,
    /// Path without the query string
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl ApiRequest {
    pub fn get(path_and_query: &str) -> Self {
        Self::new("GET", path_and_query)
    }

    pub fn post(path_and_query: &str, body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..Self::new("POST", path_and_query)
        }
    }

    fn new(method: &str, path_and_query: &str) -> Self {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (path_and_query.to_string(), None),
        };
        Self {
            method: method.to_string(),
            path,
            query,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// First header named `name`, case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// First query parameter named `name`, decoded
    pub fn query_param(&self, name: &str) -> Option<String> {
        query_param(self.query.as_deref().unwrap_or_default(), name)
    }
}

/// A response ready to be written by the embedding server
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl ApiResponse {
    fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    fn json(status: u16, value: &impl Serialize) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self::new(status)
                .with_header("Content-Type", "application/json")
                .with_body(body),
            Err(e) => Self::error(500, &format!("Failed to encode response: {}", e)),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        let body = json!({ "error": message }).to_string();
        Self::new(status)
            .with_header("Content-Type", "application/json")
            .with_body(body)
    }

    fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// First header named `name`, case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Routes a request to its handler
pub async fn handle(pipeline: &Pipeline, request: &ApiRequest) -> ApiResponse {
    let action = request.query_param("action");

    match (request.method.as_str(), action.as_deref()) {
        ("POST", Some("start")) => start(pipeline, &request.body),
        ("GET", Some("status")) => status(pipeline, request.query.as_deref().unwrap_or_default()),
        ("POST", Some("cancel")) => cancel(pipeline, request.query.as_deref().unwrap_or_default()),
        (_, Some(other)) => ApiResponse::error(400, &format!("Unknown action: {}", other)),
        ("GET", None) if request.path == "/favicon.ico" => ApiResponse::new(404),
        ("GET", None) => {
            serve_image(
                pipeline,
                &request.path,
                request.query.as_deref().unwrap_or_default(),
                request.header("accept"),
                request.header("user-agent"),
            )
            .await
        }
        _ => ApiResponse::error(405, "Method not allowed"),
    }
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    #[serde(rename = "rootURL", alias = "rootUrl")]
    root_url: String,
}

/// Starts a crawl job in the background
///
/// Answers `202 {"job": id}` immediately; 400 on a malformed body or root
/// URL.
pub fn start(pipeline: &Pipeline, body: &[u8]) -> ApiResponse {
    let request: StartRequest = match serde_json::from_slice(body) {
        Ok(request) => request,
        Err(e) => return ApiResponse::error(400, &format!("Invalid request body: {}", e)),
    };

    match pipeline.start_job(&request.root_url) {
        Ok((job_id, _handle)) => ApiResponse::json(202, &json!({ "job": job_id })),
        Err(e @ PipelineError::UrlError(_)) => ApiResponse::error(400, &e.to_string()),
        Err(e) => {
            tracing::error!(root_url = %request.root_url, error = %e, "Failed to start job");
            ApiResponse::error(500, &e.to_string())
        }
    }
}

/// Reports a job's summary
pub fn status(pipeline: &Pipeline, query: &str) -> ApiResponse {
    let job_id = match job_param(query) {
        Ok(job_id) => job_id,
        Err(response) => return response,
    };

    match pipeline.state().summary(job_id) {
        Ok(summary) => ApiResponse::json(200, &summary),
        Err(e @ PipelineError::JobNotFound(_)) => ApiResponse::error(404, &e.to_string()),
        Err(e) => ApiResponse::error(500, &e.to_string()),
    }
}

/// Requests cancellation; the crawler stops at its next check
pub fn cancel(pipeline: &Pipeline, query: &str) -> ApiResponse {
    let job_id = match job_param(query) {
        Ok(job_id) => job_id,
        Err(response) => return response,
    };

    match pipeline.state().request_cancel(job_id) {
        Ok(()) => ApiResponse::json(202, &json!({ "job": job_id, "cancelRequested": true })),
        Err(e @ PipelineError::JobNotFound(_)) => ApiResponse::error(404, &e.to_string()),
        Err(e) => ApiResponse::error(500, &e.to_string()),
    }
}

/// Serves the best variant of an image for the requesting client
///
/// `path` is `/` followed by the percent-encoded source URL. Optional query
/// parameters `width`, `height`, `fit` and `quality` refine the spec;
/// `redirect=1` answers with a redirect to the stored variant instead of
/// its bytes when the store has a public URL.
///
/// | Outcome | Response |
/// |---------|----------|
/// | Variant ready | 200 with the bytes, long-lived `Cache-Control` |
/// | Transform failed | 200 with the original bytes, `no-cache` |
/// | Original unavailable | 502, or 302 to the source (`fetch-failure = "redirect"`) |
/// | Malformed URL or parameters | 400 |
pub async fn serve_image(
    pipeline: &Pipeline,
    path: &str,
    query: &str,
    accept: Option<&str>,
    user_agent: Option<&str>,
) -> ApiResponse {
    let source = decode_source(path);
    let image = match ImageRef::parse(&source) {
        Ok(image) => image,
        Err(e) => return ApiResponse::error(400, &e.to_string()),
    };

    let format = FormatNegotiator::negotiate_request(accept, user_agent);
    let spec = match spec_from_query(pipeline.config().transform.spec_for(format), query) {
        Ok(spec) => spec,
        Err(message) => return ApiResponse::error(400, &message),
    };
    let wants_redirect = matches!(query_param(query, "redirect").as_deref(), Some("1" | "true"));

    tracing::debug!(source_url = %source, format = %format, "Serving image");

    let result = match pipeline.materialize(image, spec).await {
        Ok(result) => result,
        Err(e) => return ApiResponse::error(503, &e.to_string()),
    };

    match result {
        Ok(Materialization::Ready(image)) => {
            let serve = &pipeline.config().serve;
            let degraded = image.outcome == MaterializeOutcome::Degraded;
            let stored = !degraded && image.outcome != MaterializeOutcome::Unstored;

            if wants_redirect && stored {
                if let Some(location) = pipeline.materializer().public_url(&image.key) {
                    return redirect(location.as_str());
                }
            }

            let cache_control = if degraded {
                "no-cache"
            } else {
                serve.cache_control.as_str()
            };

            ApiResponse::new(200)
                .with_header("Content-Type", &image.content_type)
                .with_header("Cache-Control", cache_control)
                .with_header("Vary", "Accept")
                .with_header("X-Imgedge-Outcome", image.outcome.as_str())
                .with_body(image.bytes.clone())
        }
        Ok(Materialization::Fallback { source_url, cause }) => {
            tracing::warn!(source_url = %source_url, error = %cause, "Original unavailable");
            match pipeline.config().serve.fetch_failure {
                FetchFailureMode::BadGateway => ApiResponse::error(502, &cause.to_string()),
                FetchFailureMode::Redirect => redirect(&source_url),
            }
        }
        Err(e) => {
            tracing::error!(source_url = %source, error = %e, "Materialization failed");
            ApiResponse::error(500, &e.to_string())
        }
    }
}

fn redirect(location: &str) -> ApiResponse {
    ApiResponse::new(302).with_header("Location", location)
}

fn query_param(query: &str, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn job_param(query: &str) -> Result<i64, ApiResponse> {
    let raw = query_param(query, "job")
        .ok_or_else(|| ApiResponse::error(400, "Missing job parameter"))?;
    raw.parse()
        .map_err(|_| ApiResponse::error(400, &format!("Invalid job id: {}", raw)))
}

/// Applies `width`, `height`, `fit` and `quality` query parameters
fn spec_from_query(mut spec: TransformSpec, query: &str) -> Result<TransformSpec, String> {
    let number = |name: &str| -> Result<Option<u32>, String> {
        query_param(query, name)
            .map(|v| v.parse::<u32>().map_err(|_| format!("Invalid {}: {}", name, v)))
            .transpose()
    };

    if let Some(width) = number("width")? {
        spec = spec.with_width(width);
    }
    if let Some(height) = number("height")? {
        spec = spec.with_height(height);
    }
    if let Some(quality) = number("quality")? {
        let quality = u8::try_from(quality).map_err(|_| format!("Invalid quality: {}", quality))?;
        spec = spec.with_quality(quality);
    }
    if let Some(fit) = query_param(query, "fit") {
        spec = spec.with_fit(Fit::from_name(&fit).ok_or_else(|| format!("Invalid fit: {}", fit))?);
    }

    spec.validate().map_err(|e| e.to_string())?;
    Ok(spec)
}

/// Source URL carried in a serve path; invalid escapes are kept verbatim
fn decode_source(path: &str) -> String {
    let raw = path.trim_start_matches('/');
    String::from_utf8_lossy(&urlencoding::decode_binary(raw.as_bytes())).into_owned()
}
