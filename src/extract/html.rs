//! HTML image extraction
//!
//! This module handles parsing HTML content to extract image URLs from:
//! - `<img src>`, `<img data-src>` (lazy loaders) and `<img srcset>`
//! - `<source srcset>` inside `<picture>`
//! - Inline `style="background-image: url(...)"`
//!
//! URLs are resolved against `<base href>` when present, otherwise against
//! the page URL.

use crate::config::ExtractConfig;
use crate::url::matches_wildcard;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Decides which discovered image URLs are worth materializing
#[derive(Debug, Clone, Default)]
pub struct ImageFilter {
    path_prefixes: Vec<String>,
    allowed_hosts: Vec<String>,
    excluded_paths: Vec<String>,
}

impl ImageFilter {
    pub fn from_config(config: &ExtractConfig) -> Self {
        Self {
            path_prefixes: config.path_prefixes.clone(),
            allowed_hosts: config.allowed_hosts.clone(),
            excluded_paths: config.excluded_paths.clone(),
        }
    }

    /// Returns true if `url`, found on a page served from `page_host`, passes
    ///
    /// # Rules
    ///
    /// - SVGs never pass (they are not transformable)
    /// - A path containing any excluded substring is rejected
    /// - With path prefixes configured, the path must start with one of them
    /// - With allowed hosts configured, the host must match one of the
    ///   patterns; otherwise it must be the page's own host
    pub fn accepts(&self, url: &Url, page_host: Option<&str>) -> bool {
        let path = url.path();
        let lower = path.to_ascii_lowercase();

        if lower.ends_with(".svg") {
            return false;
        }

        if self
            .excluded_paths
            .iter()
            .any(|excluded| lower.contains(&excluded.to_ascii_lowercase()))
        {
            return false;
        }

        if !self.path_prefixes.is_empty()
            && !self.path_prefixes.iter().any(|prefix| path.starts_with(prefix))
        {
            return false;
        }

        let Some(host) = url.host_str() else {
            return false;
        };

        if self.allowed_hosts.is_empty() {
            page_host.map_or(true, |page| page.eq_ignore_ascii_case(host))
        } else {
            self.allowed_hosts
                .iter()
                .any(|pattern| matches_wildcard(pattern, host))
        }
    }
}

/// Extracts image URLs from an HTML page
///
/// Returns absolute URLs in document order, de-duplicated, with fragments
/// removed. Data URLs, non-HTTP(S) URLs and anything `filter` rejects are
/// skipped.
///
/// # Example
///
/// ```
/// use imgedge::extract::{extract_image_urls, ImageFilter};
/// use url::Url;
///
/// let html = r#"<img src="/uploads/a.jpg"><img src="data:image/png;base64,AAAA">"#;
/// let base = Url::parse("https://example.com/post/").unwrap();
/// let urls = extract_image_urls(html, &base, &ImageFilter::default());
/// assert_eq!(urls[0].as_str(), "https://example.com/uploads/a.jpg");
/// assert_eq!(urls.len(), 1);
/// ```
pub fn extract_image_urls(html: &str, page_url: &Url, filter: &ImageFilter) -> Vec<Url> {
    let document = Html::parse_document(html);
    let base = document_base(&document, page_url);
    let page_host = page_url.host_str();

    let Ok(selector) = Selector::parse("img, source, [style]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for element in document.select(&selector) {
        for candidate in candidates(&element) {
            let Some(url) = resolve_image(&candidate, &base) else {
                continue;
            };
            if !filter.accepts(&url, page_host) {
                continue;
            }
            if seen.insert(url.as_str().to_string()) {
                urls.push(url);
            }
        }
    }

    urls
}

/// Base URL for relative references: `<base href>` resolved against the page
fn document_base(document: &Html, page_url: &Url) -> Url {
    Selector::parse("base[href]")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .and_then(|base| base.value().attr("href"))
                .and_then(|href| page_url.join(href.trim()).ok())
        })
        .unwrap_or_else(|| page_url.clone())
}

/// Raw URL references carried by one element, in attribute order
fn candidates(element: &ElementRef<'_>) -> Vec<String> {
    let value = element.value();
    let mut found = Vec::new();

    match value.name() {
        "img" => {
            found.extend(value.attr("src").map(str::to_string));
            found.extend(value.attr("data-src").map(str::to_string));
            if let Some(srcset) = value.attr("srcset") {
                found.extend(parse_srcset(srcset));
            }
        }
        "source" => {
            if let Some(srcset) = value.attr("srcset") {
                found.extend(parse_srcset(srcset));
            }
        }
        _ => {}
    }

    if let Some(style) = value.attr("style") {
        found.extend(background_image_urls(style));
    }

    found
}

/// URLs of a `srcset` attribute, descriptors dropped
fn parse_srcset(srcset: &str) -> Vec<String> {
    srcset
        .split(',')
        .filter_map(|entry| entry.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// `url(...)` values of `background-image` / `background` declarations
fn background_image_urls(style: &str) -> Vec<String> {
    let mut urls = Vec::new();

    for declaration in style.split(';') {
        let Some((property, value)) = declaration.split_once(':') else {
            continue;
        };
        let property = property.trim().to_ascii_lowercase();
        if property != "background-image" && property != "background" {
            continue;
        }

        let mut rest = value;
        while let Some(open) = rest.to_ascii_lowercase().find("url(") {
            let after = &rest[open + 4..];
            let Some(close) = after.find(')') else {
                break;
            };
            let raw = after[..close].trim().trim_matches(|c| c == '"' || c == '\'');
            if !raw.is_empty() {
                urls.push(raw.to_string());
            }
            rest = &after[close + 1..];
        }
    }

    urls
}

/// Resolves a reference to an absolute HTTP(S) URL
///
/// Returns None for empty references, `data:`/`blob:` URLs and anything
/// that does not resolve to HTTP(S).
fn resolve_image(reference: &str, base: &Url) -> Option<Url> {
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }

    let lower = reference.to_ascii_lowercase();
    if lower.starts_with("data:") || lower.starts_with("blob:") {
        return None;
    }

    let mut url = base.join(reference).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}
