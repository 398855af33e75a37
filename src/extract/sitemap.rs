//! Sitemap parsing
//!
//! Only `<loc>` values matter to the crawler, so the document is scanned for
//! them directly instead of being parsed as a tree. Sitemaps in the wild
//! are often not well-formed XML.

use std::collections::HashSet;

/// URLs listed by a sitemap document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sitemap {
    /// A `<sitemapindex>`: each entry is another sitemap
    Index(Vec<String>),
    /// A `<urlset>`: each entry is a page
    UrlSet(Vec<String>),
}

/// Parses a sitemap or sitemap index
///
/// Entries keep document order; duplicates and empty `<loc>` values are
/// dropped. `CDATA` wrappers and the five predefined XML entities are
/// decoded.
///
/// # Example
///
/// ```
/// use imgedge::extract::{parse_sitemap, Sitemap};
///
/// let xml = "<urlset><url><loc>https://example.com/a</loc></url></urlset>";
/// assert_eq!(
///     parse_sitemap(xml),
///     Sitemap::UrlSet(vec!["https://example.com/a".to_string()])
/// );
/// ```
pub fn parse_sitemap(xml: &str) -> Sitemap {
    let urls = extract_loc_values(xml);
    if xml.contains("<sitemapindex") {
        Sitemap::Index(urls)
    } else {
        Sitemap::UrlSet(urls)
    }
}

fn extract_loc_values(xml: &str) -> Vec<String> {
    let mut values: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut start = 0;

    while let Some(open_idx) = xml[start..].find("<loc>") {
        let open = start + open_idx + "<loc>".len();
        let Some(close_rel) = xml[open..].find("</loc>") else {
            break;
        };
        let close = open + close_rel;
        start = close + "</loc>".len();

        let value = decode_entities(strip_cdata(xml[open..close].trim()));
        if !value.is_empty() && seen.insert(value.clone()) {
            values.push(value);
        }
    }

    values
}

fn strip_cdata(value: &str) -> &str {
    value
        .strip_prefix("<![CDATA[")
        .and_then(|v| v.strip_suffix("]]>"))
        .map(str::trim)
        .unwrap_or(value)
}

fn decode_entities(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urlset() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://example.com/</loc><lastmod>2024-01-01</lastmod></url>
  <url><loc>
    https://example.com/about
  </loc></url>
</urlset>"#;

        assert_eq!(
            parse_sitemap(xml),
            Sitemap::UrlSet(vec![
                "https://example.com/".to_string(),
                "https://example.com/about".to_string(),
            ])
        );
    }

    #[test]
    fn test_index() {
        let xml = r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>https://example.com/post-sitemap.xml</loc></sitemap>
  <sitemap><loc>https://example.com/page-sitemap.xml</loc></sitemap>
</sitemapindex>"#;

        assert_eq!(
            parse_sitemap(xml),
            Sitemap::Index(vec![
                "https://example.com/post-sitemap.xml".to_string(),
                "https://example.com/page-sitemap.xml".to_string(),
            ])
        );
    }

    #[test]
    fn test_entities_cdata_and_duplicates() {
        let xml = "<urlset>\
            <url><loc>https://example.com/?a=1&amp;b=2</loc></url>\
            <url><loc><![CDATA[https://example.com/c]]></loc></url>\
            <url><loc>https://example.com/c</loc></url>\
            <url><loc>  </loc></url>\
        </urlset>";

        assert_eq!(
            parse_sitemap(xml),
            Sitemap::UrlSet(vec![
                "https://example.com/?a=1&b=2".to_string(),
                "https://example.com/c".to_string(),
            ])
        );
    }

    #[test]
    fn test_unterminated_loc() {
        let xml = "<urlset><url><loc>https://example.com/a</loc><loc>https://exa";
        assert_eq!(
            parse_sitemap(xml),
            Sitemap::UrlSet(vec!["https://example.com/a".to_string()])
        );
    }

    #[test]
    fn test_large_sitemap_dedupes() {
        let entries: String = (0..20_000)
            .map(|i| format!("<url><loc>https://example.com/p{}</loc></url>", i % 10_000))
            .collect();
        let xml = format!("<urlset>{}</urlset>", entries);

        let Sitemap::UrlSet(urls) = parse_sitemap(&xml) else {
            panic!("expected a urlset");
        };
        assert_eq!(urls.len(), 10_000);
        assert_eq!(urls[0], "https://example.com/p0");
        assert_eq!(urls[9_999], "https://example.com/p9999");
    }
}
