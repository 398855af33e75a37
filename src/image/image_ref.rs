use crate::url::canonical_path;
use crate::UrlError;
use serde::{Deserialize, Serialize};
use url::Url;

/// A reference to one source image on the origin
///
/// Two references with the same canonical path are the same image for
/// caching purposes, even when their source URLs differ in size suffix or
/// query string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    source_url: String,
    canonical_path: String,
}

impl ImageRef {
    /// Parses an absolute image URL
    pub fn parse(source_url: &str) -> Result<Self, UrlError> {
        let url = Url::parse(source_url.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;
        Self::from_url(&url)
    }

    pub fn from_url(url: &Url) -> Result<Self, UrlError> {
        let canonical_path = canonical_path(url)?;
        Ok(Self {
            source_url: url.to_string(),
            canonical_path,
        })
    }

    /// Rebuilds a reference from persisted parts without re-deriving the path
    pub fn from_parts(source_url: impl Into<String>, canonical_path: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            canonical_path: canonical_path.into(),
        }
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn canonical_path(&self) -> &str {
        &self.canonical_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let image = ImageRef::parse("https://example.com/uploads/a-640x480.jpg?x=1").unwrap();
        assert_eq!(image.source_url(), "https://example.com/uploads/a-640x480.jpg?x=1");
        assert_eq!(image.canonical_path(), "uploads/a.jpg");
    }

    #[test]
    fn test_parse_rejects_relative() {
        assert!(matches!(ImageRef::parse("/a.jpg"), Err(UrlError::Parse(_))));
    }
}
