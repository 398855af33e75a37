use super::image_ref::ImageRef;
use super::spec::TransformSpec;
use std::fmt;

/// Prefix of keys that hold untransformed origin bytes
pub const ORIGINALS_PREFIX: &str = "originals/";

/// Prefix of keys that hold transformed variants
pub const VARIANTS_PREFIX: &str = "variants/";

/// Blob store key of one (image, spec) pair
///
/// Keys are a pure function of the canonical path and the spec, so every
/// request for the same rendition lands on the same object. Equal keys mean
/// equal content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key of the original, untransformed bytes of `image`
    pub fn original(image: &ImageRef) -> Self {
        Self(format!("{}{}", ORIGINALS_PREFIX, image.canonical_path()))
    }

    /// Key of the rendition of `image` described by `spec`
    ///
    /// Layout: `variants/{format}/{width}x{height}-{fit}-q{quality}/{path}`,
    /// with `auto` standing in for an unset dimension.
    pub fn variant(image: &ImageRef, spec: &TransformSpec) -> Self {
        Self(format!(
            "{}{}/{}x{}-{}-q{}/{}",
            VARIANTS_PREFIX,
            spec.format,
            dimension(spec.width),
            dimension(spec.height),
            spec.fit,
            spec.quality,
            image.canonical_path()
        ))
    }

    /// Wraps a key read back from storage
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_original(&self) -> bool {
        self.0.starts_with(ORIGINALS_PREFIX)
    }
}

fn dimension(value: Option<u32>) -> String {
    value.map_or_else(|| "auto".to_string(), |v| v.to_string())
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
