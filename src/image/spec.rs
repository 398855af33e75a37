use super::format::{Fit, ImageFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Quality used when none is configured
pub const DEFAULT_QUALITY: u8 = 80;

/// Parameters of one derived rendition of an image
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransformSpec {
    pub format: ImageFormat,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fit: Fit,
    pub quality: u8,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("quality must be between 1 and 100, got {0}")]
    Quality(u8),

    #[error("{0} must be greater than zero")]
    ZeroDimension(&'static str),
}

impl TransformSpec {
    /// A full-size rendition in `format` with default fit and quality
    pub fn new(format: ImageFormat) -> Self {
        Self {
            format,
            width: None,
            height: None,
            fit: Fit::default(),
            quality: DEFAULT_QUALITY,
        }
    }

    pub fn with_width(mut self, width: u32) -> Self {
        self.width = Some(width);
        self
    }

    pub fn with_height(mut self, height: u32) -> Self {
        self.height = Some(height);
        self
    }

    pub fn with_fit(mut self, fit: Fit) -> Self {
        self.fit = fit;
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        if !(1..=100).contains(&self.quality) {
            return Err(SpecError::Quality(self.quality));
        }
        if self.width == Some(0) {
            return Err(SpecError::ZeroDimension("width"));
        }
        if self.height == Some(0) {
            return Err(SpecError::ZeroDimension("height"));
        }
        Ok(())
    }

    /// Query parameters understood by the transform service
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("format", self.format.to_string())];
        if let Some(width) = self.width {
            pairs.push(("width", width.to_string()));
        }
        if let Some(height) = self.height {
            pairs.push(("height", height.to_string()));
        }
        pairs.push(("fit", self.fit.to_string()));
        pairs.push(("quality", self.quality.to_string()));
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let spec = TransformSpec::new(ImageFormat::Avif);
        assert_eq!(spec.quality, DEFAULT_QUALITY);
        assert_eq!(spec.fit, Fit::ScaleDown);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_invalid_quality() {
        let spec = TransformSpec::new(ImageFormat::Webp).with_quality(0);
        assert_eq!(spec.validate(), Err(SpecError::Quality(0)));
        let spec = TransformSpec::new(ImageFormat::Webp).with_quality(101);
        assert_eq!(spec.validate(), Err(SpecError::Quality(101)));
    }

    #[test]
    fn test_zero_width_rejected() {
        let spec = TransformSpec::new(ImageFormat::Jpeg).with_width(0);
        assert_eq!(spec.validate(), Err(SpecError::ZeroDimension("width")));
    }

    #[test]
    fn test_query_pairs_skip_missing_dimensions() {
        let spec = TransformSpec::new(ImageFormat::Avif).with_width(300);
        let pairs = spec.query_pairs();
        assert_eq!(
            pairs,
            vec![
                ("format", "avif".to_string()),
                ("width", "300".to_string()),
                ("fit", "scale-down".to_string()),
                ("quality", "80".to_string()),
            ]
        );
    }
}
