//! Image data model
//!
//! Formats, transform parameters, image references and the cache keys that
//! tie them together, plus client format negotiation.

mod cache_key;
mod format;
mod image_ref;
mod negotiate;
mod spec;

pub use cache_key::{CacheKey, ORIGINALS_PREFIX, VARIANTS_PREFIX};
pub use format::{content_type_for_path, Fit, ImageFormat};
pub use image_ref::ImageRef;
pub use negotiate::FormatNegotiator;
pub use spec::{SpecError, TransformSpec, DEFAULT_QUALITY};
