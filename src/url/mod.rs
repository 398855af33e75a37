//! URL handling module for Imgedge
//!
//! This module provides page URL normalization, canonical image paths
//! (the identity used in cache keys) and host pattern matching.

mod canonical;
mod matcher;
mod normalize;

// Re-export main functions
pub use canonical::{canonical_path, strip_dimension_suffix};
pub use matcher::matches_wildcard;
pub use normalize::normalize_url;
