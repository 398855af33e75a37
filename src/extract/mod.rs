//! Image and page discovery
//!
//! This module handles the two discovery steps of a crawl:
//! - Extracting image URLs from HTML (`<img>`, `srcset`, `<source>`, inline
//!   `background-image`)
//! - Reading page URLs out of sitemaps and sitemap indexes

mod html;
mod sitemap;

pub use html::{extract_image_urls, ImageFilter};
pub use sitemap::{parse_sitemap, Sitemap};
