//! Configuration module for Imgedge
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use imgedge::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("imgedge.toml")).unwrap();
//! println!("Batches of {} images", config.crawler.batch_size);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    CancelMode, Config, CrawlerConfig, ExtractConfig, FetchFailureMode, OriginConfig,
    RetryConfig, RetrySettings, SchedulerConfig, ServeConfig, StoreBackend, StoreConfig,
    TransformConfig, VariantConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;
