//! Configuration module for Harvester
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use harvester::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvester.toml")).unwrap();
//! println!("Error policy: {}", config.crawler.error_policy);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{BacklogConfig, Config, CrawlerConfig, StorageConfig};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;
