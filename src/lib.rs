//! Harvester: a resumable, concurrent key crawler
//!
//! This crate drives a user supplied async function over a deduplicating
//! backlog of keys, forwarding produced records to a storage sink, routing
//! recoverable failures to registered handlers and applying an error policy
//! to everything else.

pub mod backlog;
pub mod config;
pub mod crawler;
pub mod policy;
pub mod progress;
pub mod storage;

use thiserror::Error;

/// Main error type for Harvester operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Backlog error: {0}")]
    Backlog(#[from] backlog::BacklogError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Aborted on key {key}: {source}")]
    Aborted {
        key: String,
        source: crawler::ProcessError,
    },

    #[error("Recovery handler for `{error_key}` failed: {source}")]
    Handler {
        error_key: String,
        source: anyhow::Error,
    },

    #[error("Worker task failed: {0}")]
    Worker(String),
}

impl HarvestError {
    /// The processor failure that aborted the crawl, if any
    pub fn process_error(&self) -> Option<&crawler::ProcessError> {
        match self {
            HarvestError::Aborted { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown selection strategy: {0}")]
    UnknownStrategy(String),

    #[error("Unknown error policy: {0}")]
    UnknownPolicy(String),
}

/// Result type alias for Harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

// Re-export commonly used types
pub use backlog::{Backlog, Key, SelectionStrategy};
pub use config::Config;
pub use crawler::{crawl, Crawler, FixableError, Output, ProcessError, Processor, Step};
pub use policy::ErrorPolicy;
pub use storage::{InMemoryStorage, SqliteStorage, Storage};
