use crate::backlog::{
    Backlog, BacklogError, BacklogResult, Key, SelectionStrategy, DEFAULT_RE_ADD_LIMIT,
};
use crate::policy::ErrorPolicy;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Main configuration structure for Harvester
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backlog: BacklogConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub storage: Option<StorageConfig>,
}

/// Backlog behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BacklogConfig {
    /// Order in which pending keys are handed out ("fifo" or "random")
    #[serde(default)]
    pub strategy: SelectionStrategy,

    /// Maximum number of times a single key may be re-added
    #[serde(rename = "re-add-limit", default = "default_re_add_limit")]
    pub re_add_limit: u32,

    /// Where to write the backlog snapshot when a run ends
    #[serde(rename = "persist-to", default)]
    pub persist_to: Option<PathBuf>,

    /// Restore the backlog from `persist-to` instead of starting fresh
    #[serde(default)]
    pub resume: bool,
}

impl Default for BacklogConfig {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::default(),
            re_add_limit: DEFAULT_RE_ADD_LIMIT,
            persist_to: None,
            resume: false,
        }
    }
}

impl BacklogConfig {
    /// Creates the backlog described by this configuration
    ///
    /// With `resume` set and a snapshot path configured the backlog is
    /// restored from the snapshot. A missing snapshot yields a fresh backlog
    /// with the configured strategy and re-add limit.
    pub fn open_backlog<K: Key>(&self) -> BacklogResult<Backlog<K>> {
        if let (Some(path), true) = (&self.persist_to, self.resume) {
            match Backlog::from_path(path, false) {
                Err(BacklogError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                    tracing::info!("No backlog snapshot at {}, starting fresh", path.display());
                }
                restored => return restored,
            }
        }
        Ok(Backlog::new(self.strategy, self.re_add_limit))
    }
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Maximum number of keys processed concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Reaction to unrecoverable failures ("fail", "ignore" or "fail3")
    #[serde(rename = "error-policy", default)]
    pub error_policy: ErrorPolicy,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            error_policy: ErrorPolicy::default(),
        }
    }
}

/// Record database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

fn default_re_add_limit() -> u32 {
    DEFAULT_RE_ADD_LIMIT
}

fn default_concurrency() -> usize {
    1
}
