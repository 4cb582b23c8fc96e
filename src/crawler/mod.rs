//! Crawler module for scheduling and processing keys
//!
//! This module contains the core crawling logic, including:
//! - The processor contract and the failure taxonomy
//! - Recovery handlers for fixable errors
//! - Per-key execution and result routing
//! - Overall crawl coordination across a bounded worker pool

mod coordinator;
mod handlers;
mod processor;
mod worker;

pub use coordinator::{run_crawl, Crawler, CrawlerBuilder, POLL_INTERVAL};
pub use handlers::{HandlerRegistry, RecoveryHandler};
pub use processor::{FixableError, Output, ProcessError, ProcessResult, Processor};
pub use worker::Step;

use crate::backlog::{Backlog, Key};
use crate::config::Config;
use crate::HarvestError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Runs a complete crawl operation
///
/// This is the main entry point for processing a backlog. It will:
/// 1. Build a crawler from the configuration
/// 2. Dispatch keys to workers until the backlog is drained
/// 3. Route results to the configured SQLite database, if any
/// 4. Persist the backlog snapshot if configured
///
/// # Arguments
///
/// * `processor` - The function applied to every key
/// * `backlog` - The shared backlog; the processor may add keys to it
/// * `config` - The crawl configuration
///
/// # Returns
///
/// * `Ok(())` - Crawl completed successfully
/// * `Err(HarvestError)` - Crawl aborted
pub async fn crawl<K, P>(
    processor: P,
    backlog: Arc<Backlog<K>>,
    config: &Config,
) -> Result<(), HarvestError>
where
    K: Key,
    P: Processor<K>,
    P::Record: Serialize + DeserializeOwned,
{
    run_crawl(processor, backlog, config).await
}
