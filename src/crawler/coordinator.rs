//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the loop that drives a backlog to empty:
//! - Dispatching keys to a bounded pool of worker tasks
//! - Collecting worker results and the first fatal error
//! - Re-checking for work enqueued by running workers
//! - Persisting the backlog and committing storage on the way out

use crate::backlog::{Backlog, Key};
use crate::config::Config;
use crate::crawler::handlers::HandlerRegistry;
use crate::crawler::processor::{FixableError, Processor};
use crate::crawler::worker::{Step, Worker};
use crate::policy::{ErrorPolicy, FailureTracker};
use crate::progress::{terminal_progress, Progress};
use crate::storage::{open_storage, SharedStorage, Storage};
use crate::HarvestError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};

/// Backoff while the pool has room but no key is pending yet
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Collects everything a [`Crawler`] needs before it starts
pub struct CrawlerBuilder<K: Key, P: Processor<K>> {
    processor: P,
    backlog: Arc<Backlog<K>>,
    storage: Option<SharedStorage<K, P::Record>>,
    handlers: HandlerRegistry,
    error_policy: ErrorPolicy,
    concurrency: usize,
    persist_backlog_to: Option<PathBuf>,
    progress: Option<Arc<dyn Progress>>,
}

impl<K: Key, P: Processor<K>> CrawlerBuilder<K, P> {
    fn new(processor: P, backlog: Arc<Backlog<K>>) -> Self {
        Self {
            processor,
            backlog,
            storage: None,
            handlers: HandlerRegistry::new(),
            error_policy: ErrorPolicy::default(),
            concurrency: 1,
            persist_backlog_to: None,
            progress: None,
        }
    }

    /// Applies the crawler and backlog sections of a loaded configuration
    pub fn from_config(mut self, config: &Config) -> Self {
        self.error_policy = config.crawler.error_policy;
        self.concurrency = config.crawler.concurrency;
        self.persist_backlog_to = config.backlog.persist_to.clone();
        self
    }

    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Sets the maximum number of keys processed at the same time
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Forwards every produced record to `storage`
    pub fn storage<S>(mut self, storage: Arc<Mutex<S>>) -> Self
    where
        S: Storage<K, P::Record> + Send + 'static,
    {
        let storage: SharedStorage<K, P::Record> = storage;
        self.storage = Some(storage);
        self
    }

    /// Registers a recovery handler for fixable errors with `error_key`
    pub fn handler<F>(mut self, error_key: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&FixableError) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers.register(error_key, handler);
        self
    }

    /// Writes a backlog snapshot to `path` when a run ends or a step fails
    pub fn persist_backlog_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.persist_backlog_to = Some(path.into());
        self
    }

    /// Reports progress to `progress` instead of the terminal default
    pub fn progress(mut self, progress: Arc<dyn Progress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn build(self) -> Crawler<K, P> {
        if self.concurrency == 0 {
            tracing::debug!("Concurrency of 0 requested, using 1");
        }

        let progress = self.progress.or_else(terminal_progress);

        Crawler {
            worker: Arc::new(Worker {
                processor: Arc::new(self.processor),
                backlog: self.backlog,
                storage: self.storage,
                handlers: self.handlers,
                failures: FailureTracker::new(self.error_policy),
                progress,
            }),
            concurrency: self.concurrency.max(1),
            persist_backlog_to: self.persist_backlog_to,
        }
    }
}

/// Drives a backlog to empty with a bounded pool of workers
pub struct Crawler<K: Key, P: Processor<K>> {
    worker: Arc<Worker<K, P>>,
    concurrency: usize,
    persist_backlog_to: Option<PathBuf>,
}

impl<K: Key, P: Processor<K>> Crawler<K, P> {
    /// Starts building a crawler for `processor` over a shared backlog
    pub fn builder(processor: P, backlog: Arc<Backlog<K>>) -> CrawlerBuilder<K, P> {
        CrawlerBuilder::new(processor, backlog)
    }

    pub fn backlog(&self) -> &Arc<Backlog<K>> {
        &self.worker.backlog
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        self.worker.failures.policy()
    }

    /// Number of unrecoverable failures since the last success
    pub fn consecutive_failures(&self) -> u32 {
        self.worker.failures.consecutive_failures()
    }

    /// Runs until the backlog is empty and no worker is in flight
    ///
    /// Whatever the outcome, storage is committed and the backlog snapshot is
    /// written if configured. An abort error takes precedence over errors
    /// raised while cleaning up.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Every key was handled
    /// * `Err(HarvestError)` - The first fatal error, after in-flight work drained
    pub async fn run(&self) -> Result<(), HarvestError> {
        let backlog = &self.worker.backlog;
        tracing::info!(
            "Starting crawl: {} pending, {} known, concurrency {}, policy {}",
            backlog.len(),
            backlog.total(),
            self.concurrency,
            self.error_policy()
        );

        let outcome = self.drive().await;
        let committed = self.commit_storage();
        let persisted = self.persist_backlog();

        match &outcome {
            Ok(()) => tracing::info!("Crawl completed: {} keys known", backlog.total()),
            Err(e) => tracing::error!("Crawl aborted: {}", e),
        }

        outcome?;
        committed?;
        persisted
    }

    /// Handles exactly one key on the calling task
    ///
    /// A fatal error is propagated after the backlog snapshot was written,
    /// if one is configured.
    pub async fn run_once(&self) -> Result<Step, HarvestError> {
        match self.worker.process_next().await {
            Ok(step) => Ok(step),
            Err(e) => {
                if let Err(persist_error) = self.persist_backlog() {
                    tracing::error!("Failed to persist backlog: {}", persist_error);
                }
                Err(e)
            }
        }
    }

    async fn drive(&self) -> Result<(), HarvestError> {
        let backlog = &self.worker.backlog;
        if let Some(progress) = &self.worker.progress {
            progress.set_total(backlog.total());
            progress.advance(backlog.total().saturating_sub(backlog.len()));
        }

        let mut workers: JoinSet<Result<Step, HarvestError>> = JoinSet::new();
        let mut failure: Option<HarvestError> = None;

        loop {
            if failure.is_none() {
                while workers.len() < self.concurrency {
                    let Ok(key) = backlog.next() else { break };
                    let worker = Arc::clone(&self.worker);
                    workers.spawn(async move { worker.handle(key).await });
                }
            }

            if workers.is_empty() {
                // nothing in flight can enqueue more work
                if failure.is_some() || backlog.is_empty() {
                    break;
                }
                continue;
            }

            let waiting_for_work = failure.is_none() && workers.len() < self.concurrency;
            tokio::select! {
                Some(joined) = workers.join_next() => absorb(joined, &mut failure),
                _ = tokio::time::sleep(POLL_INTERVAL), if waiting_for_work => {}
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn commit_storage(&self) -> Result<(), HarvestError> {
        if let Some(storage) = &self.worker.storage {
            storage
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .commit()?;
        }
        Ok(())
    }

    fn persist_backlog(&self) -> Result<(), HarvestError> {
        if let Some(path) = &self.persist_backlog_to {
            self.worker.backlog.persist_to_path(path)?;
            tracing::info!("Backlog persisted to {}", path.display());
        }
        Ok(())
    }
}

fn absorb(
    joined: Result<Result<Step, HarvestError>, JoinError>,
    failure: &mut Option<HarvestError>,
) {
    let error = match joined {
        Ok(Ok(step)) => {
            tracing::trace!("Worker finished: {:?}", step);
            return;
        }
        Ok(Err(e)) => e,
        Err(e) => HarvestError::Worker(e.to_string()),
    };

    if failure.is_none() {
        *failure = Some(error);
    } else {
        tracing::error!("Additional failure while draining workers: {}", error);
    }
}

/// Runs a crawl over `backlog` with the settings from `config`
///
/// When `config` has a `[storage]` section, records are written to the
/// SQLite database at its `database-path`.
pub async fn run_crawl<K, P>(
    processor: P,
    backlog: Arc<Backlog<K>>,
    config: &Config,
) -> Result<(), HarvestError>
where
    K: Key,
    P: Processor<K>,
    P::Record: Serialize + DeserializeOwned,
{
    let mut builder = Crawler::builder(processor, backlog).from_config(config);

    if let Some(storage) = &config.storage {
        tracing::info!("Writing records to {}", storage.database_path);
        let sink = open_storage::<K, P::Record>(Path::new(&storage.database_path))?;
        builder = builder.storage(Arc::new(Mutex::new(sink)));
    }

    builder.build().run().await
}
