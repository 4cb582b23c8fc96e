//! Per-key execution
//!
//! A [`Worker`] holds everything needed to handle one key: the processor,
//! the shared backlog, the storage sink, the recovery handlers and the
//! failure tracker. It is shared between all in-flight tasks of a crawl.

use crate::backlog::{Backlog, BacklogError, Key};
use crate::crawler::handlers::HandlerRegistry;
use crate::crawler::processor::{FixableError, Output, ProcessError, Processor};
use crate::policy::{FailureTracker, Verdict};
use crate::progress::Progress;
use crate::storage::SharedStorage;
use crate::HarvestError;
use std::any::Any;
use std::sync::{Arc, PoisonError};

/// What happened to a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The backlog was empty, nothing was processed
    Idle,

    /// The key was processed and its records forwarded to storage
    Stored { records: usize },

    /// The processor asked to skip the key
    Skipped,

    /// A recovery handler ran and the key is pending again
    Requeued,

    /// The key failed and the error policy chose to continue
    Tolerated,
}

pub(crate) struct Worker<K: Key, P: Processor<K>> {
    pub(crate) processor: Arc<P>,
    pub(crate) backlog: Arc<Backlog<K>>,
    pub(crate) storage: Option<SharedStorage<K, P::Record>>,
    pub(crate) handlers: HandlerRegistry,
    pub(crate) failures: FailureTracker,
    pub(crate) progress: Option<Arc<dyn Progress>>,
}

impl<K: Key, P: Processor<K>> Worker<K, P> {
    /// Pulls the next key from the backlog and handles it
    pub(crate) async fn process_next(&self) -> Result<Step, HarvestError> {
        match self.backlog.next() {
            Ok(key) => self.handle(key).await,
            Err(BacklogError::Empty) => Ok(Step::Idle),
            Err(e) => Err(e.into()),
        }
    }

    /// Handles a key that was already taken from the backlog
    pub(crate) async fn handle(&self, key: K) -> Result<Step, HarvestError> {
        let step = self.process_key(key).await;

        if let Some(progress) = &self.progress {
            progress.set_total(self.backlog.total());
            progress.advance(1);
        }

        step
    }

    async fn process_key(&self, key: K) -> Result<Step, HarvestError> {
        tracing::debug!("Processing key {:?}", key);

        match self.invoke(key.clone()).await {
            Ok(output) => {
                self.failures.record_success();
                let records = self.store(&key, output)?;
                Ok(Step::Stored { records })
            }
            Err(ProcessError::Ignore) => {
                tracing::debug!("Ignoring key {:?}", key);
                Ok(Step::Skipped)
            }
            Err(ProcessError::Fixable(error)) => self.recover(key, error),
            Err(ProcessError::Assertion(message)) => self.recover(key, FixableError::new(message)),
            Err(error) => self.escalate(&key, error),
        }
    }

    /// Runs the processor in its own task so a panic is caught as an assertion failure
    async fn invoke(&self, key: K) -> Result<Output<P::Record>, ProcessError> {
        let processor = Arc::clone(&self.processor);

        match tokio::spawn(async move { processor.process(key).await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(ProcessError::Assertion(panic_message(e.into_panic()))),
            Err(e) => Err(ProcessError::Failed(anyhow::anyhow!("processor task failed: {e}"))),
        }
    }

    fn store(&self, key: &K, output: Output<P::Record>) -> Result<usize, HarvestError> {
        let records = output.into_records();
        let count = records.len();

        if let Some(storage) = &self.storage {
            let mut storage = storage.lock().unwrap_or_else(PoisonError::into_inner);
            for record in records {
                storage.save(key.clone(), record)?;
            }
        }

        Ok(count)
    }

    fn recover(&self, key: K, error: FixableError) -> Result<Step, HarvestError> {
        let Some(handler) = self.handlers.get(error.error_key()) else {
            return self.escalate(&key, ProcessError::Fixable(error));
        };

        tracing::warn!("Key {:?} raised {}, running recovery handler", key, error);
        handler(&error).map_err(|source| HarvestError::Handler {
            error_key: error.error_key().to_string(),
            source,
        })?;

        match self.backlog.re_add(key.clone()) {
            Ok(()) => Ok(Step::Requeued),
            Err(e) => self.escalate(&key, ProcessError::Backlog(e)),
        }
    }

    fn escalate(&self, key: &K, error: ProcessError) -> Result<Step, HarvestError> {
        tracing::error!(
            "Encountered unfixable {} error with key {:?}: {}",
            error.as_label(),
            key,
            error
        );

        match self.failures.record_failure() {
            Verdict::Continue => Ok(Step::Tolerated),
            Verdict::Abort => Err(HarvestError::Aborted {
                key: format!("{:?}", key),
                source: error,
            }),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "processor panicked".to_string()
    }
}
