//! The processing contract between the crawler and user code
//!
//! A [`Processor`] turns one key into an [`Output`] or fails with a
//! [`ProcessError`]. The error variant decides how the crawler routes the
//! failure:
//! - `Fixable` and `Assertion` go to a recovery handler, if one is registered
//! - `Ignore` skips the key without storing anything
//! - everything else is handed to the error policy

use crate::backlog::{BacklogError, Key};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use thiserror::Error;

/// Records produced for a single key
#[derive(Debug, Clone, PartialEq)]
pub enum Output<R> {
    /// A single record
    One(R),

    /// Any number of records, each stored separately under the same key
    Many(Vec<R>),
}

impl<R> Output<R> {
    /// Flattens the output into the records to store
    pub fn into_records(self) -> Vec<R> {
        match self {
            Self::One(record) => vec![record],
            Self::Many(records) => records,
        }
    }
}

impl<R> From<R> for Output<R> {
    fn from(record: R) -> Self {
        Self::One(record)
    }
}

impl<R> FromIterator<R> for Output<R> {
    fn from_iter<I: IntoIterator<Item = R>>(iter: I) -> Self {
        Self::Many(iter.into_iter().collect())
    }
}

/// A tagged failure that a registered handler may be able to fix
///
/// Two fixable errors are equal when their error keys are equal; the
/// attached data is ignored.
#[derive(Debug, Clone, Error)]
#[error("fixable error `{error_key}`")]
pub struct FixableError {
    error_key: String,
    data: BTreeMap<String, Value>,
}

impl FixableError {
    pub fn new(error_key: impl Into<String>) -> Self {
        Self {
            error_key: error_key.into(),
            data: BTreeMap::new(),
        }
    }

    /// Attaches a named piece of auxiliary data for the handler
    pub fn with_data(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(name.into(), value.into());
        self
    }

    pub fn error_key(&self) -> &str {
        &self.error_key
    }

    pub fn data(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }
}

impl PartialEq for FixableError {
    fn eq(&self, other: &Self) -> bool {
        self.error_key == other.error_key
    }
}

impl Eq for FixableError {}

/// Failure of a single key
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Fixable(#[from] FixableError),

    /// An assertion-style failure; treated as a fixable error keyed by its message
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// Skip this key: nothing is stored and the error policy is not engaged
    #[error("key ignored")]
    Ignore,

    #[error(transparent)]
    Backlog(#[from] BacklogError),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl ProcessError {
    /// Wraps any error as an unrecoverable failure
    pub fn failed<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Failed(anyhow::Error::new(error))
    }

    /// Returns a short stable label for logs
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Fixable(_) => "fixable",
            Self::Assertion(_) => "assertion",
            Self::Ignore => "ignore",
            Self::Backlog(_) => "backlog",
            Self::Failed(_) => "failed",
        }
    }
}

/// Result of processing one key
pub type ProcessResult<R> = Result<Output<R>, ProcessError>;

/// User code invoked once per key
///
/// Implemented automatically for async closures of the shape
/// `Fn(K) -> impl Future<Output = ProcessResult<R>>`.
#[async_trait]
pub trait Processor<K: Key>: Send + Sync + 'static {
    type Record: Send + 'static;

    async fn process(&self, key: K) -> ProcessResult<Self::Record>;
}

#[async_trait]
impl<K, F, Fut, R> Processor<K> for F
where
    K: Key,
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProcessResult<R>> + Send,
    R: Send + 'static,
{
    type Record = R;

    async fn process(&self, key: K) -> ProcessResult<R> {
        (self)(key).await
    }
}
