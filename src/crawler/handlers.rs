//! Recovery handlers for fixable errors

use crate::crawler::processor::FixableError;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A function that tries to fix the cause of a [`FixableError`]
///
/// Returning an error means the fix itself failed, which aborts the crawl.
pub type RecoveryHandler = Arc<dyn Fn(&FixableError) -> anyhow::Result<()> + Send + Sync>;

/// Recovery handlers looked up by error key
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, RecoveryHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous one for the same key
    pub fn register<F>(&mut self, error_key: impl Into<String>, handler: F)
    where
        F: Fn(&FixableError) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers.insert(error_key.into(), Arc::new(handler));
    }

    pub fn get(&self, error_key: &str) -> Option<&RecoveryHandler> {
        self.handlers.get(error_key)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}
