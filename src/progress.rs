//! Progress reporting
//!
//! The crawler reports progress through the [`Progress`] trait: the total
//! number of known keys whenever it may have changed, and one step per
//! handled key. [`LogProgress`] turns those signals into periodic log lines.

use std::io::IsTerminal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Receiver of crawl progress signals
pub trait Progress: Send + Sync {
    /// Updates the number of keys processed or still pending
    fn set_total(&self, total: usize);

    /// Advances the number of handled keys
    fn advance(&self, delta: usize);
}

/// Progress reporter that logs every `every` handled keys
#[derive(Debug)]
pub struct LogProgress {
    total: AtomicUsize,
    done: AtomicUsize,
    every: usize,
    started: Instant,
}

impl LogProgress {
    pub fn new(every: usize) -> Self {
        Self {
            total: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
            every: every.max(1),
            started: Instant::now(),
        }
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    pub fn done(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new(10)
    }
}

impl Progress for LogProgress {
    fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
    }

    fn advance(&self, delta: usize) {
        let before = self.done.fetch_add(delta, Ordering::Relaxed);
        let done = before + delta;

        if done / self.every > before / self.every {
            let rate = done as f64 / self.started.elapsed().as_secs_f64().max(f64::EPSILON);
            tracing::info!(
                "Progress: {}/{} keys handled, {:.2} keys/sec",
                done,
                self.total(),
                rate
            );
        }
    }
}

/// Returns a log-based reporter when stdout is an interactive terminal
pub fn terminal_progress() -> Option<Arc<dyn Progress>> {
    if std::io::stdout().is_terminal() {
        Some(Arc::new(LogProgress::default()))
    } else {
        None
    }
}
