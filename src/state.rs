//! Application state management.

use crate::job::{CancelToken, CatalogJob, RunSummary};
use crate::store::CatalogStore;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Catalog store.
    pub store: Arc<dyn CatalogStore>,
    /// Catalog job; absent when the server only serves reads.
    pub job: Option<Arc<CatalogJob>>,
    /// Set while a run executes.
    pub running: Arc<AtomicBool>,
    /// Cancellation handle of the current run.
    pub cancel: Arc<RwLock<CancelToken>>,
    /// Most recent finished run.
    pub last_run: Arc<RwLock<Option<RunSummary>>>,
}

impl AppState {
    /// Creates a read-only state over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self {
            store,
            job: None,
            running: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(RwLock::new(CancelToken::new())),
            last_run: Arc::new(RwLock::new(None)),
        }
    }

    /// Creates a state that can also trigger runs.
    #[must_use]
    pub fn with_job(store: Arc<dyn CatalogStore>, job: CatalogJob) -> Self {
        Self {
            job: Some(Arc::new(job)),
            ..Self::new(store)
        }
    }

    /// Marks a run as started. Returns a guard holding a fresh cancel token,
    /// or `None` if a run is already executing.
    ///
    /// The running flag stays set until the guard is finished or dropped, so
    /// a run task that panics still releases it.
    #[must_use]
    pub fn try_begin_run(&self) -> Option<RunGuard> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }
        let token = CancelToken::new();
        *self.cancel.write() = token.clone();
        Some(RunGuard {
            running: Arc::clone(&self.running),
            last_run: Arc::clone(&self.last_run),
            token,
        })
    }

    /// Whether a run is executing.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Requests cancellation of the current run, if any.
    pub fn cancel_run(&self) -> bool {
        if self.is_running() {
            self.cancel.read().cancel();
            true
        } else {
            false
        }
    }
}

/// Exclusive claim on the run slot.
#[must_use = "dropping the guard ends the run"]
pub struct RunGuard {
    running: Arc<AtomicBool>,
    last_run: Arc<RwLock<Option<RunSummary>>>,
    token: CancelToken,
}

impl RunGuard {
    /// Cancel token of this run.
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Records the run's summary, if it produced one, and releases the slot.
    pub fn finish(self, summary: Option<RunSummary>) {
        if let Some(summary) = summary {
            *self.last_run.write() = Some(summary);
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
