use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use tracing::{info, warn};

use crate::{Query, RegistrySearch, Result};

/// Logging decorator around any [`RegistrySearch`].
///
/// Logs each query and its outcome and keeps success/failure counters.
#[derive(Debug)]
pub struct SearchLogger<S> {
    inner: S,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl<S> SearchLogger<S> {
    pub const fn new(inner: S) -> Self {
        Self {
            inner,
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    pub const fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: RegistrySearch> RegistrySearch for SearchLogger<S> {
    fn search(&self, query: &Query) -> Result<Vec<String>> {
        let started = Instant::now();
        match self.inner.search(query) {
            Ok(rows) => {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
                info!(
                    %query,
                    rows = rows.len(),
                    elapsed = ?started.elapsed(),
                    "Registry query succeeded"
                );
                Ok(rows)
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(%query, error = %e, status = e.status(), "Registry query failed");
                Err(e)
            }
        }
    }
}
