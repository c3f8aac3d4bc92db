use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, instrument, warn};

use crate::models::Snapshot;
use crate::parser;
use crate::session::{FetchError, TimetableSource};

/// How a call to [`RefreshCoordinator::ensure_fresh`] was satisfied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The published snapshot was young enough; nothing was fetched
    Cached,
    /// A fetch (ours or one we waited on) published a new snapshot
    Fetched,
    /// The fetch failed; the previous snapshot, if any, is still published
    Failed(FetchError),
}

#[derive(Debug, Clone)]
pub struct Refresh {
    pub snapshot: Option<Arc<Snapshot>>,
    pub outcome: RefreshOutcome,
}

impl Refresh {
    pub fn failed(&self) -> bool {
        matches!(self.outcome, RefreshOutcome::Failed(_))
    }
}

/// Owns the published timetable snapshot and decides when to refetch it.
///
/// At most one fetch runs at a time. Callers that arrive while a fetch is in
/// flight wait for it and share its result instead of starting another.
pub struct RefreshCoordinator {
    source: Arc<dyn TimetableSource>,
    stale_after: Duration,
    current: RwLock<Option<Arc<Snapshot>>>,
    fetch_gate: AsyncMutex<()>,
    // Bumped after every completed fetch attempt, successful or not
    attempts: AtomicU64,
    last_error: Mutex<Option<FetchError>>,
}

impl RefreshCoordinator {
    pub fn new(source: Arc<dyn TimetableSource>, stale_after: Duration) -> Self {
        Self {
            source,
            stale_after,
            current: RwLock::new(None),
            fetch_gate: AsyncMutex::new(()),
            attempts: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    /// Currently published snapshot, without triggering a fetch
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.current.read().clone()
    }

    fn is_stale(&self) -> bool {
        match self.current.read().as_ref() {
            Some(snapshot) => snapshot.age() > self.stale_after,
            None => true,
        }
    }

    /// Return the current snapshot, fetching a new one first when forced,
    /// when none exists yet, or when the current one is older than the
    /// staleness threshold.
    #[instrument(skip(self))]
    pub async fn ensure_fresh(&self, force: bool) -> Refresh {
        let seen = self.attempts.load(Ordering::Acquire);

        if !force && !self.is_stale() {
            debug!("Snapshot is fresh, reusing");
            return Refresh {
                snapshot: self.snapshot(),
                outcome: RefreshOutcome::Cached,
            };
        }

        let _gate = self.fetch_gate.lock().await;

        if self.attempts.load(Ordering::Acquire) != seen {
            debug!("Joined a fetch that completed while waiting");
            let outcome = match self.last_error.lock().clone() {
                Some(e) => RefreshOutcome::Failed(e),
                None => RefreshOutcome::Fetched,
            };
            return Refresh {
                snapshot: self.snapshot(),
                outcome,
            };
        }

        let outcome = match self.fetch().await {
            Ok(snapshot) => {
                info!(
                    subjects = snapshot.subject_count(),
                    sections = snapshot.section_count(),
                    "Published new timetable snapshot"
                );
                *self.current.write() = Some(Arc::new(snapshot));
                *self.last_error.lock() = None;
                RefreshOutcome::Fetched
            }
            Err(e) => {
                warn!(
                    error = %e,
                    has_previous = self.current.read().is_some(),
                    "Refresh failed, keeping previous snapshot"
                );
                *self.last_error.lock() = Some(e.clone());
                RefreshOutcome::Failed(e)
            }
        };
        self.attempts.fetch_add(1, Ordering::Release);

        Refresh {
            snapshot: self.snapshot(),
            outcome,
        }
    }

    async fn fetch(&self) -> Result<Snapshot, FetchError> {
        let token = self.source.fetch_token().await?;
        debug!("Obtained view-state token");
        let payload = self.source.submit(&token).await?;
        Ok(parser::parse(&payload))
    }

    #[cfg(test)]
    pub(crate) fn publish(&self, snapshot: Snapshot) {
        *self.current.write() = Some(Arc::new(snapshot));
    }
}
