//! Registry of runs in flight, one per billing period and kind, and the
//! per-period locks that serialize charge writes with status changes.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::{ProcessingProgress, RunState, SourceFailureReport};

/// The kind of work being done on a billing period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunKind {
    /// Charge generation.
    Processing,
    /// Payroll export.
    Export,
}

/// Tracks which periods have a run in flight.
///
/// The store's compare-and-swap catches conflicting status writes, but a
/// retry of a Processing period does not change status, so this registry is
/// what keeps two retries from appending at the same time.
#[derive(Debug, Default)]
pub struct RunRegistry {
    active: Mutex<HashSet<(Uuid, RunKind)>>,
}

impl RunRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims a run, failing with `ConcurrentModification` if one is active.
    pub fn try_claim(self: &Arc<Self>, period_id: Uuid, kind: RunKind) -> EngineResult<RunGuard> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert((period_id, kind)) {
            return Err(EngineError::ConcurrentModification {
                period_id,
                message: format!("a {:?} run is already active", kind).to_lowercase(),
            });
        }
        Ok(RunGuard {
            registry: Arc::clone(self),
            period_id,
            kind,
        })
    }
}

/// Releases its claim when dropped.
#[derive(Debug)]
pub struct RunGuard {
    registry: Arc<RunRegistry>,
    period_id: Uuid,
    kind: RunKind,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(self.period_id, self.kind));
    }
}

/// One async lock per billing period.
///
/// The ledger holds a period's lock while it checks the period status and
/// writes a charge; the state machine holds it while it reads and swaps the
/// period. A charge write therefore never lands after the period has left
/// Draft or Processing.
#[derive(Debug, Default)]
pub struct PeriodLocks {
    locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl PeriodLocks {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for and holds the lock of one period.
    pub async fn lock(&self, period_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(period_id).or_default())
        };
        lock.lock_owned().await
    }
}

/// Latest processing progress per billing period.
#[derive(Debug, Default)]
pub struct ProgressRegistry {
    runs: RwLock<HashMap<Uuid, ProcessingProgress>>,
}

impl ProgressRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the start of a run, replacing any earlier progress.
    pub fn start(&self, period_id: Uuid, sources_total: usize) {
        let progress = ProcessingProgress::started(period_id, sources_total, Utc::now());
        self.runs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(period_id, progress);
    }

    /// Applies a change to the progress of a run, if one is recorded.
    pub fn update<F>(&self, period_id: Uuid, change: F)
    where
        F: FnOnce(&mut ProcessingProgress),
    {
        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(progress) = runs.get_mut(&period_id) {
            change(progress);
        }
    }

    /// Marks the run finished successfully.
    pub fn complete(&self, period_id: Uuid) {
        self.update(period_id, |p| {
            p.state = RunState::Completed;
            p.current_source = None;
            p.finished_at = Some(Utc::now());
        });
    }

    /// Marks the run failed on a source.
    pub fn fail(&self, period_id: Uuid, source_name: &str, cause: &str) {
        self.update(period_id, |p| {
            p.state = RunState::Failed;
            p.failure = Some(SourceFailureReport {
                source_name: source_name.to_string(),
                cause: cause.to_string(),
            });
            p.finished_at = Some(Utc::now());
        });
    }

    /// Returns the latest progress for a period.
    pub fn get(&self, period_id: Uuid) -> Option<ProcessingProgress> {
        self.runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&period_id)
            .cloned()
    }
}
