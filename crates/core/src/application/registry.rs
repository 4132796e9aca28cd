// Job tracking pools: running / stopping / in-error
//
// The three pools and the id -> tracker map live behind one mutex so a
// membership change is always observed atomically. The lock is never held
// across an await.

use crate::application::tracker::{Registration, TrackerHandle};
use crate::domain::JobId;
use crate::error::{AppError, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Verdict of the pre-dispatch check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchGuard {
    Proceed,
    Stopping,
    InError,
    /// Not (or no longer) registered
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolCounts {
    pub running: usize,
    pub stopping: usize,
    pub in_error: usize,
}

#[derive(Default)]
struct Pools {
    running: HashMap<JobId, TrackerHandle>,
    stopping: HashSet<JobId>,
    in_error: HashSet<JobId>,
}

#[derive(Default)]
pub struct JobPools {
    inner: Mutex<Pools>,
}

impl JobPools {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Pools> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a job to the running pool
    pub fn register(&self, job_id: JobId, handle: TrackerHandle) -> Result<()> {
        let mut pools = self.lock();
        if pools.running.contains_key(&job_id) {
            return Err(AppError::AlreadyStarted(job_id));
        }
        pools.running.insert(job_id, handle);
        Ok(())
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.lock().running.contains_key(job_id)
    }

    pub fn handle(&self, job_id: &str) -> Option<TrackerHandle> {
        self.lock().running.get(job_id).cloned()
    }

    /// Returns false for an unknown id
    pub fn mark_stopping(&self, job_id: &str) -> bool {
        let mut pools = self.lock();
        if !pools.running.contains_key(job_id) {
            return false;
        }
        pools.stopping.insert(job_id.to_string());
        true
    }

    /// Returns false for an unknown id
    pub fn mark_in_error(&self, job_id: &str) -> bool {
        let mut pools = self.lock();
        if !pools.running.contains_key(job_id) {
            return false;
        }
        pools.in_error.insert(job_id.to_string());
        true
    }

    /// Dispatch check for one registration; stopping wins over in-error
    pub fn guard(&self, job_id: &str, registration: Registration) -> DispatchGuard {
        let pools = self.lock();
        match pools.running.get(job_id) {
            Some(handle) if handle.registration() == registration => {}
            _ => return DispatchGuard::Unknown,
        }
        if pools.stopping.contains(job_id) {
            DispatchGuard::Stopping
        } else if pools.in_error.contains(job_id) {
            DispatchGuard::InError
        } else {
            DispatchGuard::Proceed
        }
    }

    /// Remove from every pool if `registration` is still the one running
    ///
    /// Repeated calls, and calls from a tracker whose id was registered again
    /// since, are no-ops.
    pub fn deregister(&self, job_id: &str, registration: Registration) -> bool {
        let mut pools = self.lock();
        match pools.running.get(job_id) {
            Some(handle) if handle.registration() == registration => {}
            _ => return false,
        }
        pools.running.remove(job_id);
        pools.stopping.remove(job_id);
        pools.in_error.remove(job_id);
        true
    }

    pub fn counts(&self) -> PoolCounts {
        let pools = self.lock();
        PoolCounts {
            running: pools.running.len(),
            stopping: pools.stopping.len(),
            in_error: pools.in_error.len(),
        }
    }

    pub fn running_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<_> = self.lock().running.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn handles(&self) -> Vec<TrackerHandle> {
        self.lock().running.values().cloned().collect()
    }
}
