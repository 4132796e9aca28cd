// Job Store Port (Interface)

use crate::domain::{Job, JobId, JobState, JobStats};
use crate::error::Result;
use async_trait::async_trait;

/// Persistence interface for job records
///
/// The engine only reads jobs and writes state transitions and statistics;
/// long-term ownership of the records stays with the store.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Find job by ID
    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>>;

    /// Overwrite a job record
    async fn update(&self, job: &Job) -> Result<()>;

    /// Apply a lifecycle transition
    ///
    /// Re-applying the current state is a no-op. Returns `NotFound` for an
    /// unknown id and a domain error for a transition the state machine
    /// forbids.
    async fn update_state(
        &self,
        id: &JobId,
        state: JobState,
        details: Option<String>,
        at_millis: i64,
    ) -> Result<()>;

    /// Persist aggregated statistics
    async fn update_stats(&self, id: &JobId, stats: &JobStats) -> Result<()>;

    /// Find all jobs by state
    async fn find_by_state(&self, state: JobState) -> Result<Vec<Job>>;

    /// Jobs in any non-terminal state (recovery scan)
    async fn find_unfinished(&self) -> Result<Vec<Job>>;

    /// Count jobs by state
    async fn count_by_state(&self, state: JobState) -> Result<i64>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// In-memory job store, ordered by job id
    #[derive(Default)]
    pub struct InMemoryJobStore {
        jobs: Mutex<BTreeMap<JobId, Job>>,
        state_history: Mutex<Vec<(JobId, JobState)>>,
    }

    impl InMemoryJobStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_jobs(jobs: impl IntoIterator<Item = Job>) -> Self {
            let store = Self::new();
            {
                let mut map = store.jobs.lock().unwrap();
                for job in jobs {
                    map.insert(job.id.clone(), job);
                }
            }
            store
        }

        pub fn get(&self, id: &str) -> Option<Job> {
            self.jobs.lock().unwrap().get(id).cloned()
        }

        pub fn all(&self) -> Vec<Job> {
            self.jobs.lock().unwrap().values().cloned().collect()
        }

        /// Every applied transition, in order
        pub fn state_history(&self, id: &str) -> Vec<JobState> {
            self.state_history
                .lock()
                .unwrap()
                .iter()
                .filter(|(job_id, _)| job_id == id)
                .map(|(_, state)| *state)
                .collect()
        }
    }

    #[async_trait]
    impl JobStore for InMemoryJobStore {
        async fn insert(&self, job: &Job) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            if jobs.contains_key(&job.id) {
                return Err(AppError::Database(format!("duplicate job id {}", job.id)));
            }
            jobs.insert(job.id.clone(), job.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
            Ok(self.get(id))
        }

        async fn update(&self, job: &Job) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.get_mut(&job.id) {
                Some(existing) => {
                    *existing = job.clone();
                    Ok(())
                }
                None => Err(AppError::NotFound(format!("job {}", job.id))),
            }
        }

        async fn update_state(
            &self,
            id: &JobId,
            state: JobState,
            details: Option<String>,
            at_millis: i64,
        ) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("job {}", id)))?;
            if job.state == state {
                return Ok(());
            }
            job.transition(state, at_millis)?;
            if details.is_some() {
                job.state_details = details;
            }
            self.state_history.lock().unwrap().push((id.clone(), state));
            Ok(())
        }

        async fn update_stats(&self, id: &JobId, stats: &JobStats) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("job {}", id)))?;
            job.stats = stats.clone();
            Ok(())
        }

        async fn find_by_state(&self, state: JobState) -> Result<Vec<Job>> {
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .values()
                .filter(|job| job.state == state)
                .cloned()
                .collect())
        }

        async fn find_unfinished(&self) -> Result<Vec<Job>> {
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .values()
                .filter(|job| !job.state.is_final())
                .cloned()
                .collect())
        }

        async fn count_by_state(&self, state: JobState) -> Result<i64> {
            Ok(self.find_by_state(state).await?.len() as i64)
        }
    }
}
