// Crash recovery: sweep jobs left unfinished by a previous process
use crate::application::engine::OrchestrationEngine;
use crate::application::internal::CLEAN_UNFINISHED_JOBS_PLUGIN_ID;
use crate::domain::{Job, JobId, JobState, ObjectClass, ObjectSelector, PluginType};
use crate::error::Result;
use crate::port::{IdProvider, JobStore, TimeProvider};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

pub const CLEANUP_JOB_NAME: &str = "Clean unfinished jobs during startup";
pub const CLEANUP_JOB_USERNAME: &str = "admin";

const SWEPT_DETAILS: &str = "Job was left unfinished when the previous process stopped";

/// What a recovery pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryOutcome {
    /// Jobs moved to TO_BE_CLEANED, in store order
    pub swept: Vec<JobId>,
    /// The single cleanup job, absent when nothing needed cleaning
    pub cleanup_job_id: Option<JobId>,
}

/// Startup recovery service
///
/// On startup, finds every job in a non-terminal state, marks it
/// TO_BE_CLEANED, and submits one internal cleanup job targeting exactly
/// those ids.
pub struct RecoveryManager {
    job_store: Arc<dyn JobStore>,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
}

impl RecoveryManager {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
    ) -> Self {
        Self {
            job_store,
            time_provider,
            id_provider,
        }
    }

    /// Mark unfinished jobs TO_BE_CLEANED, skipping the ids in `live`
    ///
    /// Jobs that cannot be transitioned are logged and left out.
    pub async fn sweep(&self, live: &HashSet<JobId>) -> Result<Vec<JobId>> {
        let unfinished = self.job_store.find_unfinished().await?;
        let now = self.time_provider.now_millis();
        let mut swept = Vec::with_capacity(unfinished.len());

        for job in unfinished {
            if live.contains(&job.id) {
                continue;
            }
            match self
                .job_store
                .update_state(&job.id, JobState::ToBeCleaned, Some(SWEPT_DETAILS.to_string()), now)
                .await
            {
                Ok(()) => {
                    info!(job_id = %job.id, previous_state = %job.state, "Marked job for cleanup");
                    swept.push(job.id);
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Could not mark job for cleanup");
                }
            }
        }
        Ok(swept)
    }

    /// The internal job that completes the swept jobs
    pub fn cleanup_job(&self, ids: Vec<JobId>) -> Job {
        Job::new(
            self.id_provider.generate_id(),
            self.time_provider.now_millis(),
            CLEANUP_JOB_NAME,
            CLEAN_UNFINISHED_JOBS_PLUGIN_ID,
            PluginType::Internal,
            ObjectSelector::list(ObjectClass::Job, ids),
        )
        .with_username(CLEANUP_JOB_USERNAME)
    }

    /// Sweep and submit the cleanup job on `engine`
    pub async fn recover(&self, engine: &OrchestrationEngine) -> Result<RecoveryOutcome> {
        let live: HashSet<JobId> = engine.running_job_ids().into_iter().collect();
        let swept = self.sweep(&live).await?;
        if swept.is_empty() {
            info!("No unfinished jobs to recover");
            return Ok(RecoveryOutcome::default());
        }

        let cleanup = self.cleanup_job(swept.clone());
        let cleanup_job_id = cleanup.id.clone();
        engine.submit(cleanup, false).await?;

        info!(
            swept = swept.len(),
            cleanup_job_id = %cleanup_job_id,
            "Submitted cleanup job for unfinished jobs"
        );
        Ok(RecoveryOutcome {
            swept,
            cleanup_job_id: Some(cleanup_job_id),
        })
    }
}
