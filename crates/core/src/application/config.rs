// Engine configuration

use crate::application::worker::constants::*;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What happens to a submission when every job slot is taken
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Accept and wait for a free slot (the job stays CREATED meanwhile)
    #[default]
    Queue,
    /// Refuse with `AppError::CapacityExceeded`
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub block_size: usize,
    pub max_parallel_jobs: usize,
    pub worker_pool_size: usize,
    pub sync_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
    pub overflow_policy: OverflowPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            max_parallel_jobs: DEFAULT_MAX_PARALLEL_JOBS,
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            sync_timeout_secs: DEFAULT_SYNC_TIMEOUT.as_secs(),
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE.as_secs(),
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(AppError::Config("block_size must be at least 1".to_string()));
        }
        if self.max_parallel_jobs == 0 {
            return Err(AppError::Config(
                "max_parallel_jobs must be at least 1".to_string(),
            ));
        }
        if self.worker_pool_size == 0 || self.worker_pool_size > MAX_WORKER_POOL_SIZE {
            return Err(AppError::Config(format!(
                "worker_pool_size must be between 1 and {}",
                MAX_WORKER_POOL_SIZE
            )));
        }
        Ok(())
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
