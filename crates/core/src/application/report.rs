// Default report sink: persist notifications to the job store

use crate::domain::{JobId, JobState, JobStats};
use crate::error::Result;
use crate::port::{JobStore, ReportSink};
use async_trait::async_trait;
use std::sync::Arc;

pub struct JobStoreReportSink {
    job_store: Arc<dyn JobStore>,
}

impl JobStoreReportSink {
    pub fn new(job_store: Arc<dyn JobStore>) -> Self {
        Self { job_store }
    }
}

#[async_trait]
impl ReportSink for JobStoreReportSink {
    async fn state_changed(
        &self,
        job_id: &JobId,
        state: JobState,
        details: Option<String>,
        at_millis: i64,
    ) -> Result<()> {
        self.job_store
            .update_state(job_id, state, details, at_millis)
            .await
    }

    async fn progress(&self, job_id: &JobId, stats: &JobStats) -> Result<()> {
        self.job_store.update_stats(job_id, stats).await
    }
}
