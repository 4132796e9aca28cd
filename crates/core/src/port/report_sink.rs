// Report Sink Port - pushed job notifications

use crate::domain::{JobId, JobState, JobStats};
use crate::error::Result;
use async_trait::async_trait;

/// Receiver of job state changes and progress, e.g. the user-visible report
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn state_changed(
        &self,
        job_id: &JobId,
        state: JobState,
        details: Option<String>,
        at_millis: i64,
    ) -> Result<()>;

    async fn progress(&self, job_id: &JobId, stats: &JobStats) -> Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum SinkEvent {
        State {
            job_id: JobId,
            state: JobState,
            details: Option<String>,
        },
        Progress {
            job_id: JobId,
            stats: JobStats,
        },
    }

    /// Sink that records every notification
    #[derive(Default)]
    pub struct RecordingSink {
        events: Mutex<Vec<SinkEvent>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn events(&self) -> Vec<SinkEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn states(&self, id: &str) -> Vec<JobState> {
            self.events()
                .into_iter()
                .filter_map(|event| match event {
                    SinkEvent::State { job_id, state, .. } if job_id == id => Some(state),
                    _ => None,
                })
                .collect()
        }

        pub fn progress(&self, id: &str) -> Vec<JobStats> {
            self.events()
                .into_iter()
                .filter_map(|event| match event {
                    SinkEvent::Progress { job_id, stats } if job_id == id => Some(stats),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl ReportSink for RecordingSink {
        async fn state_changed(
            &self,
            job_id: &JobId,
            state: JobState,
            details: Option<String>,
            _at_millis: i64,
        ) -> Result<()> {
            self.events.lock().unwrap().push(SinkEvent::State {
                job_id: job_id.clone(),
                state,
                details,
            });
            Ok(())
        }

        async fn progress(&self, job_id: &JobId, stats: &JobStats) -> Result<()> {
            self.events.lock().unwrap().push(SinkEvent::Progress {
                job_id: job_id.clone(),
                stats: stats.clone(),
            });
            Ok(())
        }
    }
}
