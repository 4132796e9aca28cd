// Internal plugins shipped with the engine

use crate::application::plugin_registry::PluginRegistry;
use crate::domain::{JobPluginInfo, JobState, ObjectClass, ObjectRef, PluginType, Report, ReportItem};
use crate::port::{JobStore, Plugin, PluginContext, PluginError, TimeProvider};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

pub const CLEAN_UNFINISHED_JOBS_PLUGIN_ID: &str = "internal.clean-unfinished-jobs";

const CLEANED_DETAILS: &str = "Job was left unfinished by a previous process and has been cleaned up";

/// Moves TO_BE_CLEANED jobs to COMPLETED
///
/// Jobs in any other state are left untouched and reported as failures.
pub struct CleanUnfinishedJobsPlugin {
    job_store: Arc<dyn JobStore>,
    time_provider: Arc<dyn TimeProvider>,
    info: Option<JobPluginInfo>,
}

impl CleanUnfinishedJobsPlugin {
    pub fn new(job_store: Arc<dyn JobStore>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            job_store,
            time_provider,
            info: None,
        }
    }

    async fn clean(&self, object: &ObjectRef) -> ReportItem {
        if object.class != ObjectClass::Job {
            return ReportItem::failure(object.id.clone(), format!("{} is not a job", object.id));
        }

        let job = match self.job_store.find_by_id(&object.id).await {
            Ok(Some(job)) => job,
            Ok(None) => return ReportItem::failure(object.id.clone(), "job not found"),
            Err(e) => return ReportItem::failure(object.id.clone(), e.to_string()),
        };
        if job.state != JobState::ToBeCleaned {
            return ReportItem::failure(
                object.id.clone(),
                format!("job is {}, not {}", job.state, JobState::ToBeCleaned),
            );
        }

        let now = self.time_provider.now_millis();
        match self
            .job_store
            .update_state(&job.id, JobState::Completed, Some(CLEANED_DETAILS.to_string()), now)
            .await
        {
            Ok(()) => {
                debug!(cleaned_job_id = %job.id, "Cleaned unfinished job");
                ReportItem::success(object.id.clone())
            }
            Err(e) => ReportItem::failure(object.id.clone(), e.to_string()),
        }
    }
}

#[async_trait]
impl Plugin for CleanUnfinishedJobsPlugin {
    fn name(&self) -> &str {
        "Clean unfinished jobs"
    }

    fn description(&self) -> &str {
        "Completes jobs that were left unfinished by a previous process"
    }

    fn version(&self) -> &str {
        "1.0"
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::Internal
    }

    fn inject_job_plugin_info(&mut self, info: JobPluginInfo) {
        self.info = Some(info);
    }

    async fn execute(&mut self, ctx: &PluginContext, objects: &[ObjectRef]) -> Result<Report, PluginError> {
        let mut report = Report::new();
        for object in objects {
            let item = self.clean(object).await;
            if let Some(info) = self.info.as_mut() {
                let counters = info.counters_mut();
                let _ = if item.state.is_failure() {
                    counters.increment_failure()
                } else {
                    counters.increment_success()
                };
                ctx.progress.report(info.clone());
            }
            report.push(item);
        }
        info!(job_id = %ctx.job_id, cleaned = objects.len(), "Cleanup block done");
        Ok(report)
    }
}

/// Register the plugins every engine needs
pub fn register_internal_plugins(
    registry: &mut PluginRegistry,
    job_store: Arc<dyn JobStore>,
    time_provider: Arc<dyn TimeProvider>,
) {
    registry.register(CLEAN_UNFINISHED_JOBS_PLUGIN_ID, move || {
        Box::new(CleanUnfinishedJobsPlugin::new(
            job_store.clone(),
            time_provider.clone(),
        ))
    });
}
