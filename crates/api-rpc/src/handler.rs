//! RPC Method Handlers
//!
//! Implements the business logic for each JSON-RPC method.

use crate::error::to_rpc_error;
use crate::types::{
    GetJobRequest, GetJobResponse, ListPluginsRequest, PluginSummary, StatsRequest,
    StatsResponse, StopRequest, StopResponse, SubmitRequest, SubmitResponse,
};
use jsonrpsee::types::ErrorObjectOwned;
use reliquary_core::application::{OrchestrationEngine, SubmitOutcome};
use reliquary_core::domain::{Job, JobState};
use reliquary_core::error::AppError;
use reliquary_core::port::{IdProvider, JobStore, PluginError, TimeProvider};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

const ANONYMOUS_USER: &str = "anonymous";

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    engine: OrchestrationEngine,
    job_store: Arc<dyn JobStore>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    start_time: std::time::Instant,
}

impl RpcHandler {
    pub fn new(
        engine: OrchestrationEngine,
        job_store: Arc<dyn JobStore>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            engine,
            job_store,
            id_provider,
            time_provider,
            start_time: std::time::Instant::now(),
        }
    }

    /// jobs.submit.v1
    pub async fn submit(&self, params: SubmitRequest) -> Result<SubmitResponse, ErrorObjectOwned> {
        let declared = self
            .engine
            .plugins()
            .descriptor(&params.plugin)
            .map(|d| d.plugin_type)
            .ok_or_else(|| {
                to_rpc_error(AppError::Plugin(PluginError::UnknownPlugin(
                    params.plugin.clone(),
                )))
            })?;
        // A mismatching type is refused by the engine
        let plugin_type = params.plugin_type.unwrap_or(declared);

        let name = params
            .name
            .unwrap_or_else(|| format!("{} job", params.plugin));
        let mut job = Job::new(
            self.id_provider.generate_id(),
            self.time_provider.now_millis(),
            name,
            params.plugin,
            plugin_type,
            params.source_objects,
        )
        .with_username(params.username.unwrap_or_else(|| ANONYMOUS_USER.to_string()));
        job.plugin_parameters = params.parameters;

        let outcome = self
            .engine
            .submit(job, params.synchronous)
            .await
            .map_err(to_rpc_error)?;

        info!(job_id = %outcome.job_id(), "Job submitted over RPC");
        Ok(match outcome {
            SubmitOutcome::Accepted { job_id } => SubmitResponse {
                job_id,
                outcome: "accepted".to_string(),
                state: None,
            },
            SubmitOutcome::Finished { job_id, state } => SubmitResponse {
                job_id,
                outcome: "finished".to_string(),
                state: Some(state),
            },
            SubmitOutcome::TimedOut { job_id } => SubmitResponse {
                job_id,
                outcome: "timed_out".to_string(),
                state: None,
            },
        })
    }

    /// jobs.stop.v1
    pub async fn stop(&self, params: StopRequest) -> Result<StopResponse, ErrorObjectOwned> {
        let stopping = self.engine.request_stop(&params.job_id);
        if !stopping {
            // Not running: only an unknown id is an error
            self.job_store
                .find_by_id(&params.job_id)
                .await
                .map_err(to_rpc_error)?
                .ok_or_else(|| {
                    to_rpc_error(AppError::NotFound(format!("Job {} not found", params.job_id)))
                })?;
        }

        Ok(StopResponse {
            job_id: params.job_id,
            stopping,
        })
    }

    /// jobs.get.v1
    pub async fn get_job(&self, params: GetJobRequest) -> Result<GetJobResponse, ErrorObjectOwned> {
        self.engine
            .job_status(&params.job_id)
            .await
            .map_err(to_rpc_error)?
            .ok_or_else(|| to_rpc_error(AppError::NotFound(format!("Job {} not found", params.job_id))))
    }

    /// plugins.list.v1
    pub async fn list_plugins(
        &self,
        _params: ListPluginsRequest,
    ) -> Result<Vec<PluginSummary>, ErrorObjectOwned> {
        let registry = self.engine.plugins();
        Ok(registry
            .ids()
            .iter()
            .filter_map(|id| registry.descriptor(id))
            .map(|d| PluginSummary {
                id: d.id,
                name: d.name,
                version: d.version,
                plugin_type: d.plugin_type,
                description: d.description,
                parameters: d.parameters.into_iter().map(|p| p.name).collect(),
            })
            .collect())
    }

    /// admin.stats.v1
    pub async fn stats(&self, _params: StatsRequest) -> Result<StatsResponse, ErrorObjectOwned> {
        let mut jobs_by_state = BTreeMap::new();
        for state in JobState::ALL {
            let count = self
                .job_store
                .count_by_state(state)
                .await
                .map_err(to_rpc_error)?;
            jobs_by_state.insert(state.as_str().to_string(), count);
        }

        Ok(StatsResponse {
            engine: self.engine.stats(),
            jobs_by_state,
            uptime_seconds: self.start_time.elapsed().as_secs(),
        })
    }
}
