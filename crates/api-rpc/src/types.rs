//! RPC Request/Response Types
//!
//! Defines the JSON-RPC method parameters and results.

use reliquary_core::application::{EngineStats, JobSnapshot};
use reliquary_core::domain::{JobState, ObjectSelector, PluginType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// jobs.submit.v1 - Submit a job
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub plugin: String,
    pub source_objects: ObjectSelector,
    #[serde(default)]
    pub name: Option<String>,
    /// Defaults to the type the plugin declares; any other value is refused
    #[serde(default)]
    pub plugin_type: Option<PluginType>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub username: Option<String>,
    /// Wait up to the configured timeout for the job to end
    #[serde(default)]
    pub synchronous: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitResponse {
    pub job_id: String,
    /// `accepted`, `finished` or `timed_out`
    pub outcome: String,
    pub state: Option<JobState>,
}

/// jobs.stop.v1 - Ask a running job to stop
#[derive(Debug, Deserialize)]
pub struct StopRequest {
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopResponse {
    pub job_id: String,
    /// False when the job was not running
    pub stopping: bool,
}

/// jobs.get.v1 - Live or stored view of a job
#[derive(Debug, Deserialize)]
pub struct GetJobRequest {
    pub job_id: String,
}

pub type GetJobResponse = JobSnapshot;

/// plugins.list.v1 - Registered plugins
#[derive(Debug, Deserialize)]
pub struct ListPluginsRequest {}

#[derive(Debug, Clone, Serialize)]
pub struct PluginSummary {
    pub id: String,
    pub name: String,
    pub version: String,
    pub plugin_type: PluginType,
    pub description: String,
    pub parameters: Vec<String>,
}

/// admin.stats.v1 - Engine and store statistics
#[derive(Debug, Deserialize)]
pub struct StatsRequest {
    // No parameters needed
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub engine: EngineStats,
    pub jobs_by_state: BTreeMap<String, i64>,
    pub uptime_seconds: u64,
}
