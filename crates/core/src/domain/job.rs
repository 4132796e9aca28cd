// Job Domain Model

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Job ID (UUID v4 in production)
pub type JobId = String;

/// Plugin identifier, the key of the plugin registry
pub type PluginId = String;

/// Job lifecycle state
///
/// `CREATED → RUNNING → {STOPPING → STOPPED | FAILED_TO_COMPLETE | COMPLETED}`,
/// with `TO_BE_CLEANED → COMPLETED` for jobs swept after a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Created,
    Running,
    Stopping,
    Stopped,
    FailedToComplete,
    Completed,
    ToBeCleaned,
}

impl JobState {
    pub const ALL: [JobState; 7] = [
        JobState::Created,
        JobState::Running,
        JobState::Stopping,
        JobState::Stopped,
        JobState::FailedToComplete,
        JobState::Completed,
        JobState::ToBeCleaned,
    ];

    /// Terminal states never transition again
    pub fn is_final(self) -> bool {
        matches!(
            self,
            JobState::Stopped | JobState::FailedToComplete | JobState::Completed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Created => "CREATED",
            JobState::Running => "RUNNING",
            JobState::Stopping => "STOPPING",
            JobState::Stopped => "STOPPED",
            JobState::FailedToComplete => "FAILED_TO_COMPLETE",
            JobState::Completed => "COMPLETED",
            JobState::ToBeCleaned => "TO_BE_CLEANED",
        }
    }

    /// States from which `self` may be entered
    pub fn allowed_from(self) -> &'static [JobState] {
        match self {
            JobState::Created => &[],
            JobState::Running => &[JobState::Created],
            JobState::Stopping => &[JobState::Created, JobState::Running],
            JobState::Stopped | JobState::FailedToComplete => {
                &[JobState::Created, JobState::Running, JobState::Stopping]
            }
            JobState::Completed => &[JobState::Running, JobState::ToBeCleaned],
            JobState::ToBeCleaned => &[JobState::Created, JobState::Running, JobState::Stopping],
        }
    }

    pub fn can_transition_to(self, to: JobState) -> bool {
        self == to || to.allowed_from().contains(&self)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        JobState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| DomainError::UnknownState(s.to_string()))
    }
}

/// Declared plugin type, selects the JobPluginInfo variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PluginType {
    /// Runs once, no object population
    SingleShot,
    /// Object-population driven
    Misc,
    /// Population-to-population transform
    AipToAip,
    /// Multi-stage ingest, tracks extended counters
    Ingest,
    /// System jobs (cleanup and friends)
    Internal,
}

impl PluginType {
    pub fn as_str(self) -> &'static str {
        match self {
            PluginType::SingleShot => "SINGLE_SHOT",
            PluginType::Misc => "MISC",
            PluginType::AipToAip => "AIP_TO_AIP",
            PluginType::Ingest => "INGEST",
            PluginType::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for PluginType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SINGLE_SHOT" => Ok(PluginType::SingleShot),
            "MISC" => Ok(PluginType::Misc),
            "AIP_TO_AIP" => Ok(PluginType::AipToAip),
            "INGEST" => Ok(PluginType::Ingest),
            "INTERNAL" => Ok(PluginType::Internal),
            other => Err(DomainError::UnknownPluginType(other.to_string())),
        }
    }
}

/// Class of repository object a job targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectClass {
    Aip,
    Representation,
    File,
    Job,
}

impl ObjectClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectClass::Aip => "AIP",
            ObjectClass::Representation => "REPRESENTATION",
            ObjectClass::File => "FILE",
            ObjectClass::Job => "JOB",
        }
    }
}

impl std::fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectClass {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "AIP" => Ok(ObjectClass::Aip),
            "REPRESENTATION" => Ok(ObjectClass::Representation),
            "FILE" => Ok(ObjectClass::File),
            "JOB" => Ok(ObjectClass::Job),
            other => Err(DomainError::UnknownObjectClass(other.to_string())),
        }
    }
}

/// Single equality condition of a saved filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterParameter {
    pub field: String,
    pub value: String,
}

/// Saved filter: conjunction of equality conditions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub parameters: Vec<FilterParameter>,
}

impl Filter {
    /// Matches everything
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push(FilterParameter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Evaluate against an object whose fields are resolved by `lookup`
    pub fn matches<F>(&self, lookup: F) -> bool
    where
        F: Fn(&str) -> Option<String>,
    {
        self.parameters
            .iter()
            .all(|p| lookup(&p.field).as_deref() == Some(p.value.as_str()))
    }
}

/// What population of objects a job runs over
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectSelector {
    /// Single-shot jobs target nothing
    None,
    /// Explicit identifier list
    List { class: ObjectClass, ids: Vec<String> },
    /// Filtered search over the index
    Filter { class: ObjectClass, filter: Filter },
    /// Every object of a class, streamed from the model store
    All { class: ObjectClass },
}

impl ObjectSelector {
    pub fn list(class: ObjectClass, ids: Vec<String>) -> Self {
        ObjectSelector::List { class, ids }
    }

    pub fn class(&self) -> Option<ObjectClass> {
        match self {
            ObjectSelector::None => None,
            ObjectSelector::List { class, .. }
            | ObjectSelector::Filter { class, .. }
            | ObjectSelector::All { class } => Some(*class),
        }
    }
}

/// User-visible job statistics, derived from the aggregated JobPluginInfo
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub source_objects_count: u64,
    pub source_objects_waiting_to_be_processed: u64,
    pub source_objects_processed_with_success: u64,
    pub source_objects_processed_with_failure: u64,
    pub outcome_objects_with_manual_intervention: u64,
    pub completion_percentage: u8,
}

/// Job Entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub plugin: PluginId,
    pub plugin_type: PluginType,
    #[serde(default)]
    pub plugin_parameters: BTreeMap<String, String>,
    pub username: String,
    pub source_objects: ObjectSelector,

    pub state: JobState,
    pub state_details: Option<String>,

    pub created_at: i64, // epoch ms
    pub started_at: Option<i64>,
    pub ended_at: Option<i64>,

    #[serde(default)]
    pub stats: JobStats,
}

impl Job {
    /// Create a new job in the CREATED state
    ///
    /// `id` and `created_at` are injected (IdProvider / TimeProvider), never
    /// generated here.
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        name: impl Into<String>,
        plugin: impl Into<String>,
        plugin_type: PluginType,
        source_objects: ObjectSelector,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            plugin: plugin.into(),
            plugin_type,
            plugin_parameters: BTreeMap::new(),
            username: String::new(),
            source_objects,
            state: JobState::Created,
            state_details: None,
            created_at,
            started_at: None,
            ended_at: None,
            stats: JobStats::default(),
        }
    }

    /// Create a test job with deterministic ID and timestamp (tests only).
    ///
    /// IDs follow `test-1, test-2, ...`; timestamps step by 1000.
    pub fn new_test(plugin: impl Into<String>, source_objects: ObjectSelector) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let id = format!("test-{}", counter);
        let created_at = (counter * 1000) as i64;

        Self::new(
            id.clone(),
            created_at,
            format!("job {}", id),
            plugin,
            PluginType::Misc,
            source_objects,
        )
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn with_plugin_type(mut self, plugin_type: PluginType) -> Self {
        self.plugin_type = plugin_type;
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.plugin_parameters.insert(key.into(), value.into());
        self
    }

    /// Apply a state transition with explicit timestamp.
    ///
    /// Re-entering the current state is a no-op. Entering RUNNING stamps
    /// `started_at`; entering a terminal state stamps `ended_at`.
    pub fn transition(&mut self, to: JobState, now_millis: i64) -> Result<()> {
        if self.state == to {
            return Ok(());
        }
        if !self.state.can_transition_to(to) {
            return Err(DomainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }

        self.state = to;
        if to == JobState::Running && self.started_at.is_none() {
            self.started_at = Some(now_millis);
        }
        if to.is_final() {
            self.ended_at = Some(now_millis);
        }
        Ok(())
    }

    pub fn is_final(&self) -> bool {
        self.state.is_final()
    }
}
