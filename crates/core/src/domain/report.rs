// Plugin execution report

use serde::{Deserialize, Serialize};

/// Per-object outcome reported by a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PluginState {
    Success,
    PartialSuccess,
    Failure,
    Skipped,
}

impl PluginState {
    /// Whether the object counts as processed with failure
    pub fn is_failure(self) -> bool {
        self == PluginState::Failure
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportItem {
    pub source_object_id: String,
    pub outcome_object_id: Option<String>,
    pub state: PluginState,
    pub details: Option<String>,
    #[serde(default)]
    pub manual_intervention: bool,
}

impl ReportItem {
    pub fn success(source_object_id: impl Into<String>) -> Self {
        Self {
            source_object_id: source_object_id.into(),
            outcome_object_id: None,
            state: PluginState::Success,
            details: None,
            manual_intervention: false,
        }
    }

    pub fn failure(source_object_id: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            source_object_id: source_object_id.into(),
            outcome_object_id: None,
            state: PluginState::Failure,
            details: Some(details.into()),
            manual_intervention: false,
        }
    }

    pub fn with_outcome(mut self, outcome_object_id: impl Into<String>) -> Self {
        self.outcome_object_id = Some(outcome_object_id.into());
        self
    }

    pub fn needing_manual_intervention(mut self) -> Self {
        self.manual_intervention = true;
        self
    }
}

/// What `Plugin::execute` returns for one block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub items: Vec<ReportItem>,
    pub details: Option<String>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: ReportItem) {
        self.items.push(item);
    }

    pub fn item_for(&self, source_object_id: &str) -> Option<&ReportItem> {
        self.items
            .iter()
            .find(|item| item.source_object_id == source_object_id)
    }
}
