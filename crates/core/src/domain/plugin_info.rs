// JobPluginInfo - per-job, per-plugin-invocation progress counters
//
// Invariant: waiting == count - success - failure. Waiting is never stored,
// so the invariant cannot be broken by a partial update.

use crate::domain::error::{DomainError, Result};
use crate::domain::job::{JobStats, PluginType};
use serde::{Deserialize, Serialize};

/// Plain counters used by every plugin type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleJobPluginInfo {
    source_objects_count: u64,
    source_objects_processed_with_success: u64,
    source_objects_processed_with_failure: u64,
}

impl SimpleJobPluginInfo {
    /// Seed with the number of objects in a block
    pub fn new(source_objects_count: u64) -> Self {
        Self {
            source_objects_count,
            ..Self::default()
        }
    }

    pub fn source_objects_count(&self) -> u64 {
        self.source_objects_count
    }

    pub fn processed_with_success(&self) -> u64 {
        self.source_objects_processed_with_success
    }

    pub fn processed_with_failure(&self) -> u64 {
        self.source_objects_processed_with_failure
    }

    pub fn processed(&self) -> u64 {
        self.source_objects_processed_with_success + self.source_objects_processed_with_failure
    }

    pub fn waiting(&self) -> u64 {
        self.source_objects_count - self.processed()
    }

    pub fn increment_success(&mut self) -> Result<()> {
        self.ensure_waiting()?;
        self.source_objects_processed_with_success += 1;
        Ok(())
    }

    pub fn increment_failure(&mut self) -> Result<()> {
        self.ensure_waiting()?;
        self.source_objects_processed_with_failure += 1;
        Ok(())
    }

    /// Count every still-waiting object as failed, returns how many were moved
    pub fn fail_remaining(&mut self) -> u64 {
        let remaining = self.waiting();
        self.source_objects_processed_with_failure += remaining;
        remaining
    }

    /// `self` as a final report laid over the last accepted `previous`
    ///
    /// Counts already reported in `previous` are kept; only the objects still
    /// waiting there take their outcome from `self`.
    pub fn settled_after(&self, previous: &SimpleJobPluginInfo) -> SimpleJobPluginInfo {
        let mut settled = previous.clone();
        settled.source_objects_count = self.source_objects_count;
        let mut open = self.source_objects_count.saturating_sub(previous.processed());

        let extra_success = self
            .source_objects_processed_with_success
            .saturating_sub(previous.source_objects_processed_with_success)
            .min(open);
        open -= extra_success;
        let extra_failure = self
            .source_objects_processed_with_failure
            .saturating_sub(previous.source_objects_processed_with_failure)
            .min(open);

        settled.source_objects_processed_with_success += extra_success;
        settled.source_objects_processed_with_failure += extra_failure;
        settled
    }

    /// Integer percentage of processed objects; zero for an empty population
    pub fn completion_percentage(&self) -> u8 {
        if self.source_objects_count == 0 {
            return 0;
        }
        ((self.processed() * 100) / self.source_objects_count) as u8
    }

    /// `self` may replace `previous` without any counter going backwards
    pub fn is_successor_of(&self, previous: &SimpleJobPluginInfo) -> bool {
        self.source_objects_count == previous.source_objects_count
            && self.source_objects_processed_with_success
                >= previous.source_objects_processed_with_success
            && self.source_objects_processed_with_failure
                >= previous.source_objects_processed_with_failure
    }

    fn absorb(&mut self, other: &SimpleJobPluginInfo) {
        self.source_objects_count += other.source_objects_count;
        self.source_objects_processed_with_success += other.source_objects_processed_with_success;
        self.source_objects_processed_with_failure += other.source_objects_processed_with_failure;
    }

    fn ensure_waiting(&self) -> Result<()> {
        if self.waiting() == 0 {
            return Err(DomainError::NothingWaiting {
                count: self.source_objects_count,
            });
        }
        Ok(())
    }
}

/// Extended counters for multi-stage ingest jobs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestJobPluginInfo {
    #[serde(flatten)]
    base: SimpleJobPluginInfo,
    total_steps: u32,
    steps_completed: u32,
    outcome_objects_count: u64,
    outcome_objects_with_manual_intervention: u64,
}

impl IngestJobPluginInfo {
    pub fn new(source_objects_count: u64) -> Self {
        Self {
            base: SimpleJobPluginInfo::new(source_objects_count),
            ..Self::default()
        }
    }

    pub fn with_total_steps(mut self, total_steps: u32) -> Self {
        self.total_steps = total_steps;
        self
    }

    pub fn total_steps(&self) -> u32 {
        self.total_steps
    }

    pub fn steps_completed(&self) -> u32 {
        self.steps_completed
    }

    pub fn outcome_objects_count(&self) -> u64 {
        self.outcome_objects_count
    }

    pub fn outcome_objects_with_manual_intervention(&self) -> u64 {
        self.outcome_objects_with_manual_intervention
    }

    pub fn increment_step_completed(&mut self) {
        if self.steps_completed < self.total_steps {
            self.steps_completed += 1;
        }
    }

    pub fn record_outcome(&mut self, manual_intervention: bool) {
        self.outcome_objects_count += 1;
        if manual_intervention {
            self.outcome_objects_with_manual_intervention += 1;
        }
    }
}

/// Polymorphic counters, variant picked from the plugin's declared type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum JobPluginInfo {
    Simple(SimpleJobPluginInfo),
    Ingest(IngestJobPluginInfo),
}

impl JobPluginInfo {
    pub fn for_plugin_type(plugin_type: PluginType, source_objects_count: u64) -> Self {
        match plugin_type {
            PluginType::Ingest => JobPluginInfo::Ingest(IngestJobPluginInfo::new(source_objects_count)),
            _ => JobPluginInfo::Simple(SimpleJobPluginInfo::new(source_objects_count)),
        }
    }

    pub fn counters(&self) -> &SimpleJobPluginInfo {
        match self {
            JobPluginInfo::Simple(info) => info,
            JobPluginInfo::Ingest(info) => &info.base,
        }
    }

    pub fn counters_mut(&mut self) -> &mut SimpleJobPluginInfo {
        match self {
            JobPluginInfo::Simple(info) => info,
            JobPluginInfo::Ingest(info) => &mut info.base,
        }
    }

    pub fn as_ingest_mut(&mut self) -> Option<&mut IngestJobPluginInfo> {
        match self {
            JobPluginInfo::Ingest(info) => Some(info),
            JobPluginInfo::Simple(_) => None,
        }
    }

    /// Counters may only move forward between two reports of the same block
    pub fn is_successor_of(&self, previous: &JobPluginInfo) -> bool {
        let counters_ok = self.counters().is_successor_of(previous.counters());
        match (self, previous) {
            (JobPluginInfo::Ingest(next), JobPluginInfo::Ingest(prev)) => {
                counters_ok
                    && next.steps_completed >= prev.steps_completed
                    && next.outcome_objects_count >= prev.outcome_objects_count
            }
            _ => counters_ok,
        }
    }

    /// Final block counters that never fall behind the accepted progress
    pub fn settled_after(&self, previous: &JobPluginInfo) -> JobPluginInfo {
        let mut settled = self.clone();
        *settled.counters_mut() = self.counters().settled_after(previous.counters());
        if let (JobPluginInfo::Ingest(next), JobPluginInfo::Ingest(prev)) = (&mut settled, previous) {
            next.steps_completed = next.steps_completed.max(prev.steps_completed);
            next.outcome_objects_count = next.outcome_objects_count.max(prev.outcome_objects_count);
            next.outcome_objects_with_manual_intervention = next
                .outcome_objects_with_manual_intervention
                .max(prev.outcome_objects_with_manual_intervention);
        }
        settled
    }

    /// Fold per-block infos into the job-level view
    ///
    /// Counts are summed. For ingest jobs the job is only as far along as its
    /// slowest block, so `steps_completed` takes the minimum.
    pub fn aggregate<'a, I>(plugin_type: PluginType, infos: I) -> JobPluginInfo
    where
        I: IntoIterator<Item = &'a JobPluginInfo>,
    {
        let mut total = JobPluginInfo::for_plugin_type(plugin_type, 0);
        let mut min_steps: Option<u32> = None;

        for info in infos {
            total.counters_mut().absorb(info.counters());
            if let (JobPluginInfo::Ingest(acc), JobPluginInfo::Ingest(block)) = (&mut total, info) {
                acc.total_steps = acc.total_steps.max(block.total_steps);
                acc.outcome_objects_count += block.outcome_objects_count;
                acc.outcome_objects_with_manual_intervention +=
                    block.outcome_objects_with_manual_intervention;
                min_steps = Some(min_steps.map_or(block.steps_completed, |m| m.min(block.steps_completed)));
            }
        }

        if let (JobPluginInfo::Ingest(acc), Some(steps)) = (&mut total, min_steps) {
            acc.steps_completed = steps;
        }
        total
    }

    pub fn to_stats(&self) -> JobStats {
        let counters = self.counters();
        let manual = match self {
            JobPluginInfo::Ingest(info) => info.outcome_objects_with_manual_intervention,
            JobPluginInfo::Simple(_) => 0,
        };
        JobStats {
            source_objects_count: counters.source_objects_count(),
            source_objects_waiting_to_be_processed: counters.waiting(),
            source_objects_processed_with_success: counters.processed_with_success(),
            source_objects_processed_with_failure: counters.processed_with_failure(),
            outcome_objects_with_manual_intervention: manual,
            completion_percentage: counters.completion_percentage(),
        }
    }
}
