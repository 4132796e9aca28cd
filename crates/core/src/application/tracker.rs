// JobTracker - the sequential state holder for one job
//
// Every message for a job goes through its own unbounded mailbox and is
// applied by a single task, so counter updates are never interleaved.

use crate::application::registry::JobPools;
use crate::domain::{
    BlockIndex, Job, JobId, JobPluginInfo, JobState, JobStats, PluginType,
};
use crate::port::{Plugin, PluginContext, ProgressReporter, ReportSink, TimeProvider};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Identity of one tracker, distinct across resubmissions of the same job id
pub type Registration = u64;

static NEXT_REGISTRATION: AtomicU64 = AtomicU64::new(1);

/// Answer to the "begin" signal of a dispatch loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartDecision {
    Proceed,
    Stopping,
    InError,
    /// RUNNING could not be persisted, nothing may be dispatched
    Failed(String),
}

pub enum TrackerMessage {
    Start {
        resp: oneshot::Sender<StartDecision>,
    },
    AttachJobPlugin {
        plugin: Box<dyn Plugin>,
        ctx: PluginContext,
    },
    BlockDispatched {
        block: BlockIndex,
        count: u64,
    },
    ProgressUpdated {
        block: BlockIndex,
        info: JobPluginInfo,
    },
    BlockFinished {
        block: BlockIndex,
        info: JobPluginInfo,
        error: Option<String>,
    },
    /// No more blocks will be dispatched
    InitEnded,
    Stop,
    MarkedInError,
    /// Engine-level failure, the job ends as FAILED_TO_COMPLETE
    Fail {
        reason: String,
    },
    StateReported {
        state: JobState,
        details: Option<String>,
    },
    Note {
        detail: String,
    },
    AfterAllFinished {
        error: Option<String>,
    },
    Snapshot {
        resp: oneshot::Sender<JobSnapshot>,
    },
}

/// Point-in-time view of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub state: JobState,
    pub stopping: bool,
    pub in_error: bool,
    pub init_ended: bool,
    pub blocks_dispatched: usize,
    pub blocks_finished: usize,
    pub stats: JobStats,
    pub details: Option<String>,
}

impl JobSnapshot {
    /// Snapshot of a job that has no live tracker
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            state: job.state,
            stopping: job.state == JobState::Stopping,
            in_error: false,
            init_ended: job.state.is_final(),
            blocks_dispatched: 0,
            blocks_finished: 0,
            stats: job.stats.clone(),
            details: job.state_details.clone(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.blocks_dispatched - self.blocks_finished
    }
}

/// Cloneable address of a running tracker
#[derive(Clone)]
pub struct TrackerHandle {
    job_id: JobId,
    registration: Registration,
    tx: mpsc::UnboundedSender<TrackerMessage>,
    state_rx: watch::Receiver<JobState>,
}

impl TrackerHandle {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn registration(&self) -> Registration {
        self.registration
    }

    /// Deliver a message; false once the tracker is gone
    pub fn send(&self, message: TrackerMessage) -> bool {
        self.tx.send(message).is_ok()
    }

    pub fn state(&self) -> JobState {
        *self.state_rx.borrow()
    }

    /// Resolve once the job reaches a terminal state (or the tracker exits)
    pub async fn wait_terminal(&self) -> JobState {
        let mut rx = self.state_rx.clone();
        loop {
            let state = *rx.borrow_and_update();
            if state.is_final() {
                return state;
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }

    pub async fn snapshot(&self) -> Option<JobSnapshot> {
        let (resp, rx) = oneshot::channel();
        if !self.send(TrackerMessage::Snapshot { resp }) {
            return None;
        }
        rx.await.ok()
    }

    /// Progress reporter bound to one block
    pub fn block_progress(&self, block: BlockIndex) -> Arc<dyn ProgressReporter> {
        Arc::new(BlockProgress {
            tx: self.tx.clone(),
            block,
        })
    }
}

struct BlockProgress {
    tx: mpsc::UnboundedSender<TrackerMessage>,
    block: BlockIndex,
}

impl ProgressReporter for BlockProgress {
    fn report(&self, info: JobPluginInfo) {
        let _ = self.tx.send(TrackerMessage::ProgressUpdated {
            block: self.block,
            info,
        });
    }
}

pub struct JobTracker {
    job_id: JobId,
    registration: Registration,
    plugin_type: PluginType,
    state: JobState,
    stopping: bool,
    in_error: bool,
    init_ended: bool,
    finalized: bool,
    blocks: BTreeMap<BlockIndex, JobPluginInfo>,
    blocks_dispatched: usize,
    blocks_finished: usize,
    job_plugin: Option<(Box<dyn Plugin>, PluginContext)>,
    after_all_running: bool,
    notes: Vec<String>,

    sink: Arc<dyn ReportSink>,
    pools: Arc<JobPools>,
    time_provider: Arc<dyn TimeProvider>,
    state_tx: watch::Sender<JobState>,
    self_tx: mpsc::WeakUnboundedSender<TrackerMessage>,
    rx: mpsc::UnboundedReceiver<TrackerMessage>,
}

impl JobTracker {
    /// Build a tracker and its handle without starting it
    pub fn new(
        job: &Job,
        sink: Arc<dyn ReportSink>,
        pools: Arc<JobPools>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> (Self, TrackerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(job.state);
        let registration = NEXT_REGISTRATION.fetch_add(1, Ordering::Relaxed);

        let tracker = Self {
            job_id: job.id.clone(),
            registration,
            plugin_type: job.plugin_type,
            state: job.state,
            stopping: false,
            in_error: false,
            init_ended: false,
            finalized: false,
            blocks: BTreeMap::new(),
            blocks_dispatched: 0,
            blocks_finished: 0,
            job_plugin: None,
            after_all_running: false,
            notes: Vec::new(),
            sink,
            pools,
            time_provider,
            state_tx,
            self_tx: tx.downgrade(),
            rx,
        };
        let handle = TrackerHandle {
            job_id: job.id.clone(),
            registration,
            tx,
            state_rx,
        };
        (tracker, handle)
    }

    /// Apply messages until every handle is dropped
    pub async fn run(mut self) {
        debug!(job_id = %self.job_id, "Tracker started");
        while let Some(message) = self.rx.recv().await {
            self.handle(message).await;
        }
        debug!(job_id = %self.job_id, state = %self.state, "Tracker stopped");
    }

    async fn handle(&mut self, message: TrackerMessage) {
        match message {
            TrackerMessage::Snapshot { resp } => {
                let _ = resp.send(self.snapshot());
            }
            _ if self.finalized => self.handle_after_final(message),
            TrackerMessage::Start { resp } => {
                let decision = self.start().await;
                let _ = resp.send(decision);
            }
            TrackerMessage::AttachJobPlugin { plugin, ctx } => {
                self.job_plugin = Some((plugin, ctx));
            }
            TrackerMessage::BlockDispatched { block, count } => {
                self.blocks
                    .insert(block, JobPluginInfo::for_plugin_type(self.plugin_type, count));
                self.blocks_dispatched += 1;
                self.push_progress().await;
            }
            TrackerMessage::ProgressUpdated { block, info } => self.progress_updated(block, info).await,
            TrackerMessage::BlockFinished { block, info, error } => {
                self.block_finished(block, info, error).await;
            }
            TrackerMessage::InitEnded => {
                self.init_ended = true;
                self.check_completion().await;
            }
            TrackerMessage::Stop => self.stop().await,
            TrackerMessage::MarkedInError => {
                self.in_error = true;
            }
            TrackerMessage::Fail { reason } => {
                error!(job_id = %self.job_id, reason = %reason, "Job failed in orchestration");
                self.in_error = true;
                self.notes.push(reason);
                self.finalize(JobState::FailedToComplete).await;
            }
            TrackerMessage::StateReported { state, details } => {
                if let Some(detail) = details {
                    self.notes.push(detail);
                }
                if state.is_final() {
                    // e.g. COMPLETED for a job still queued behind a job slot
                    let end_state = if self.state.can_transition_to(state) {
                        state
                    } else {
                        warn!(
                            job_id = %self.job_id,
                            from = %self.state,
                            reported = %state,
                            "Reported state not reachable, stopping instead"
                        );
                        JobState::Stopped
                    };
                    self.finalize(end_state).await;
                } else if state == JobState::Stopping {
                    self.stop().await;
                } else {
                    debug!(job_id = %self.job_id, state = %state, "Ignoring reported non-terminal state");
                }
            }
            TrackerMessage::Note { detail } => self.notes.push(detail),
            TrackerMessage::AfterAllFinished { error } => {
                self.after_all_running = false;
                if let Some(err) = error {
                    self.notes.push(format!("after all hook failed: {}", err));
                }
                self.finalize(self.drained_state()).await;
            }
        }
    }

    fn handle_after_final(&mut self, message: TrackerMessage) {
        match message {
            TrackerMessage::Start { resp } => {
                let _ = resp.send(StartDecision::Stopping);
            }
            TrackerMessage::AttachJobPlugin { mut plugin, .. } => {
                // Job ended before the hook returned, only release the instance
                tokio::spawn(async move { plugin.shutdown().await });
            }
            TrackerMessage::BlockFinished { block, .. } => {
                debug!(job_id = %self.job_id, block, "Block finished after job end");
            }
            _ => {}
        }
    }

    async fn start(&mut self) -> StartDecision {
        if self.stopping {
            return StartDecision::Stopping;
        }
        if self.in_error {
            return StartDecision::InError;
        }

        let now = self.time_provider.now_millis();
        if let Err(e) = self
            .sink
            .state_changed(&self.job_id, JobState::Running, None, now)
            .await
        {
            return StartDecision::Failed(e.to_string());
        }
        self.set_state(JobState::Running);
        info!(job_id = %self.job_id, "Job running");
        StartDecision::Proceed
    }

    async fn progress_updated(&mut self, block: BlockIndex, info: JobPluginInfo) {
        match self.blocks.get(&block) {
            Some(current) if info.is_successor_of(current) => {
                self.blocks.insert(block, info);
                self.push_progress().await;
            }
            Some(_) => {
                debug!(job_id = %self.job_id, block, "Discarding stale progress report");
            }
            None => {
                warn!(job_id = %self.job_id, block, "Progress report for unknown block");
            }
        }
    }

    async fn block_finished(&mut self, block: BlockIndex, info: JobPluginInfo, error: Option<String>) {
        let Some(current) = self.blocks.get(&block) else {
            warn!(job_id = %self.job_id, block, "Finish report for unknown block");
            return;
        };
        if current.counters().source_objects_count() != info.counters().source_objects_count() {
            warn!(job_id = %self.job_id, block, "Finish report does not match block size");
        }

        let info = if info.is_successor_of(current) {
            info
        } else {
            debug!(job_id = %self.job_id, block, "Finish report behind accepted progress, keeping reported counts");
            info.settled_after(current)
        };

        debug!(
            job_id = %self.job_id,
            block,
            success = info.counters().processed_with_success(),
            failure = info.counters().processed_with_failure(),
            "Block finished"
        );
        self.blocks.insert(block, info);
        self.blocks_finished += 1;
        if let Some(err) = error {
            self.notes.push(format!("block {}: {}", block, err));
        }
        self.push_progress().await;
        self.check_completion().await;
    }

    async fn stop(&mut self) {
        if self.stopping {
            return;
        }
        self.stopping = true;

        // Nothing was dispatched yet, no block can drain
        if self.state == JobState::Created {
            info!(job_id = %self.job_id, "Job stopped before start");
            self.finalize(JobState::Stopped).await;
            return;
        }

        let now = self.time_provider.now_millis();
        if let Err(e) = self
            .sink
            .state_changed(&self.job_id, JobState::Stopping, None, now)
            .await
        {
            warn!(job_id = %self.job_id, error = %e, "Failed to report STOPPING");
        }
        self.set_state(JobState::Stopping);
        info!(job_id = %self.job_id, in_flight = self.in_flight(), "Job stopping");
        self.check_completion().await;
    }

    /// Finish once no more blocks will come and none are in flight
    async fn check_completion(&mut self) {
        if self.finalized || self.after_all_running || !self.init_ended || self.in_flight() > 0 {
            return;
        }

        let end_state = self.drained_state();
        match self.job_plugin.take() {
            Some((plugin, ctx)) if end_state == JobState::Completed => self.run_after_all(plugin, ctx),
            Some((mut plugin, _)) => {
                tokio::spawn(async move { plugin.shutdown().await });
                self.finalize(end_state).await;
            }
            None => self.finalize(end_state).await,
        }
    }

    /// Terminal state of a job whose blocks have all drained
    fn drained_state(&self) -> JobState {
        if self.stopping {
            JobState::Stopped
        } else if self.in_error {
            JobState::FailedToComplete
        } else {
            JobState::Completed
        }
    }

    fn run_after_all(&mut self, mut plugin: Box<dyn Plugin>, ctx: PluginContext) {
        let Some(tx) = self.self_tx.upgrade() else {
            return;
        };
        self.after_all_running = true;
        let job_id = self.job_id.clone();

        tokio::spawn(async move {
            let hook = tokio::spawn(async move {
                let result = plugin.after_all_execute(&ctx).await;
                plugin.shutdown().await;
                result
            });
            let error = match hook.await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(join_err) => {
                    error!(job_id = %job_id, "After all hook panicked: {:?}", join_err);
                    Some("after all hook panicked".to_string())
                }
            };
            let _ = tx.send(TrackerMessage::AfterAllFinished { error });
        });
    }

    async fn finalize(&mut self, end_state: JobState) {
        if self.finalized {
            return;
        }
        self.finalized = true;

        let mut stats = self.stats();
        if end_state == JobState::Completed {
            stats.completion_percentage = 100;
        }
        let details = self.details(end_state);
        let now = self.time_provider.now_millis();

        if let Err(e) = self.sink.progress(&self.job_id, &stats).await {
            warn!(job_id = %self.job_id, error = %e, "Failed to report final statistics");
        }
        if let Err(e) = self
            .sink
            .state_changed(&self.job_id, end_state, details, now)
            .await
        {
            error!(job_id = %self.job_id, state = %end_state, error = %e, "Failed to persist final state");
        }

        self.pools.deregister(&self.job_id, self.registration);
        self.set_state(end_state);
        info!(
            job_id = %self.job_id,
            state = %end_state,
            success = stats.source_objects_processed_with_success,
            failure = stats.source_objects_processed_with_failure,
            "Job finished"
        );
    }

    fn details(&self, end_state: JobState) -> Option<String> {
        if !self.notes.is_empty() {
            return Some(self.notes.join("; "));
        }
        match end_state {
            JobState::Stopped => Some("Job was stopped".to_string()),
            JobState::FailedToComplete => Some("Job failed to complete".to_string()),
            _ => None,
        }
    }

    async fn push_progress(&self) {
        let stats = self.stats();
        if let Err(e) = self.sink.progress(&self.job_id, &stats).await {
            warn!(job_id = %self.job_id, error = %e, "Failed to report progress");
        }
    }

    fn stats(&self) -> JobStats {
        JobPluginInfo::aggregate(self.plugin_type, self.blocks.values()).to_stats()
    }

    fn in_flight(&self) -> usize {
        self.blocks_dispatched - self.blocks_finished
    }

    fn set_state(&mut self, state: JobState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.job_id.clone(),
            state: self.state,
            stopping: self.stopping,
            in_error: self.in_error,
            init_ended: self.init_ended,
            blocks_dispatched: self.blocks_dispatched,
            blocks_finished: self.blocks_finished,
            stats: self.stats(),
            details: (!self.notes.is_empty()).then(|| self.notes.join("; ")),
        }
    }
}
