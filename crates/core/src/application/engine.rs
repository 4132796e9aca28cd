// OrchestrationEngine - submission, dispatch and cancellation of jobs

use crate::application::batcher::Batcher;
use crate::application::config::{EngineConfig, OverflowPolicy};
use crate::application::object_source::ObjectSource;
use crate::application::plugin_registry::PluginRegistry;
use crate::application::recovery::{RecoveryManager, RecoveryOutcome};
use crate::application::registry::{DispatchGuard, JobPools, PoolCounts};
use crate::application::report::JobStoreReportSink;
use crate::application::tracker::{
    JobSnapshot, JobTracker, StartDecision, TrackerHandle, TrackerMessage,
};
use crate::application::worker::{shutdown_channel, ShutdownListener, ShutdownSignal, Worker};
use crate::domain::{
    Block, BlockIndex, Job, JobId, JobPluginInfo, JobState, ObjectSelector, PluginType,
};
use crate::error::{AppError, Result};
use crate::port::{
    IdProvider, IndexService, JobStore, ModelService, NoopProgress, Plugin, ReportSink,
    StorageService, TimeProvider,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

/// Collaborators injected into the engine
#[derive(Clone)]
pub struct EnginePorts {
    pub job_store: Arc<dyn JobStore>,
    pub index: Arc<dyn IndexService>,
    pub model: Arc<dyn ModelService>,
    pub storage: Arc<dyn StorageService>,
    pub time_provider: Arc<dyn TimeProvider>,
    pub id_provider: Arc<dyn IdProvider>,
}

/// Result of a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Asynchronous submission accepted
    Accepted { job_id: JobId },
    /// Synchronous submission, job ended within the timeout
    Finished { job_id: JobId, state: JobState },
    /// Synchronous submission, timeout elapsed; the job keeps running
    TimedOut { job_id: JobId },
}

impl SubmitOutcome {
    pub fn job_id(&self) -> &JobId {
        match self {
            SubmitOutcome::Accepted { job_id }
            | SubmitOutcome::Finished { job_id, .. }
            | SubmitOutcome::TimedOut { job_id } => job_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub pools: PoolCounts,
    pub max_parallel_jobs: usize,
    pub available_job_slots: usize,
    pub worker_pool_size: usize,
    pub available_worker_slots: usize,
    pub shutting_down: bool,
}

struct EngineInner {
    config: EngineConfig,
    ports: EnginePorts,
    plugins: Arc<PluginRegistry>,
    sink: Arc<dyn ReportSink>,
    pools: Arc<JobPools>,
    job_slots: Arc<Semaphore>,
    worker_slots: Arc<Semaphore>,
    worker: Worker,
    shutdown_signal: ShutdownSignal,
    shutdown_listener: ShutdownListener,
}

/// Top-level coordinator
///
/// Cheap to clone; clones share the same pools and slots.
#[derive(Clone)]
pub struct OrchestrationEngine {
    inner: Arc<EngineInner>,
}

impl OrchestrationEngine {
    /// Engine reporting to the job store
    pub fn new(config: EngineConfig, ports: EnginePorts, plugins: Arc<PluginRegistry>) -> Result<Self> {
        let sink = Arc::new(JobStoreReportSink::new(ports.job_store.clone()));
        Self::with_report_sink(config, ports, plugins, sink)
    }

    pub fn with_report_sink(
        config: EngineConfig,
        ports: EnginePorts,
        plugins: Arc<PluginRegistry>,
        sink: Arc<dyn ReportSink>,
    ) -> Result<Self> {
        config.validate()?;
        let (shutdown_signal, shutdown_listener) = shutdown_channel();
        let worker = Worker::new(ports.index.clone(), ports.model.clone(), ports.storage.clone());

        Ok(Self {
            inner: Arc::new(EngineInner {
                job_slots: Arc::new(Semaphore::new(config.max_parallel_jobs)),
                worker_slots: Arc::new(Semaphore::new(config.worker_pool_size)),
                config,
                ports,
                plugins,
                sink,
                pools: Arc::new(JobPools::new()),
                worker,
                shutdown_signal,
                shutdown_listener,
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.inner.plugins
    }

    /// Submit a job
    ///
    /// Fails with `AlreadyStarted` when the id is already running. A
    /// synchronous submission waits up to the configured timeout and then
    /// returns regardless; the job keeps running.
    pub async fn submit(&self, job: Job, synchronous: bool) -> Result<SubmitOutcome> {
        let inner = &self.inner;
        if inner.shutdown_listener.is_shutdown() {
            return Err(AppError::ShuttingDown);
        }
        if inner.pools.contains(&job.id) {
            return Err(AppError::AlreadyStarted(job.id));
        }
        let job_plugin = inner
            .plugins
            .instantiate(&job.plugin, &job.plugin_parameters)?;
        if job.plugin_type != job_plugin.plugin_type() {
            return Err(AppError::Validation(format!(
                "job {} is typed {} but plugin {} declares {}",
                job.id,
                job.plugin_type,
                job.plugin,
                job_plugin.plugin_type()
            )));
        }
        validate_job(&job)?;

        let slot = match inner.config.overflow_policy {
            OverflowPolicy::Queue => None,
            OverflowPolicy::Reject => Some(inner.job_slots.clone().try_acquire_owned().map_err(
                |_| AppError::CapacityExceeded {
                    running: inner.config.max_parallel_jobs - inner.job_slots.available_permits(),
                    max: inner.config.max_parallel_jobs,
                },
            )?),
        };

        let (tracker, handle) = JobTracker::new(
            &job,
            inner.sink.clone(),
            inner.pools.clone(),
            inner.ports.time_provider.clone(),
        );
        inner.pools.register(job.id.clone(), handle.clone())?;

        if let Err(e) = self.persist_if_absent(&job).await {
            inner.pools.deregister(&job.id, handle.registration());
            return Err(e);
        }

        tokio::spawn(tracker.run());
        info!(job_id = %job.id, plugin = %job.plugin, synchronous, "Job submitted");

        let job_id = job.id.clone();
        tokio::spawn(run_job(inner.clone(), job, handle.clone(), job_plugin, slot));

        if !synchronous {
            return Ok(SubmitOutcome::Accepted { job_id });
        }
        match tokio::time::timeout(inner.config.sync_timeout(), handle.wait_terminal()).await {
            Ok(state) => Ok(SubmitOutcome::Finished { job_id, state }),
            Err(_) => {
                info!(job_id = %job_id, "Synchronous submission timed out, job continues");
                Ok(SubmitOutcome::TimedOut { job_id })
            }
        }
    }

    async fn persist_if_absent(&self, job: &Job) -> Result<()> {
        let store = &self.inner.ports.job_store;
        if store.find_by_id(&job.id).await?.is_none() {
            store.insert(job).await?;
        }
        Ok(())
    }

    /// Ask a job to stop; no-op for an unknown id
    pub fn request_stop(&self, job_id: &str) -> bool {
        let pools = &self.inner.pools;
        if !pools.mark_stopping(job_id) {
            debug!(job_id = %job_id, "Stop requested for unknown job");
            return false;
        }
        if let Some(handle) = pools.handle(job_id) {
            handle.send(TrackerMessage::Stop);
        }
        info!(job_id = %job_id, "Stop requested");
        true
    }

    /// Reject every further block dispatch of a job
    pub fn mark_in_error(&self, job_id: &str) -> bool {
        let pools = &self.inner.pools;
        if !pools.mark_in_error(job_id) {
            debug!(job_id = %job_id, "In-error mark for unknown job");
            return false;
        }
        if let Some(handle) = pools.handle(job_id) {
            handle.send(TrackerMessage::MarkedInError);
        }
        warn!(job_id = %job_id, "Job marked in error");
        true
    }

    /// Forward intermediate counters of one block to the job's tracker
    pub fn report_progress(&self, job_id: &str, block: BlockIndex, info: JobPluginInfo) -> Result<()> {
        let handle = self
            .inner
            .pools
            .handle(job_id)
            .ok_or_else(|| AppError::NotFound(format!("running job {}", job_id)))?;
        handle.send(TrackerMessage::ProgressUpdated { block, info });
        Ok(())
    }

    /// Forward a state change; a terminal state deregisters the job at once
    ///
    /// Repeated terminal reports for a job that is no longer running are
    /// no-ops.
    pub fn report_state_change(
        &self,
        job_id: &str,
        state: JobState,
        details: Option<String>,
    ) -> Result<()> {
        let pools = &self.inner.pools;
        let Some(handle) = pools.handle(job_id) else {
            if state.is_final() {
                return Ok(());
            }
            return Err(AppError::NotFound(format!("running job {}", job_id)));
        };

        handle.send(TrackerMessage::StateReported { state, details });
        if state.is_final() {
            pools.deregister(job_id, handle.registration());
        }
        Ok(())
    }

    /// Live snapshot for running jobs, stored record otherwise
    pub async fn job_status(&self, job_id: &str) -> Result<Option<JobSnapshot>> {
        let inner = &self.inner;
        if let Some(handle) = inner.pools.handle(job_id) {
            if let Some(snapshot) = handle.snapshot().await {
                return Ok(Some(snapshot));
            }
        }
        let job = inner.ports.job_store.find_by_id(&job_id.to_string()).await?;
        Ok(job.as_ref().map(JobSnapshot::from_job))
    }

    pub fn stats(&self) -> EngineStats {
        let inner = &self.inner;
        EngineStats {
            pools: inner.pools.counts(),
            max_parallel_jobs: inner.config.max_parallel_jobs,
            available_job_slots: inner.job_slots.available_permits(),
            worker_pool_size: inner.config.worker_pool_size,
            available_worker_slots: inner.worker_slots.available_permits(),
            shutting_down: inner.shutdown_listener.is_shutdown(),
        }
    }

    pub fn running_job_ids(&self) -> Vec<JobId> {
        self.inner.pools.running_ids()
    }

    /// Sweep jobs a previous process left unfinished into one cleanup job
    pub async fn recover_unfinished_jobs(&self) -> Result<RecoveryOutcome> {
        let ports = &self.inner.ports;
        RecoveryManager::new(
            ports.job_store.clone(),
            ports.time_provider.clone(),
            ports.id_provider.clone(),
        )
        .recover(self)
        .await
    }

    /// Stop accepting work, stop every job and wait for in-flight blocks
    ///
    /// Waits at most the configured grace period; an elapsed grace period is
    /// logged and shutdown proceeds.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.shutdown_signal.is_shutdown() {
            return;
        }
        inner.shutdown_signal.shutdown();

        let handles = inner.pools.handles();
        info!(running = handles.len(), "Engine shutting down");
        for handle in handles {
            inner.pools.mark_stopping(handle.job_id());
            handle.send(TrackerMessage::Stop);
        }

        let grace = inner.config.shutdown_grace();
        let all_workers = inner.config.worker_pool_size as u32;
        match tokio::time::timeout(grace, inner.worker_slots.acquire_many(all_workers)).await {
            Ok(Ok(permits)) => {
                drop(permits);
                info!("All in-flight blocks finished");
            }
            Ok(Err(_)) => debug!("Worker pool already closed"),
            Err(_) => warn!(
                grace_secs = grace.as_secs(),
                "Shutdown grace period elapsed with blocks still in flight"
            ),
        }
        inner.worker_slots.close();
        inner.job_slots.close();
        info!("Engine stopped");
    }
}

fn validate_job(job: &Job) -> Result<()> {
    if job.state != JobState::Created {
        return Err(AppError::Validation(format!(
            "job {} is {}, only CREATED jobs can be submitted",
            job.id, job.state
        )));
    }
    let targets_nothing = job.source_objects == ObjectSelector::None;
    match (job.plugin_type, targets_nothing) {
        (PluginType::SingleShot, false) => Err(AppError::Validation(format!(
            "job {} is single-shot but targets objects",
            job.id
        ))),
        (PluginType::SingleShot, true) | (_, false) => Ok(()),
        (plugin_type, true) => Err(AppError::Validation(format!(
            "job {} targets no objects but its plugin type is {}",
            job.id, plugin_type
        ))),
    }
}

/// Per-job task: wait for a slot, dispatch, then hold the slot until the end
async fn run_job(
    inner: Arc<EngineInner>,
    job: Job,
    handle: TrackerHandle,
    job_plugin: Box<dyn Plugin>,
    slot: Option<OwnedSemaphorePermit>,
) {
    let _slot = match slot {
        Some(slot) => slot,
        None => {
            tokio::select! {
                permit = inner.job_slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        handle.send(TrackerMessage::Stop);
                        return;
                    }
                },
                state = handle.wait_terminal() => {
                    debug!(job_id = %job.id, state = %state, "Job ended while waiting for a slot");
                    return;
                }
            }
        }
    };

    match dispatch(&inner, &job, &handle, job_plugin).await {
        Ok(()) => debug!(job_id = %job.id, "All blocks dispatched"),
        Err(AppError::JobStopping(_)) => debug!(job_id = %job.id, "Dispatch ceased, job stopping"),
        Err(e @ AppError::JobInError(_)) => {
            warn!(job_id = %job.id, "Dispatch ceased, job marked in error");
            handle.send(TrackerMessage::Fail {
                reason: e.to_string(),
            });
        }
        Err(e) => {
            error!(job_id = %job.id, error = %e, "Job dispatch failed");
            handle.send(TrackerMessage::Fail {
                reason: e.to_string(),
            });
        }
    }
    handle.send(TrackerMessage::InitEnded);
    handle.wait_terminal().await;
}

async fn dispatch(
    inner: &Arc<EngineInner>,
    job: &Job,
    handle: &TrackerHandle,
    job_plugin: Box<dyn Plugin>,
) -> Result<()> {
    let (resp, decision) = oneshot::channel();
    handle.send(TrackerMessage::Start { resp });
    match decision.await {
        Ok(StartDecision::Proceed) => {}
        Ok(StartDecision::InError) => return Err(AppError::JobInError(job.id.clone())),
        Ok(StartDecision::Failed(reason)) => {
            return Err(AppError::InvalidState(format!(
                "could not mark job RUNNING: {}",
                reason
            )));
        }
        Ok(StartDecision::Stopping) | Err(_) => return Err(AppError::JobStopping(job.id.clone())),
    }

    run_before_all(inner, job, handle, job_plugin).await;

    if job.source_objects == ObjectSelector::None {
        check_guard(inner, handle)?;
        let permit = acquire_worker(inner, &job.id).await?;
        return dispatch_block(inner, job, handle, Block::empty(0), permit);
    }

    let ports = &inner.ports;
    let source = ObjectSource::open(
        &job.source_objects,
        ports.index.clone(),
        ports.model.clone(),
        ports.job_store.clone(),
        inner.config.block_size,
    )
    .await?;
    let mut batcher = Batcher::new(source, inner.config.block_size);

    let result = dispatch_blocks(inner, job, handle, &mut batcher).await;
    if let Err(e) = batcher.close().await {
        warn!(job_id = %job.id, error = %e, "Failed to close object source");
    }
    info!(job_id = %job.id, blocks = batcher.blocks_emitted(), "Block dispatch ended");
    result
}

async fn dispatch_blocks(
    inner: &Arc<EngineInner>,
    job: &Job,
    handle: &TrackerHandle,
    batcher: &mut Batcher<ObjectSource>,
) -> Result<()> {
    loop {
        check_guard(inner, handle)?;
        let Some(block) = batcher.next_block().await? else {
            return Ok(());
        };
        let permit = acquire_worker(inner, &job.id).await?;
        // The permit may have taken a while, look again right before dispatch
        check_guard(inner, handle)?;
        dispatch_block(inner, job, handle, block, permit)?;
    }
}

fn check_guard(inner: &EngineInner, handle: &TrackerHandle) -> Result<()> {
    let job_id = handle.job_id();
    match inner.pools.guard(job_id, handle.registration()) {
        DispatchGuard::Proceed => Ok(()),
        DispatchGuard::InError => Err(AppError::JobInError(job_id.clone())),
        DispatchGuard::Stopping | DispatchGuard::Unknown => Err(AppError::JobStopping(job_id.clone())),
    }
}

async fn acquire_worker(inner: &EngineInner, job_id: &JobId) -> Result<OwnedSemaphorePermit> {
    inner
        .worker_slots
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| AppError::JobStopping(job_id.clone()))
}

/// Hand one block to a worker; the permit is released when the block ends
fn dispatch_block(
    inner: &Arc<EngineInner>,
    job: &Job,
    handle: &TrackerHandle,
    block: Block,
    permit: OwnedSemaphorePermit,
) -> Result<()> {
    let plugin = inner
        .plugins
        .instantiate(&job.plugin, &job.plugin_parameters)?;
    let index = block.index();
    debug!(job_id = %job.id, block = index, objects = block.len(), "Dispatching block");
    handle.send(TrackerMessage::BlockDispatched {
        block: index,
        count: block.len() as u64,
    });

    let worker = inner.worker.clone();
    let handle = handle.clone();
    let job_id = job.id.clone();
    let plugin_type = job.plugin_type;
    tokio::spawn(async move {
        let progress = handle.block_progress(index);
        let outcome = worker
            .run_block(&job_id, plugin_type, plugin, block, progress)
            .await;
        handle.send(TrackerMessage::BlockFinished {
            block: index,
            info: outcome.info,
            error: outcome.error,
        });
        drop(permit);
    });
    Ok(())
}

/// Job-level `init` + `before_all_execute`; failures are noted, not fatal
async fn run_before_all(
    inner: &Arc<EngineInner>,
    job: &Job,
    handle: &TrackerHandle,
    mut plugin: Box<dyn Plugin>,
) {
    plugin.inject_job_plugin_info(JobPluginInfo::for_plugin_type(job.plugin_type, 0));
    let ctx = inner.worker.context(&job.id, None, Arc::new(NoopProgress));

    let hook = tokio::spawn(async move {
        let result = match plugin.init().await {
            Ok(()) => plugin.before_all_execute(&ctx).await,
            Err(e) => Err(e),
        };
        (plugin, ctx, result)
    });

    match hook.await {
        Ok((plugin, ctx, result)) => {
            if let Err(e) = result {
                warn!(job_id = %job.id, error = %e, "Before all hook failed");
                handle.send(TrackerMessage::Note {
                    detail: format!("before all hook failed: {}", e),
                });
            }
            handle.send(TrackerMessage::AttachJobPlugin { plugin, ctx });
        }
        Err(join_err) => {
            error!(job_id = %job.id, "Before all hook panicked: {:?}", join_err);
            handle.send(TrackerMessage::Note {
                detail: "before all hook panicked".to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::internal::register_internal_plugins;
    use crate::domain::{Filter, ObjectClass};
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::index::mocks::InMemoryCatalog;
    use crate::port::job_store::mocks::InMemoryJobStore;
    use crate::port::plugin::mocks::PluginScript;
    use crate::port::storage::mocks::InMemoryStorage;
    use crate::port::time_provider::SystemTimeProvider;
    use futures::future::join_all;
    use std::time::Duration;

    const PLUGIN: &str = "test.scripted";

    struct Harness {
        engine: OrchestrationEngine,
        store: Arc<InMemoryJobStore>,
        script: Arc<PluginScript>,
    }

    fn harness(config: EngineConfig, catalog: InMemoryCatalog, script: PluginScript) -> Harness {
        let store = Arc::new(InMemoryJobStore::new());
        let catalog = Arc::new(catalog);
        let script = Arc::new(script);
        let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);

        let mut registry = PluginRegistry::new();
        let factory_script = script.clone();
        registry.register(PLUGIN, move || factory_script.instantiate());
        register_internal_plugins(&mut registry, store.clone(), time_provider.clone());

        let ports = EnginePorts {
            job_store: store.clone(),
            index: catalog.clone(),
            model: catalog.clone(),
            storage: Arc::new(InMemoryStorage::new()),
            time_provider,
            id_provider: Arc::new(SequentialIdProvider::new("job")),
        };
        let engine = OrchestrationEngine::new(config, ports, Arc::new(registry)).unwrap();
        Harness {
            engine,
            store,
            script,
        }
    }

    fn aip_job() -> Job {
        Job::new_test(
            PLUGIN,
            ObjectSelector::Filter {
                class: ObjectClass::Aip,
                filter: Filter::all(),
            },
        )
    }

    fn config(block_size: usize) -> EngineConfig {
        EngineConfig {
            block_size,
            ..EngineConfig::default()
        }
    }

    fn finished(outcome: SubmitOutcome) -> JobState {
        match outcome {
            SubmitOutcome::Finished { state, .. } => state,
            other => panic!("expected a finished job, got {:?}", other),
        }
    }

    async fn eventually<F: Fn() -> bool>(what: &str, condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    #[tokio::test]
    async fn test_250_objects_in_blocks_of_100() {
        let h = harness(
            config(100),
            InMemoryCatalog::with_objects(ObjectClass::Aip, 250),
            PluginScript::succeeding(),
        );
        let job = aip_job();
        let id = job.id.clone();

        let state = finished(h.engine.submit(job, true).await.unwrap());
        assert_eq!(state, JobState::Completed);

        let mut sizes: Vec<usize> = h.script.executed_blocks().iter().map(Vec::len).collect();
        sizes.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(sizes, vec![100, 100, 50]);

        // First injection is the job-level instance
        let mut injected: Vec<u64> = h
            .script
            .injected_infos()
            .iter()
            .skip(1)
            .map(|info| info.counters().source_objects_count())
            .collect();
        injected.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(injected, vec![100, 100, 50]);

        let stored = h.store.get(&id).unwrap();
        assert_eq!(stored.state, JobState::Completed);
        assert_eq!(stored.stats.source_objects_count, 250);
        assert_eq!(stored.stats.source_objects_processed_with_success, 250);
        assert_eq!(stored.stats.source_objects_processed_with_failure, 0);
        assert_eq!(stored.stats.source_objects_waiting_to_be_processed, 0);
        assert_eq!(stored.stats.completion_percentage, 100);
        assert!(stored.started_at.is_some() && stored.ended_at.is_some());
        assert!(!h.engine.running_job_ids().contains(&id));
    }

    #[tokio::test]
    async fn test_concatenated_blocks_match_enumeration() {
        let config = EngineConfig {
            block_size: 7,
            worker_pool_size: 1,
            ..EngineConfig::default()
        };
        let h = harness(
            config,
            InMemoryCatalog::with_objects(ObjectClass::Aip, 30),
            PluginScript::succeeding(),
        );

        finished(h.engine.submit(aip_job(), true).await.unwrap());
        let blocks = h.script.executed_blocks();
        assert_eq!(blocks.len(), 5);
        let all: Vec<String> = blocks.into_iter().flatten().collect();
        assert_eq!(all, InMemoryCatalog::object_ids(30));
    }

    #[tokio::test]
    async fn test_per_object_failures_do_not_fail_job() {
        let ids = InMemoryCatalog::object_ids(250);
        let h = harness(
            config(100),
            InMemoryCatalog::with_objects(ObjectClass::Aip, 250),
            PluginScript::succeeding().failing_ids(ids[0..3].to_vec()),
        );
        let job = aip_job();
        let id = job.id.clone();

        let state = finished(h.engine.submit(job, true).await.unwrap());
        assert_eq!(state, JobState::Completed);

        let stats = h.store.get(&id).unwrap().stats;
        assert_eq!(stats.source_objects_processed_with_success, 247);
        assert_eq!(stats.source_objects_processed_with_failure, 3);
        assert_eq!(stats.source_objects_waiting_to_be_processed, 0);
    }

    #[tokio::test]
    async fn test_panicking_block_is_isolated() {
        let h = harness(
            config(10),
            InMemoryCatalog::with_objects(ObjectClass::Aip, 30),
            PluginScript::succeeding().panicking_on("obj-00015"),
        );
        let job = aip_job();
        let id = job.id.clone();

        let state = finished(h.engine.submit(job, true).await.unwrap());
        assert_eq!(state, JobState::Completed);
        let stored = h.store.get(&id).unwrap();
        assert_eq!(stored.stats.source_objects_processed_with_success, 20);
        assert_eq!(stored.stats.source_objects_processed_with_failure, 10);
        assert!(stored.state_details.unwrap().contains("block 1"));
    }

    #[tokio::test]
    async fn test_duplicate_submission_rejected() {
        let gate = Arc::new(Semaphore::new(0));
        let h = harness(
            config(10),
            InMemoryCatalog::with_objects(ObjectClass::Aip, 5),
            PluginScript::succeeding().gated(gate.clone()),
        );
        let job = aip_job();
        let id = job.id.clone();

        h.engine.submit(job.clone(), false).await.unwrap();
        let err = h.engine.submit(job, false).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyStarted(ref dup) if *dup == id));
        assert_eq!(h.engine.stats().pools.running, 1);

        gate.add_permits(10);
        let handle = h.engine.inner.pools.handle(&id).unwrap();
        assert_eq!(handle.wait_terminal().await, JobState::Completed);
    }

    #[tokio::test]
    async fn test_stop_prevents_new_blocks() {
        let gate = Arc::new(Semaphore::new(0));
        let engine_config = EngineConfig {
            block_size: 10,
            worker_pool_size: 2,
            ..EngineConfig::default()
        };
        let h = harness(
            engine_config,
            InMemoryCatalog::with_objects(ObjectClass::Aip, 100),
            PluginScript::succeeding().gated(gate.clone()),
        );
        let job = aip_job();
        let id = job.id.clone();
        h.engine.submit(job, false).await.unwrap();

        // Both worker slots busy, the dispatch loop is parked on a permit
        let script = h.script.clone();
        eventually("two blocks executing", || script.executed_blocks().len() == 2).await;
        let handle = h.engine.inner.pools.handle(&id).unwrap();

        assert!(h.engine.request_stop(&id));
        gate.add_permits(100);

        assert_eq!(handle.wait_terminal().await, JobState::Stopped);
        assert_eq!(h.script.executed_blocks().len(), 2);

        let stored = h.store.get(&id).unwrap();
        assert_eq!(stored.state, JobState::Stopped);
        assert_eq!(stored.stats.source_objects_processed_with_success, 20);
        assert_eq!(
            h.store.state_history(&id),
            vec![JobState::Running, JobState::Stopping, JobState::Stopped]
        );
    }

    #[tokio::test]
    async fn test_stop_unknown_job_is_noop() {
        let h = harness(config(10), InMemoryCatalog::new(), PluginScript::succeeding());
        assert!(!h.engine.request_stop("nope"));
        assert!(!h.engine.mark_in_error("nope"));
    }

    #[tokio::test]
    async fn test_mark_in_error_fails_job() {
        let gate = Arc::new(Semaphore::new(0));
        let engine_config = EngineConfig {
            block_size: 10,
            worker_pool_size: 1,
            ..EngineConfig::default()
        };
        let h = harness(
            engine_config,
            InMemoryCatalog::with_objects(ObjectClass::Aip, 50),
            PluginScript::succeeding().gated(gate.clone()),
        );
        let job = aip_job();
        let id = job.id.clone();
        h.engine.submit(job, false).await.unwrap();

        let script = h.script.clone();
        eventually("first block executing", || script.executed_blocks().len() == 1).await;
        let handle = h.engine.inner.pools.handle(&id).unwrap();

        assert!(h.engine.mark_in_error(&id));
        gate.add_permits(100);

        assert_eq!(handle.wait_terminal().await, JobState::FailedToComplete);
        assert_eq!(h.script.executed_blocks().len(), 1);
        assert_eq!(h.store.get(&id).unwrap().state, JobState::FailedToComplete);
    }

    #[tokio::test]
    async fn test_enumeration_failure_fails_job() {
        let catalog = InMemoryCatalog::with_objects(ObjectClass::Aip, 10);
        catalog.fail_enumeration();
        let h = harness(config(10), catalog, PluginScript::succeeding());
        let job = aip_job();
        let id = job.id.clone();

        let state = finished(h.engine.submit(job, true).await.unwrap());
        assert_eq!(state, JobState::FailedToComplete);
        let stored = h.store.get(&id).unwrap();
        assert!(stored.state_details.unwrap().contains("catalog unavailable"));
        assert!(h.script.executed_blocks().is_empty());
    }

    #[tokio::test]
    async fn test_sync_submit_times_out_but_job_continues() {
        let gate = Arc::new(Semaphore::new(0));
        let engine_config = EngineConfig {
            sync_timeout_secs: 0,
            ..config(10)
        };
        let h = harness(
            engine_config,
            InMemoryCatalog::with_objects(ObjectClass::Aip, 3),
            PluginScript::succeeding().gated(gate.clone()),
        );
        let job = aip_job();
        let id = job.id.clone();

        let outcome = h.engine.submit(job, true).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::TimedOut { job_id: id.clone() });

        let handle = h.engine.inner.pools.handle(&id).unwrap();
        gate.add_permits(1);
        assert_eq!(handle.wait_terminal().await, JobState::Completed);
    }

    #[tokio::test]
    async fn test_reject_policy_refuses_over_capacity() {
        let gate = Arc::new(Semaphore::new(0));
        let engine_config = EngineConfig {
            max_parallel_jobs: 1,
            overflow_policy: OverflowPolicy::Reject,
            ..config(10)
        };
        let h = harness(
            engine_config,
            InMemoryCatalog::with_objects(ObjectClass::Aip, 3),
            PluginScript::succeeding().gated(gate.clone()),
        );

        let first = aip_job();
        let first_id = first.id.clone();
        h.engine.submit(first, false).await.unwrap();
        let err = h.engine.submit(aip_job(), false).await.unwrap_err();
        assert!(matches!(err, AppError::CapacityExceeded { running: 1, max: 1 }));

        gate.add_permits(1);
        let handle = h.engine.inner.pools.handle(&first_id).unwrap();
        handle.wait_terminal().await;
    }

    #[tokio::test]
    async fn test_queue_policy_waits_for_slot() {
        let gate = Arc::new(Semaphore::new(0));
        let engine_config = EngineConfig {
            max_parallel_jobs: 1,
            ..config(10)
        };
        let h = harness(
            engine_config,
            InMemoryCatalog::with_objects(ObjectClass::Aip, 3),
            PluginScript::succeeding().gated(gate.clone()),
        );

        let first = aip_job();
        let second = aip_job();
        let second_id = second.id.clone();
        h.engine.submit(first, false).await.unwrap();
        h.engine.submit(second, false).await.unwrap();

        let script = h.script.clone();
        eventually("first job executing", || script.executed_blocks().len() == 1).await;
        let status = h.engine.job_status(&second_id).await.unwrap().unwrap();
        assert_eq!(status.state, JobState::Created);

        gate.add_permits(2);
        let handle = h.engine.inner.pools.handle(&second_id).unwrap();
        assert_eq!(handle.wait_terminal().await, JobState::Completed);
    }

    #[tokio::test]
    async fn test_single_shot_job() {
        let h = harness(config(10), InMemoryCatalog::new(), PluginScript::new(PluginType::SingleShot));
        let job = Job::new_test(PLUGIN, ObjectSelector::None).with_plugin_type(PluginType::SingleShot);
        let id = job.id.clone();

        let state = finished(h.engine.submit(job, true).await.unwrap());
        assert_eq!(state, JobState::Completed);
        assert_eq!(h.script.executed_blocks(), vec![Vec::<String>::new()]);
        assert_eq!(h.script.before_all_calls(), 1);
        assert_eq!(h.script.after_all_calls(), 1);
        assert_eq!(h.store.get(&id).unwrap().stats.completion_percentage, 100);
    }

    #[tokio::test]
    async fn test_hooks_wrap_blocks() {
        let h = harness(
            config(5),
            InMemoryCatalog::with_objects(ObjectClass::Aip, 12),
            PluginScript::succeeding(),
        );
        finished(h.engine.submit(aip_job(), true).await.unwrap());

        assert_eq!(h.script.before_all_calls(), 1);
        assert_eq!(h.script.after_all_calls(), 1);
        // One job-level instance plus one per block, each used once
        assert_eq!(h.script.instances(), 4);
        assert_eq!(h.script.init_calls(), 4);
    }

    #[tokio::test]
    async fn test_submission_validation() {
        let h = harness(config(10), InMemoryCatalog::new(), PluginScript::succeeding());

        let unknown = Job::new_test("missing.plugin", ObjectSelector::None)
            .with_plugin_type(PluginType::SingleShot);
        assert!(matches!(
            h.engine.submit(unknown, false).await,
            Err(AppError::Plugin(_))
        ));

        let no_target = Job::new_test(PLUGIN, ObjectSelector::None);
        assert!(matches!(
            h.engine.submit(no_target, false).await,
            Err(AppError::Validation(_))
        ));

        // Counters follow the plugin's declared type, a different one is refused
        let mistyped = aip_job().with_plugin_type(PluginType::Ingest);
        assert!(matches!(
            h.engine.submit(mistyped, false).await,
            Err(AppError::Validation(_))
        ));
        assert!(h.engine.running_job_ids().is_empty());
        assert!(h.store.all().is_empty());
    }

    #[tokio::test]
    async fn test_report_state_change_deregisters() {
        let gate = Arc::new(Semaphore::new(0));
        let h = harness(
            config(10),
            InMemoryCatalog::with_objects(ObjectClass::Aip, 3),
            PluginScript::succeeding().gated(gate.clone()),
        );
        let job = aip_job();
        let id = job.id.clone();
        h.engine.submit(job, false).await.unwrap();
        let handle = h.engine.inner.pools.handle(&id).unwrap();

        h.engine
            .report_state_change(&id, JobState::FailedToComplete, Some("operator abort".into()))
            .unwrap();
        assert!(!h.engine.running_job_ids().contains(&id));

        // Repeated terminal report is a no-op, non-terminal is an error
        assert!(h.engine.report_state_change(&id, JobState::Completed, None).is_ok());
        assert!(matches!(
            h.engine.report_state_change(&id, JobState::Running, None),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            h.engine.report_progress(&id, 0, JobPluginInfo::for_plugin_type(PluginType::Misc, 1)),
            Err(AppError::NotFound(_))
        ));

        assert_eq!(handle.wait_terminal().await, JobState::FailedToComplete);
        gate.add_permits(10);
    }

    #[tokio::test]
    async fn test_resubmission_survives_old_tracker_finalizing() {
        let gate = Arc::new(Semaphore::new(0));
        let engine_config = EngineConfig {
            max_parallel_jobs: 1,
            ..config(10)
        };
        let h = harness(
            engine_config,
            InMemoryCatalog::with_objects(ObjectClass::Aip, 3),
            PluginScript::succeeding().gated(gate.clone()),
        );

        // Holds the only job slot, the next job stays queued
        let blocker = aip_job();
        let blocker_id = blocker.id.clone();
        h.engine.submit(blocker, false).await.unwrap();
        let script = h.script.clone();
        eventually("blocker executing", || script.executed_blocks().len() == 1).await;
        let blocker_handle = h.engine.inner.pools.handle(&blocker_id).unwrap();

        let job = aip_job();
        let id = job.id.clone();
        h.engine.submit(job.clone(), false).await.unwrap();
        let old = h.engine.inner.pools.handle(&id).unwrap();

        h.engine.report_state_change(&id, JobState::Stopped, None).unwrap();
        h.engine.submit(job.clone(), false).await.unwrap();
        let current = h.engine.inner.pools.handle(&id).unwrap();
        assert_ne!(old.registration(), current.registration());

        // The old tracker finalizes after the id was registered again
        assert_eq!(old.wait_terminal().await, JobState::Stopped);
        assert!(h.engine.running_job_ids().contains(&id));
        assert_eq!(
            h.engine.inner.pools.handle(&id).unwrap().registration(),
            current.registration()
        );
        let err = h.engine.submit(job, false).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyStarted(ref dup) if *dup == id));

        gate.add_permits(10);
        assert_eq!(blocker_handle.wait_terminal().await, JobState::Completed);
        current.wait_terminal().await;
    }

    #[tokio::test]
    async fn test_recover_unfinished_jobs() {
        let h = harness(config(10), InMemoryCatalog::new(), PluginScript::succeeding());
        let mut leftovers = Vec::new();
        for state in [JobState::Created, JobState::Running, JobState::Stopping] {
            let mut job = Job::new_test(PLUGIN, ObjectSelector::None);
            if state != JobState::Created {
                job.transition(state, 1).unwrap();
            }
            h.store.insert(&job).await.unwrap();
            leftovers.push(job.id);
        }
        let mut done = Job::new_test(PLUGIN, ObjectSelector::None);
        done.transition(JobState::Stopped, 1).unwrap();
        h.store.insert(&done).await.unwrap();

        let outcome = h.engine.recover_unfinished_jobs().await.unwrap();
        let mut swept = outcome.swept.clone();
        swept.sort();
        leftovers.sort();
        assert_eq!(swept, leftovers);

        let cleanup_id = outcome.cleanup_job_id.unwrap();
        let cleanup = h.store.get(&cleanup_id).unwrap();
        assert_eq!(
            cleanup.source_objects,
            ObjectSelector::list(ObjectClass::Job, outcome.swept.clone())
        );
        assert_eq!(cleanup.plugin_type, PluginType::Internal);

        let store = h.store.clone();
        let ids = leftovers.clone();
        eventually("leftovers cleaned", || {
            ids.iter().all(|id| store.get(id).unwrap().state == JobState::Completed)
        })
        .await;
        for id in &leftovers {
            assert!(h.store.state_history(id).contains(&JobState::ToBeCleaned));
        }
        assert_eq!(h.store.get(&done.id).unwrap().state, JobState::Stopped);

        let jobs_now = h.store.all().len();
        let again = h.engine.recover_unfinished_jobs().await.unwrap();
        assert_eq!(again, RecoveryOutcome::default());
        assert_eq!(h.store.all().len(), jobs_now);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_blocks() {
        let engine_config = EngineConfig {
            block_size: 5,
            worker_pool_size: 2,
            shutdown_grace_secs: 5,
            ..EngineConfig::default()
        };
        let h = harness(
            engine_config,
            InMemoryCatalog::with_objects(ObjectClass::Aip, 50),
            PluginScript::succeeding().with_delay(Duration::from_millis(50)),
        );
        let job = aip_job();
        let id = job.id.clone();
        h.engine.submit(job, false).await.unwrap();

        let script = h.script.clone();
        eventually("blocks executing", || !script.executed_blocks().is_empty()).await;
        h.engine.shutdown().await;

        assert!(h.engine.stats().shutting_down);
        assert!(matches!(
            h.engine.submit(aip_job(), false).await,
            Err(AppError::ShuttingDown)
        ));

        let store = h.store.clone();
        eventually("job stopped", || {
            store.get(&id).map(|j| j.state) == Some(JobState::Stopped)
        })
        .await;
        assert!(h.script.executed_blocks().len() < 10);
    }

    #[tokio::test]
    async fn test_concurrent_submissions() {
        let h = harness(
            config(10),
            InMemoryCatalog::with_objects(ObjectClass::Aip, 20),
            PluginScript::succeeding(),
        );

        let job = aip_job();
        let results = join_all((0..5).map(|_| h.engine.submit(job.clone(), true))).await;
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, AppError::AlreadyStarted(_))));

        // More jobs than job slots, all queued and all finished
        let jobs: Vec<Job> = (0..6).map(|_| aip_job()).collect();
        let outcomes = join_all(jobs.into_iter().map(|job| h.engine.submit(job, true))).await;
        for outcome in outcomes {
            assert_eq!(finished(outcome.unwrap()), JobState::Completed);
        }
        assert_eq!(h.store.all().len(), 7);
    }

    #[tokio::test]
    async fn test_shutdown_grace_elapses_with_stuck_block() {
        let gate = Arc::new(Semaphore::new(0));
        let engine_config = EngineConfig {
            shutdown_grace_secs: 0,
            ..config(10)
        };
        let h = harness(
            engine_config,
            InMemoryCatalog::with_objects(ObjectClass::Aip, 3),
            PluginScript::succeeding().gated(gate.clone()),
        );
        h.engine.submit(aip_job(), false).await.unwrap();
        let script = h.script.clone();
        eventually("block executing", || script.executed_blocks().len() == 1).await;

        // Returns although the block never finishes
        tokio::time::timeout(Duration::from_secs(2), h.engine.shutdown())
            .await
            .expect("shutdown must not wait past the grace period");
        gate.add_permits(1);
    }
}
