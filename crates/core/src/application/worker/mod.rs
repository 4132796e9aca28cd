// Worker - runs one plugin instance over one block

pub mod constants;
mod shutdown;

pub use shutdown::{shutdown_channel, ShutdownListener, ShutdownSignal};

use crate::domain::{Block, BlockIndex, JobId, JobPluginInfo, ObjectRef, PluginType, Report};
use crate::port::{
    IndexService, ModelService, Plugin, PluginContext, PluginError, ProgressReporter,
    StorageService,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Counters of a finished block plus the block-level error, if any
#[derive(Debug, Clone)]
pub struct BlockOutcome {
    pub info: JobPluginInfo,
    pub error: Option<String>,
}

/// Isolated execution context for blocks
///
/// Index, model and storage handles are injected once and shared by every
/// plugin call.
#[derive(Clone)]
pub struct Worker {
    index: Arc<dyn IndexService>,
    model: Arc<dyn ModelService>,
    storage: Arc<dyn StorageService>,
}

impl Worker {
    pub fn new(
        index: Arc<dyn IndexService>,
        model: Arc<dyn ModelService>,
        storage: Arc<dyn StorageService>,
    ) -> Self {
        Self {
            index,
            model,
            storage,
        }
    }

    pub fn context(
        &self,
        job_id: &JobId,
        block: Option<BlockIndex>,
        progress: Arc<dyn ProgressReporter>,
    ) -> PluginContext {
        PluginContext {
            job_id: job_id.clone(),
            block,
            index: self.index.clone(),
            model: self.model.clone(),
            storage: self.storage.clone(),
            progress,
        }
    }

    /// Execute `block` with a fresh plugin instance
    ///
    /// Never fails: unreadable objects, per-object failures, plugin errors and
    /// plugin panics all end up as failure counts in the returned outcome.
    pub async fn run_block(
        &self,
        job_id: &JobId,
        plugin_type: PluginType,
        mut plugin: Box<dyn Plugin>,
        block: Block,
        progress: Arc<dyn ProgressReporter>,
    ) -> BlockOutcome {
        let block_index = block.index();
        let mut info = JobPluginInfo::for_plugin_type(plugin_type, block.len() as u64);
        plugin.inject_job_plugin_info(info.clone());

        for item in block.unreadable() {
            debug!(
                job_id = %job_id,
                block = block_index,
                object_id = %item.reference.id,
                cause = item.cause.as_deref().unwrap_or_default(),
                "Skipping unreadable object"
            );
            count(&mut info, true);
        }

        let objects = block.readable();
        // Single-shot blocks are empty but still run the plugin once
        if objects.is_empty() && !block.is_empty() {
            return BlockOutcome { info, error: None };
        }

        let ctx = self.context(job_id, Some(block_index), progress);
        let task_objects = objects.clone();
        // Panic isolation: a plugin panic must not take the dispatch loop down
        let handle = tokio::spawn(async move {
            if let Err(e) = plugin.init().await {
                return Err(e);
            }
            let report = plugin.execute(&ctx, &task_objects).await;
            plugin.shutdown().await;
            report
        });

        match handle.await {
            Ok(Ok(report)) => {
                apply_report(&mut info, &objects, &report);
                BlockOutcome { info, error: None }
            }
            Ok(Err(e)) => {
                let failed = info.counters_mut().fail_remaining();
                warn!(job_id = %job_id, block = block_index, failed, error = %e, "Plugin failed on block");
                BlockOutcome {
                    info,
                    error: Some(e.to_string()),
                }
            }
            Err(join_err) => {
                let failed = info.counters_mut().fail_remaining();
                let reason = if join_err.is_panic() {
                    error!(job_id = %job_id, block = block_index, failed, "Plugin panicked: {:?}", join_err);
                    PluginError::Execution("plugin panicked".to_string())
                } else {
                    error!(job_id = %job_id, block = block_index, failed, "Plugin task cancelled");
                    PluginError::Execution("plugin task cancelled".to_string())
                };
                BlockOutcome {
                    info,
                    error: Some(reason.to_string()),
                }
            }
        }
    }
}

/// Objects missing from the report count as processed with success
fn apply_report(info: &mut JobPluginInfo, objects: &[ObjectRef], report: &Report) {
    let items: HashMap<&str, _> = report
        .items
        .iter()
        .map(|item| (item.source_object_id.as_str(), item))
        .collect();

    for object in objects {
        let item = items.get(object.id.as_str());
        let failed = item.map(|i| i.state.is_failure()).unwrap_or(false);
        count(info, failed);

        if let (Some(ingest), Some(item)) = (info.as_ingest_mut(), item) {
            if item.outcome_object_id.is_some() {
                ingest.record_outcome(item.manual_intervention);
            }
        }
    }
}

fn count(info: &mut JobPluginInfo, failed: bool) {
    let counters = info.counters_mut();
    let result = if failed {
        counters.increment_failure()
    } else {
        counters.increment_success()
    };
    if let Err(e) = result {
        warn!(error = %e, "Dropping object count beyond block size");
    }
}
