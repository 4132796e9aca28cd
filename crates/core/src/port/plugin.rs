// Plugin Port - the contract a plugin must satisfy to be orchestrated

use crate::domain::{BlockIndex, JobId, JobPluginInfo, ObjectRef, PluginType, Report};
use crate::port::index::IndexService;
use crate::port::model::ModelService;
use crate::port::storage::StorageService;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Plugin contract errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("Missing mandatory parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Plugin init failed: {0}")]
    Init(String),

    #[error("Plugin execution failed: {0}")]
    Execution(String),
}

/// Declared plugin parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginParameter {
    pub name: String,
    pub description: String,
    pub mandatory: bool,
    pub default_value: Option<String>,
}

impl PluginParameter {
    pub fn mandatory(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            mandatory: true,
            default_value: None,
        }
    }

    pub fn optional(
        name: impl Into<String>,
        description: impl Into<String>,
        default_value: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            mandatory: false,
            default_value: Some(default_value.into()),
        }
    }
}

/// Check `values` against the declared parameters
///
/// Unknown keys are rejected, and mandatory parameters without a default must
/// be present.
pub fn validate_parameters(
    declared: &[PluginParameter],
    values: &BTreeMap<String, String>,
) -> Result<(), PluginError> {
    for key in values.keys() {
        if !declared.iter().any(|p| &p.name == key) {
            return Err(PluginError::InvalidParameter {
                name: key.clone(),
                reason: "not declared by plugin".to_string(),
            });
        }
    }
    for param in declared {
        if param.mandatory && param.default_value.is_none() && !values.contains_key(&param.name) {
            return Err(PluginError::MissingParameter(param.name.clone()));
        }
    }
    Ok(())
}

/// Push intermediate counters for the block being executed
pub trait ProgressReporter: Send + Sync {
    fn report(&self, info: JobPluginInfo);
}

/// Reporter that drops everything (job-level hooks have no block)
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _info: JobPluginInfo) {}
}

/// Handles injected into every plugin call
#[derive(Clone)]
pub struct PluginContext {
    pub job_id: JobId,
    pub block: Option<BlockIndex>,
    pub index: Arc<dyn IndexService>,
    pub model: Arc<dyn ModelService>,
    pub storage: Arc<dyn StorageService>,
    pub progress: Arc<dyn ProgressReporter>,
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("job_id", &self.job_id)
            .field("block", &self.block)
            .finish()
    }
}

/// Plugin trait
///
/// The engine creates a fresh instance per block (and one job-level instance
/// for the `before_all_execute` / `after_all_execute` hooks). Instances are
/// never reused across blocks.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn version(&self) -> &str;

    fn plugin_type(&self) -> PluginType;

    fn parameters(&self) -> Vec<PluginParameter> {
        Vec::new()
    }

    /// Parameter-validation hook, called before anything runs
    fn set_parameter_values(&mut self, values: &BTreeMap<String, String>) -> Result<(), PluginError> {
        validate_parameters(&self.parameters(), values)
    }

    /// Receive the counters seeded with this block's object count
    fn inject_job_plugin_info(&mut self, info: JobPluginInfo);

    async fn init(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    async fn before_all_execute(&mut self, _ctx: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Process one block
    ///
    /// Objects absent from the returned report count as processed with
    /// success; an `Err` fails every object of the block.
    async fn execute(&mut self, ctx: &PluginContext, objects: &[ObjectRef]) -> Result<Report, PluginError>;

    async fn after_all_execute(&mut self, _ctx: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    async fn shutdown(&mut self) {}
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::ReportItem;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Shared behaviour and recordings for every instance built from it
    pub struct PluginScript {
        pub plugin_type: PluginType,
        pub parameters: Vec<PluginParameter>,
        /// Objects reported as failures
        pub fail_ids: HashSet<String>,
        /// Panic when a block contains this object
        pub panic_on: Option<String>,
        /// Return `Err` from execute when a block contains this object
        pub error_on: Option<String>,
        /// Fail `init` with this message
        pub init_error: Option<String>,
        /// Fail `before_all_execute` with this message
        pub before_all_error: Option<String>,
        /// Push a progress snapshot after every object
        pub report_progress: bool,
        pub delay: Duration,
        /// When set, every execute call waits for one permit
        pub gate: Option<Arc<Semaphore>>,

        executed: Mutex<Vec<Vec<String>>>,
        injected: Mutex<Vec<JobPluginInfo>>,
        instances: AtomicUsize,
        init_calls: AtomicUsize,
        shutdown_calls: AtomicUsize,
        before_all_calls: AtomicUsize,
        after_all_calls: AtomicUsize,
    }

    impl PluginScript {
        pub fn new(plugin_type: PluginType) -> Self {
            Self {
                plugin_type,
                parameters: Vec::new(),
                fail_ids: HashSet::new(),
                panic_on: None,
                error_on: None,
                init_error: None,
                before_all_error: None,
                report_progress: false,
                delay: Duration::ZERO,
                gate: None,
                executed: Mutex::new(Vec::new()),
                injected: Mutex::new(Vec::new()),
                instances: AtomicUsize::new(0),
                init_calls: AtomicUsize::new(0),
                shutdown_calls: AtomicUsize::new(0),
                before_all_calls: AtomicUsize::new(0),
                after_all_calls: AtomicUsize::new(0),
            }
        }

        pub fn succeeding() -> Self {
            Self::new(PluginType::Misc)
        }

        pub fn failing_ids<I, S>(mut self, ids: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            self.fail_ids = ids.into_iter().map(Into::into).collect();
            self
        }

        pub fn panicking_on(mut self, id: impl Into<String>) -> Self {
            self.panic_on = Some(id.into());
            self
        }

        pub fn erroring_on(mut self, id: impl Into<String>) -> Self {
            self.error_on = Some(id.into());
            self
        }

        pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
            self.gate = Some(gate);
            self
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn with_parameters(mut self, parameters: Vec<PluginParameter>) -> Self {
            self.parameters = parameters;
            self
        }

        pub fn instantiate(self: &Arc<Self>) -> Box<dyn Plugin> {
            self.instances.fetch_add(1, Ordering::SeqCst);
            Box::new(ScriptedPlugin {
                script: self.clone(),
                info: None,
            })
        }

        /// Object ids per execute call, in call order
        pub fn executed_blocks(&self) -> Vec<Vec<String>> {
            self.executed.lock().unwrap().clone()
        }

        pub fn injected_infos(&self) -> Vec<JobPluginInfo> {
            self.injected.lock().unwrap().clone()
        }

        pub fn instances(&self) -> usize {
            self.instances.load(Ordering::SeqCst)
        }

        pub fn init_calls(&self) -> usize {
            self.init_calls.load(Ordering::SeqCst)
        }

        pub fn shutdown_calls(&self) -> usize {
            self.shutdown_calls.load(Ordering::SeqCst)
        }

        pub fn before_all_calls(&self) -> usize {
            self.before_all_calls.load(Ordering::SeqCst)
        }

        pub fn after_all_calls(&self) -> usize {
            self.after_all_calls.load(Ordering::SeqCst)
        }
    }

    /// Plugin whose behaviour is driven by a shared `PluginScript`
    pub struct ScriptedPlugin {
        script: Arc<PluginScript>,
        info: Option<JobPluginInfo>,
    }

    #[async_trait]
    impl Plugin for ScriptedPlugin {
        fn name(&self) -> &str {
            "Scripted plugin"
        }

        fn description(&self) -> &str {
            "Test plugin driven by a script"
        }

        fn version(&self) -> &str {
            "1.0"
        }

        fn plugin_type(&self) -> PluginType {
            self.script.plugin_type
        }

        fn parameters(&self) -> Vec<PluginParameter> {
            self.script.parameters.clone()
        }

        fn inject_job_plugin_info(&mut self, info: JobPluginInfo) {
            self.script.injected.lock().unwrap().push(info.clone());
            self.info = Some(info);
        }

        async fn init(&mut self) -> Result<(), PluginError> {
            self.script.init_calls.fetch_add(1, Ordering::SeqCst);
            match &self.script.init_error {
                Some(msg) => Err(PluginError::Init(msg.clone())),
                None => Ok(()),
            }
        }

        async fn before_all_execute(&mut self, _ctx: &PluginContext) -> Result<(), PluginError> {
            self.script.before_all_calls.fetch_add(1, Ordering::SeqCst);
            match &self.script.before_all_error {
                Some(msg) => Err(PluginError::Execution(msg.clone())),
                None => Ok(()),
            }
        }

        async fn execute(&mut self, ctx: &PluginContext, objects: &[ObjectRef]) -> Result<Report, PluginError> {
            let ids: Vec<String> = objects.iter().map(|o| o.id.clone()).collect();
            self.script.executed.lock().unwrap().push(ids.clone());

            if let Some(gate) = &self.script.gate {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
            if !self.script.delay.is_zero() {
                tokio::time::sleep(self.script.delay).await;
            }
            if let Some(id) = &self.script.panic_on {
                if ids.contains(id) {
                    panic!("scripted panic on {}", id);
                }
            }
            if let Some(id) = &self.script.error_on {
                if ids.contains(id) {
                    return Err(PluginError::Execution(format!("scripted error on {}", id)));
                }
            }

            let mut report = Report::new();
            for id in &ids {
                let failed = self.script.fail_ids.contains(id);
                report.push(if failed {
                    ReportItem::failure(id.clone(), "scripted failure")
                } else {
                    ReportItem::success(id.clone())
                });

                if let Some(info) = self.info.as_mut() {
                    let counters = info.counters_mut();
                    let _ = if failed {
                        counters.increment_failure()
                    } else {
                        counters.increment_success()
                    };
                    if self.script.report_progress {
                        ctx.progress.report(info.clone());
                    }
                }
            }
            Ok(report)
        }

        async fn after_all_execute(&mut self, _ctx: &PluginContext) -> Result<(), PluginError> {
            self.script.after_all_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn shutdown(&mut self) {
            self.script.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        }
    }
}
