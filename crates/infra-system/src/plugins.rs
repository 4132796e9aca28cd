// Storage-backed plugins

use async_trait::async_trait;
use reliquary_core::application::PluginRegistry;
use reliquary_core::domain::{JobPluginInfo, ObjectRef, PluginType, Report, ReportItem};
use reliquary_core::port::{Plugin, PluginContext, PluginError, PluginParameter, StoragePath};
use std::collections::BTreeMap;
use tracing::debug;

pub const VERIFY_STORAGE_PLUGIN_ID: &str = "storage.verify-presence";

const PREFIX_PARAMETER: &str = "prefix";
const DEFAULT_PREFIX: &str = "objects";

/// Checks that every object has its binary at `<prefix>/<CLASS>/<id>`
#[derive(Default)]
pub struct VerifyStoragePlugin {
    prefix: Option<String>,
    info: Option<JobPluginInfo>,
}

impl VerifyStoragePlugin {
    pub fn new() -> Self {
        Self::default()
    }

    fn location(&self, object: &ObjectRef) -> StoragePath {
        StoragePath::parse(self.prefix.as_deref().unwrap_or(DEFAULT_PREFIX))
            .child(object.class.as_str())
            .child(object.id.clone())
    }
}

#[async_trait]
impl Plugin for VerifyStoragePlugin {
    fn name(&self) -> &str {
        "Verify storage presence"
    }

    fn description(&self) -> &str {
        "Reports objects whose binary is missing from storage"
    }

    fn version(&self) -> &str {
        "1.0"
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::Misc
    }

    fn parameters(&self) -> Vec<PluginParameter> {
        vec![PluginParameter::optional(
            PREFIX_PARAMETER,
            "Storage directory holding one sub-directory per object class",
            DEFAULT_PREFIX,
        )]
    }

    fn set_parameter_values(&mut self, values: &BTreeMap<String, String>) -> Result<(), PluginError> {
        reliquary_core::port::validate_parameters(&self.parameters(), values)?;
        if let Some(prefix) = values.get(PREFIX_PARAMETER) {
            if StoragePath::parse(prefix).segments().is_empty() {
                return Err(PluginError::InvalidParameter {
                    name: PREFIX_PARAMETER.to_string(),
                    reason: "must name a directory".to_string(),
                });
            }
            self.prefix = Some(prefix.clone());
        }
        Ok(())
    }

    fn inject_job_plugin_info(&mut self, info: JobPluginInfo) {
        self.info = Some(info);
    }

    async fn execute(&mut self, ctx: &PluginContext, objects: &[ObjectRef]) -> Result<Report, PluginError> {
        let mut report = Report::new();
        for object in objects {
            let location = self.location(object);
            let item = match ctx.storage.exists(&location).await {
                Ok(true) => ReportItem::success(object.id.clone()),
                Ok(false) => ReportItem::failure(object.id.clone(), format!("{} is missing", location)),
                Err(e) => ReportItem::failure(object.id.clone(), e.to_string()),
            };

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
        debug!(job_id = %ctx.job_id, block = ?ctx.block, checked = objects.len(), "Storage verified");
        Ok(report)
    }
}

/// Register the plugins this crate provides
pub fn register_system_plugins(registry: &mut PluginRegistry) {
    registry.register(VERIFY_STORAGE_PLUGIN_ID, || Box::new(VerifyStoragePlugin::new()));
}
