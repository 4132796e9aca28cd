// Domain Layer - Pure business logic and entities

pub mod block;
pub mod error;
pub mod job;
pub mod plugin_info;
pub mod report;

// Re-exports
pub use block::{Block, BlockIndex, BlockItem, ObjectRef};
pub use error::DomainError;
pub use job::{
    Filter, FilterParameter, Job, JobId, JobState, JobStats, ObjectClass, ObjectSelector,
    PluginId, PluginType,
};
pub use plugin_info::{IngestJobPluginInfo, JobPluginInfo, SimpleJobPluginInfo};
pub use report::{PluginState, Report, ReportItem};
