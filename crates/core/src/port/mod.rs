// Port Layer - Interfaces for external collaborators

pub mod id_provider; // For deterministic testing
pub mod index;
pub mod job_store;
pub mod model;
pub mod plugin;
pub mod report_sink;
pub mod storage;
pub mod time_provider;

// Re-exports
pub use id_provider::IdProvider;
pub use index::{IndexPage, IndexService, Sorter, Sublist};
pub use job_store::JobStore;
pub use model::{ModelService, ObjectListing};
pub use plugin::{
    validate_parameters, NoopProgress, Plugin, PluginContext, PluginError, PluginParameter,
    ProgressReporter,
};
pub use report_sink::ReportSink;
pub use storage::{StoragePath, StorageService};
pub use time_provider::TimeProvider;
