// Application Layer - Orchestration engine and its collaborators

pub mod batcher;
pub mod config;
pub mod engine;
pub mod internal;
pub mod object_source;
pub mod plugin_registry;
pub mod recovery;
pub mod registry;
pub mod report;
pub mod tracker;
pub mod worker;

// Re-exports
pub use batcher::Batcher;
pub use config::{EngineConfig, OverflowPolicy};
pub use engine::{EnginePorts, EngineStats, OrchestrationEngine, SubmitOutcome};
pub use internal::{register_internal_plugins, CleanUnfinishedJobsPlugin, CLEAN_UNFINISHED_JOBS_PLUGIN_ID};
pub use object_source::{ObjectCursor, ObjectSource};
pub use plugin_registry::{PluginDescriptor, PluginRegistry};
pub use recovery::{RecoveryManager, RecoveryOutcome};
pub use registry::{JobPools, PoolCounts};
pub use report::JobStoreReportSink;
pub use tracker::JobSnapshot;
pub use worker::{shutdown_channel, ShutdownListener, ShutdownSignal, Worker};
