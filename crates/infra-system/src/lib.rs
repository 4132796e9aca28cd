// Reliquary Infrastructure - System Adapters
// Implements: StorageService (local filesystem), storage-backed plugins

pub mod fs_storage;
pub mod plugins;

pub use fs_storage::FsStorageService;
pub use plugins::{register_system_plugins, VerifyStoragePlugin, VERIFY_STORAGE_PLUGIN_ID};
