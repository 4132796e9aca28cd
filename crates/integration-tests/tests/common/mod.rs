//! Shared wiring for the integration tests: SQLite store and catalog,
//! filesystem storage under a scratch directory, and an engine builder.
#![allow(dead_code)]

use reliquary_core::application::{
    register_internal_plugins, EngineConfig, EnginePorts, OrchestrationEngine, PluginRegistry,
};
use reliquary_core::domain::{JobState, ObjectClass};
use reliquary_core::port::id_provider::UuidProvider;
use reliquary_core::port::time_provider::SystemTimeProvider;
use reliquary_core::port::{IdProvider, JobStore, StoragePath, StorageService, TimeProvider};
use reliquary_infra_sqlite::{create_pool, run_migrations, SqliteJobStore, SqliteObjectCatalog};
use reliquary_infra_system::{register_system_plugins, FsStorageService};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub struct TestEnv {
    pub pool: SqlitePool,
    pub store: Arc<SqliteJobStore>,
    pub catalog: Arc<SqliteObjectCatalog>,
    pub storage: Arc<FsStorageService>,
    pub time_provider: Arc<dyn TimeProvider>,
    pub id_provider: Arc<dyn IdProvider>,
    scratch: PathBuf,
}

impl TestEnv {
    /// In-memory database
    pub async fn new() -> Self {
        Self::with_database("sqlite::memory:").await
    }

    pub async fn with_database(url: &str) -> Self {
        let pool = create_pool(url).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let scratch = scratch_dir("storage");
        std::fs::create_dir_all(&scratch).unwrap();

        Self {
            store: Arc::new(SqliteJobStore::new(pool.clone())),
            catalog: Arc::new(SqliteObjectCatalog::new(pool.clone())),
            storage: Arc::new(FsStorageService::new(&scratch)),
            time_provider: Arc::new(SystemTimeProvider),
            id_provider: Arc::new(UuidProvider),
            pool,
            scratch,
        }
    }

    /// Internal and storage plugins, plus whatever `extra` registers
    pub fn registry(&self, extra: impl FnOnce(&mut PluginRegistry)) -> Arc<PluginRegistry> {
        let mut registry = PluginRegistry::new();
        register_internal_plugins(&mut registry, self.store.clone(), self.time_provider.clone());
        register_system_plugins(&mut registry);
        extra(&mut registry);
        Arc::new(registry)
    }

    pub fn engine(&self, config: EngineConfig, plugins: Arc<PluginRegistry>) -> OrchestrationEngine {
        OrchestrationEngine::new(
            config,
            EnginePorts {
                job_store: self.store.clone(),
                index: self.catalog.clone(),
                model: self.catalog.clone(),
                storage: self.storage.clone(),
                time_provider: self.time_provider.clone(),
                id_provider: self.id_provider.clone(),
            },
            plugins,
        )
        .unwrap()
    }

    /// Catalog `count` AIPs named `aip-000`, `aip-001`, ...
    pub async fn seed_aips(&self, count: usize) -> Vec<String> {
        let ids: Vec<String> = (0..count).map(|i| format!("aip-{:03}", i)).collect();
        for id in &ids {
            self.catalog
                .insert_object(ObjectClass::Aip, id, None, Some("Seeded AIP"), 1_000)
                .await
                .unwrap();
        }
        ids
    }

    /// Write a binary for each AIP where the storage plugin looks for it
    pub async fn store_binaries<'a>(&self, ids: impl IntoIterator<Item = &'a String>) {
        for id in ids {
            let path = StoragePath::parse("objects/AIP").child(id.clone());
            self.storage.write_binary(&path, id.as_bytes()).await.unwrap();
        }
    }

    pub async fn state_of(&self, job_id: &str) -> JobState {
        self.store
            .find_by_id(&job_id.to_string())
            .await
            .unwrap()
            .unwrap()
            .state
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.scratch);
    }
}

pub fn scratch_dir(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("reliquary-it-{}-{}", label, uuid::Uuid::new_v4()))
}

pub fn config(block_size: usize) -> EngineConfig {
    EngineConfig {
        block_size,
        ..EngineConfig::default()
    }
}

/// Poll the store until `job_id` reaches `expected`
pub async fn wait_for_state(env: &TestEnv, job_id: &str, expected: JobState) {
    for _ in 0..300 {
        if env.state_of(job_id).await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "job {} never reached {} (last seen {})",
        job_id,
        expected,
        env.state_of(job_id).await
    );
}
