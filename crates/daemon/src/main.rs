//! Reliquary - Main Entry Point
//! Job orchestrator daemon: SQLite store + catalog, filesystem storage, JSON-RPC API

mod settings;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use reliquary_api_rpc::{RpcHandler, RpcServer, RpcServerConfig};
use reliquary_core::application::{
    register_internal_plugins, EnginePorts, OrchestrationEngine, PluginRegistry,
};
use reliquary_core::port::id_provider::UuidProvider;
use reliquary_core::port::time_provider::SystemTimeProvider;
use reliquary_core::port::{IdProvider, JobStore, TimeProvider};
use reliquary_infra_sqlite::{create_pool, run_migrations, SqliteJobStore, SqliteObjectCatalog};
use reliquary_infra_system::{register_system_plugins, FsStorageService};
use settings::Settings;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Logging
    let log_format = std::env::var("RELIQUARY_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("reliquary=info"))
        .context("Failed to create env filter")?;

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }

    info!("Reliquary v{} starting...", VERSION);

    // 2. Configuration
    let settings = Settings::load()?;

    info!(db_path = %settings.database.path, "Initializing database...");
    if let Some(parent) = Path::new(&settings.database.path).parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    // 3. Database
    let pool = create_pool(&settings.database_url())
        .await
        .context("DB pool creation failed")?;
    run_migrations(&pool).await.context("Migration failed")?;

    // 4. Dependencies (DI wiring)
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let id_provider: Arc<dyn IdProvider> = Arc::new(UuidProvider);
    let job_store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(pool.clone()));
    let catalog = Arc::new(SqliteObjectCatalog::new(pool.clone()));
    let storage = Arc::new(FsStorageService::new(&settings.storage.root));

    let mut plugins = PluginRegistry::new();
    register_internal_plugins(&mut plugins, job_store.clone(), time_provider.clone());
    register_system_plugins(&mut plugins);
    info!(plugins = ?plugins.ids(), "Plugins registered");

    let engine = OrchestrationEngine::new(
        settings.engine.clone(),
        EnginePorts {
            job_store: job_store.clone(),
            index: catalog.clone(),
            model: catalog,
            storage,
            time_provider: time_provider.clone(),
            id_provider: id_provider.clone(),
        },
        Arc::new(plugins),
    )
    .context("Engine configuration rejected")?;

    // 5. Crash recovery
    info!("Running crash recovery...");
    match engine.recover_unfinished_jobs().await {
        Ok(outcome) => info!(
            swept = outcome.swept.len(),
            cleanup_job_id = ?outcome.cleanup_job_id,
            "Crash recovery completed"
        ),
        Err(e) => error!(error = ?e, "Crash recovery failed"),
    }

    // 6. JSON-RPC server
    let rpc_server = RpcServer::new(
        RpcServerConfig {
            host: settings.rpc.host.clone(),
            port: settings.rpc.port,
        },
        RpcHandler::new(engine.clone(), job_store, id_provider, time_provider),
    );
    let (rpc_addr, rpc_handle) = rpc_server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    info!(%rpc_addr, "System ready. Press Ctrl+C to shutdown");

    // 7. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Stopping running jobs...");

    // 8. Graceful shutdown: refuse new RPC work, then drain the engine
    rpc_handle
        .stop()
        .map_err(|e| anyhow::anyhow!("RPC server stop failed: {}", e))?;
    engine.shutdown().await;
    pool.close().await;

    info!("Shutdown complete.");

    Ok(())
}
