// Migration Runner

use crate::error::map_sqlx_error;
use reliquary_core::error::Result;
use sqlx::SqlitePool;
use tracing::info;

const MIGRATIONS: &[(i64, &str, &str)] = &[
    (1, "Job records", include_str!("../migrations/001_jobs.sql")),
    (2, "Object catalog", include_str!("../migrations/002_objects.sql")),
];

/// Apply every migration newer than the recorded schema version
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = current_version(pool).await?;
    info!(current_version, "Running database migrations");

    for (version, name, sql) in MIGRATIONS {
        if *version <= current_version {
            continue;
        }
        info!(version, name, "Applying migration");
        apply_migration(pool, sql).await?;
    }

    info!("All migrations applied");
    Ok(())
}

pub async fn current_version(pool: &SqlitePool) -> Result<i64> {
    let table_exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
    )
    .fetch_one(pool)
    .await
    .map_err(map_sqlx_error)?;
    if table_exists == 0 {
        return Ok(0);
    }

    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await
        .map_err(map_sqlx_error)?;
    Ok(version.unwrap_or(0))
}

/// Statements are split on ';', so migration files keep it out of comments
async fn apply_migration(pool: &SqlitePool, sql: &str) -> Result<()> {
    let mut tx = pool.begin().await.map_err(map_sqlx_error)?;

    for statement in sql.split(';') {
        let clean_statement = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let clean_statement = clean_statement.trim();

        if !clean_statement.is_empty() {
            sqlx::query(clean_statement)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }
    }

    tx.commit().await.map_err(map_sqlx_error)?;
    Ok(())
}
