// SQLite JobStore Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use reliquary_core::domain::{
    DomainError, Job, JobId, JobState, JobStats, ObjectSelector, PluginType,
};
use reliquary_core::error::{AppError, Result};
use reliquary_core::port::JobStore;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::BTreeMap;
use tracing::debug;

const JOB_COLUMNS: &str = r#"
    id, name, plugin, plugin_type, plugin_parameters, username, source_objects,
    state, state_details, created_at, started_at, ended_at,
    source_objects_count, source_objects_waiting, source_objects_success,
    source_objects_failure, outcome_objects_manual_intervention, completion_percentage
"#;

pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn current_state(&self, id: &JobId) -> Result<Option<JobState>> {
        let state: Option<String> = sqlx::query_scalar("SELECT state FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(state.map(|s| s.parse()).transpose()?)
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        let parameters = serde_json::to_string(&job.plugin_parameters)?;
        let source_objects = serde_json::to_string(&job.source_objects)?;

        sqlx::query(&format!(
            "INSERT INTO jobs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            JOB_COLUMNS
        ))
        .bind(&job.id)
        .bind(&job.name)
        .bind(&job.plugin)
        .bind(job.plugin_type.as_str())
        .bind(&parameters)
        .bind(&job.username)
        .bind(&source_objects)
        .bind(job.state.as_str())
        .bind(&job.state_details)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.ended_at)
        .bind(job.stats.source_objects_count as i64)
        .bind(job.stats.source_objects_waiting_to_be_processed as i64)
        .bind(job.stats.source_objects_processed_with_success as i64)
        .bind(job.stats.source_objects_processed_with_failure as i64)
        .bind(job.stats.outcome_objects_with_manual_intervention as i64)
        .bind(job.stats.completion_percentage as i64)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn update(&self, job: &Job) -> Result<()> {
        let parameters = serde_json::to_string(&job.plugin_parameters)?;
        let source_objects = serde_json::to_string(&job.source_objects)?;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET name = ?, plugin = ?, plugin_type = ?, plugin_parameters = ?, username = ?,
                source_objects = ?, state = ?, state_details = ?,
                started_at = ?, ended_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&job.name)
        .bind(&job.plugin)
        .bind(job.plugin_type.as_str())
        .bind(&parameters)
        .bind(&job.username)
        .bind(&source_objects)
        .bind(job.state.as_str())
        .bind(&job.state_details)
        .bind(job.started_at)
        .bind(job.ended_at)
        .bind(&job.id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Job {} not found", job.id)));
        }
        self.update_stats(&job.id, &job.stats).await
    }

    async fn update_state(
        &self,
        id: &JobId,
        state: JobState,
        details: Option<String>,
        at_millis: i64,
    ) -> Result<()> {
        // Conditional update: the row only changes from a legal predecessor
        let allowed = state.allowed_from();
        if !allowed.is_empty() {
            let started_at = (state == JobState::Running).then_some(at_millis);
            let ended_at = state.is_final().then_some(at_millis);

            let mut query = QueryBuilder::<Sqlite>::new("UPDATE jobs SET state = ");
            query.push_bind(state.as_str());
            query.push(", state_details = COALESCE(");
            query.push_bind(details);
            query.push(", state_details), started_at = COALESCE(started_at, ");
            query.push_bind(started_at);
            query.push("), ended_at = COALESCE(");
            query.push_bind(ended_at);
            query.push(", ended_at) WHERE id = ");
            query.push_bind(id.clone());
            query.push(" AND state IN (");
            let mut states = query.separated(", ");
            for from in allowed {
                states.push_bind(from.as_str());
            }
            states.push_unseparated(")");

            let result = query
                .build()
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            if result.rows_affected() > 0 {
                debug!(job_id = %id, state = %state, "Job state persisted");
                return Ok(());
            }
        }

        match self.current_state(id).await? {
            None => Err(AppError::NotFound(format!("Job {} not found", id))),
            Some(current) if current == state => Ok(()),
            Some(current) => Err(DomainError::InvalidStateTransition {
                from: current.to_string(),
                to: state.to_string(),
            }
            .into()),
        }
    }

    async fn update_stats(&self, id: &JobId, stats: &JobStats) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET source_objects_count = ?, source_objects_waiting = ?,
                source_objects_success = ?, source_objects_failure = ?,
                outcome_objects_manual_intervention = ?, completion_percentage = ?
            WHERE id = ?
            "#,
        )
        .bind(stats.source_objects_count as i64)
        .bind(stats.source_objects_waiting_to_be_processed as i64)
        .bind(stats.source_objects_processed_with_success as i64)
        .bind(stats.source_objects_processed_with_failure as i64)
        .bind(stats.outcome_objects_with_manual_intervention as i64)
        .bind(stats.completion_percentage as i64)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Job {} not found", id)));
        }
        Ok(())
    }

    async fn find_by_state(&self, state: JobState) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {} FROM jobs WHERE state = ? ORDER BY created_at ASC, id ASC",
            JOB_COLUMNS
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn find_unfinished(&self) -> Result<Vec<Job>> {
        let mut query = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM jobs WHERE state NOT IN (", JOB_COLUMNS));
        let mut states = query.separated(", ");
        for state in JobState::ALL.iter().filter(|s| s.is_final()) {
            states.push_bind(state.as_str());
        }
        states.push_unseparated(") ORDER BY created_at ASC, id ASC");

        let rows: Vec<JobRow> = query
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn count_by_state(&self, state: JobState) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE state = ?")
            .bind(state.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    name: String,
    plugin: String,
    plugin_type: String,
    plugin_parameters: String,
    username: String,
    source_objects: String,
    state: String,
    state_details: Option<String>,
    created_at: i64,
    started_at: Option<i64>,
    ended_at: Option<i64>,
    source_objects_count: i64,
    source_objects_waiting: i64,
    source_objects_success: i64,
    source_objects_failure: i64,
    outcome_objects_manual_intervention: i64,
    completion_percentage: i64,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let plugin_type: PluginType = self.plugin_type.parse()?;
        let state: JobState = self.state.parse()?;
        let plugin_parameters: BTreeMap<String, String> =
            serde_json::from_str(&self.plugin_parameters)?;
        let source_objects: ObjectSelector = serde_json::from_str(&self.source_objects)?;

        Ok(Job {
            id: self.id,
            name: self.name,
            plugin: self.plugin,
            plugin_type,
            plugin_parameters,
            username: self.username,
            source_objects,
            state,
            state_details: self.state_details,
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            stats: JobStats {
                source_objects_count: count(self.source_objects_count),
                source_objects_waiting_to_be_processed: count(self.source_objects_waiting),
                source_objects_processed_with_success: count(self.source_objects_success),
                source_objects_processed_with_failure: count(self.source_objects_failure),
                outcome_objects_with_manual_intervention: count(
                    self.outcome_objects_manual_intervention,
                ),
                completion_percentage: self.completion_percentage.clamp(0, 100) as u8,
            },
        })
    }
}

fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use reliquary_core::domain::{Filter, ObjectClass};

    async fn setup_test_db() -> SqliteJobStore {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteJobStore::new(pool)
    }

    fn sample_job() -> Job {
        Job::new_test(
            "reindex",
            ObjectSelector::Filter {
                class: ObjectClass::Aip,
                filter: Filter::all().with("state", "ACTIVE"),
            },
        )
        .with_parameter("scope", "full")
        .with_username("curator")
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = setup_test_db().await;
        let job = sample_job();
        store.insert(&job).await.unwrap();

        let found = store.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(found.id, job.id);
        assert_eq!(found.plugin, "reindex");
        assert_eq!(found.username, "curator");
        assert_eq!(found.state, JobState::Created);
        assert_eq!(found.source_objects, job.source_objects);
        assert_eq!(found.plugin_parameters.get("scope").map(String::as_str), Some("full"));

        assert!(store.find_by_id(&"missing".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_fails() {
        let store = setup_test_db().await;
        let job = sample_job();
        store.insert(&job).await.unwrap();

        let err = store.insert(&job).await.unwrap_err();
        assert!(err.to_string().contains("Unique constraint"), "{}", err);
    }

    #[tokio::test]
    async fn test_update_state_stamps_times() {
        let store = setup_test_db().await;
        let job = sample_job();
        store.insert(&job).await.unwrap();

        store
            .update_state(&job.id, JobState::Running, None, 1_000)
            .await
            .unwrap();
        store
            .update_state(&job.id, JobState::Completed, Some("done".into()), 2_000)
            .await
            .unwrap();

        let found = store.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(found.state, JobState::Completed);
        assert_eq!(found.started_at, Some(1_000));
        assert_eq!(found.ended_at, Some(2_000));
        assert_eq!(found.state_details.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_update_state_rejects_illegal_transition() {
        let store = setup_test_db().await;
        let job = sample_job();
        store.insert(&job).await.unwrap();
        store
            .update_state(&job.id, JobState::Stopped, None, 1)
            .await
            .unwrap();

        // Terminal states never move again
        let err = store
            .update_state(&job.id, JobState::Running, None, 2)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Domain(DomainError::InvalidStateTransition { .. })
        ));

        // Same state is a no-op
        store
            .update_state(&job.id, JobState::Stopped, None, 3)
            .await
            .unwrap();
        let found = store.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(found.ended_at, Some(1));
    }

    #[tokio::test]
    async fn test_update_state_unknown_job() {
        let store = setup_test_db().await;
        let err = store
            .update_state(&"ghost".to_string(), JobState::Running, None, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_stats() {
        let store = setup_test_db().await;
        let job = sample_job();
        store.insert(&job).await.unwrap();

        let stats = JobStats {
            source_objects_count: 250,
            source_objects_waiting_to_be_processed: 50,
            source_objects_processed_with_success: 197,
            source_objects_processed_with_failure: 3,
            outcome_objects_with_manual_intervention: 0,
            completion_percentage: 80,
        };
        store.update_stats(&job.id, &stats).await.unwrap();

        let found = store.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(found.stats, stats);
    }

    #[tokio::test]
    async fn test_find_unfinished_and_counts() {
        let store = setup_test_db().await;
        let created = sample_job();
        let running = sample_job();
        let done = sample_job();
        for job in [&created, &running, &done] {
            store.insert(job).await.unwrap();
        }
        store
            .update_state(&running.id, JobState::Running, None, 1)
            .await
            .unwrap();
        store
            .update_state(&done.id, JobState::FailedToComplete, None, 1)
            .await
            .unwrap();

        let mut unfinished: Vec<JobId> = store
            .find_unfinished()
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        unfinished.sort();
        let mut expected = vec![created.id.clone(), running.id.clone()];
        expected.sort();
        assert_eq!(unfinished, expected);

        assert_eq!(store.count_by_state(JobState::Running).await.unwrap(), 1);
        assert_eq!(
            store.find_by_state(JobState::FailedToComplete).await.unwrap()[0].id,
            done.id
        );
    }
}
