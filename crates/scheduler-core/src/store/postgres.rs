//! PostgreSQL implementation of `ExecutionStore`, built on explicit
//! `sqlx::query`/`query_as` binds and `RETURNING` clauses rather than an ORM.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::StoreError;
use crate::models::{Execution, ExecutionId, Job, JobId, ScheduleChange};

use super::{ExecutionStore, TerminalUpdate};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a lazily-connecting pool from a database URL, matching this
    /// codebase's `PgPool::connect_lazy` usage at process start.
    pub fn connect_lazy(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(database_url)
            .map_err(StoreError::Database)?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl ExecutionStore for PostgresStore {
    async fn list_enabled_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let jobs = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE enabled = TRUE")
            .fetch_all(&self.pool)
            .await?;
        Ok(jobs)
    }

    async fn fetch_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn create_job(&self, job: &Job) -> Result<Job, StoreError> {
        let headers = serde_json::to_value(&job.headers)?;
        let query_params = serde_json::to_value(&job.query_params)?;
        let created = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (
                id, name, description, cron_expression, timezone, target_url, http_method,
                headers, body, query_params, enabled, retry_budget, per_attempt_timeout_ms,
                owner_id, created_at, updated_at, lifecycle_status, last_fired_at, next_fire_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(&job.name)
        .bind(&job.description)
        .bind(&job.cron_expression)
        .bind(&job.timezone)
        .bind(&job.target_url)
        .bind(job.http_method)
        .bind(headers)
        .bind(&job.body)
        .bind(query_params)
        .bind(job.enabled)
        .bind(job.retry_budget)
        .bind(job.per_attempt_timeout_ms)
        .bind(&job.owner_id)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.lifecycle_status)
        .bind(job.last_fired_at)
        .bind(job.next_fire_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn update_job(&self, job: &Job) -> Result<Job, StoreError> {
        let headers = serde_json::to_value(&job.headers)?;
        let query_params = serde_json::to_value(&job.query_params)?;
        let updated = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs SET
                name = $2, description = $3, cron_expression = $4, timezone = $5,
                target_url = $6, http_method = $7, headers = $8, body = $9, query_params = $10,
                enabled = $11, retry_budget = $12, per_attempt_timeout_ms = $13, updated_at = $14,
                lifecycle_status = $15, last_fired_at = $16, next_fire_at = $17
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(&job.name)
        .bind(&job.description)
        .bind(&job.cron_expression)
        .bind(&job.timezone)
        .bind(&job.target_url)
        .bind(job.http_method)
        .bind(headers)
        .bind(&job.body)
        .bind(query_params)
        .bind(job.enabled)
        .bind(job.retry_budget)
        .bind(job.per_attempt_timeout_ms)
        .bind(job.updated_at)
        .bind(job.lifecycle_status)
        .bind(job.last_fired_at)
        .bind(job.next_fire_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(job.id))?;
        Ok(updated)
    }

    async fn delete_job(&self, id: JobId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_job_running(&self, job_id: JobId, fired_at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE jobs SET lifecycle_status = 'RUNNING', last_fired_at = $2 WHERE id = $1")
            .bind(job_id)
            .bind(fired_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_running_execution(
        &self,
        job_id: JobId,
        attempt_number: i32,
        started_at: DateTime<Utc>,
    ) -> Result<ExecutionId, StoreError> {
        let execution = Execution::new_running(job_id, attempt_number, started_at);
        sqlx::query(
            r#"
            INSERT INTO executions (id, job_id, started_at, status, attempt_number)
            VALUES ($1, $2, $3, 'RUNNING', $4)
            "#,
        )
        .bind(execution.id)
        .bind(execution.job_id)
        .bind(execution.started_at)
        .bind(execution.attempt_number)
        .execute(&self.pool)
        .await?;
        Ok(execution.id)
    }

    /// The store's only cross-entity write: both statements run inside one
    /// transaction so the Execution and its parent Job never observably
    /// diverge.
    async fn complete_execution(&self, update: TerminalUpdate) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE executions SET
                status = $2, completed_at = $3, response_status_code = $4,
                response_body = $5, error_message = $6, duration_ms = $7, attempt_number = $8
            WHERE id = $1
            "#,
        )
        .bind(update.execution_id)
        .bind(update.status)
        .bind(update.completed_at)
        .bind(update.response_status_code)
        .bind(&update.response_body)
        .bind(&update.error_message)
        .bind(update.duration_ms)
        .bind(update.attempt_number)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE jobs SET lifecycle_status = $2, next_fire_at = $3 WHERE id = $1")
            .bind(update.job_id)
            .bind(update.status.as_job_lifecycle())
            .bind(update.next_fire_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn append_schedule_change(&self, change: ScheduleChange) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO schedule_changes (id, job_id, old_expression, new_expression, reason, author, changed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(change.id)
        .bind(change.job_id)
        .bind(&change.old_expression)
        .bind(&change.new_expression)
        .bind(&change.reason)
        .bind(&change.author)
        .bind(change.changed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_executions(&self, job_id: JobId, limit: i64) -> Result<Vec<Execution>, StoreError> {
        let executions = sqlx::query_as::<_, Execution>(
            "SELECT * FROM executions WHERE job_id = $1 ORDER BY started_at DESC LIMIT $2",
        )
        .bind(job_id)
        .bind(limit.min(100))
        .fetch_all(&self.pool)
        .await?;
        Ok(executions)
    }
}
