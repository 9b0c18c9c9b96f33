//! A narrow async trait over a transactional relational store. The execution
//! engine depends only on this trait, never on a storage product.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{Execution, ExecutionId, ExecutionStatus, Job, JobId, ScheduleChange};

/// The combined Execution + Job write the driver performs when a firing
/// reaches a terminal state. Must be applied atomically: a crash between the
/// two halves would leave an execution with no terminal status, or a job
/// whose `nextFireAt` never advances.
#[derive(Debug, Clone)]
pub struct TerminalUpdate {
    pub execution_id: ExecutionId,
    pub job_id: JobId,
    pub status: ExecutionStatus,
    pub response_status_code: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: i64,
    pub attempt_number: i32,
    pub completed_at: DateTime<Utc>,
    pub next_fire_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// List enabled jobs, used at boot to rehydrate the registry.
    async fn list_enabled_jobs(&self) -> Result<Vec<Job>, StoreError>;

    async fn fetch_job(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    async fn create_job(&self, job: &Job) -> Result<Job, StoreError>;

    async fn update_job(&self, job: &Job) -> Result<Job, StoreError>;

    async fn delete_job(&self, id: JobId) -> Result<bool, StoreError>;

    /// Sets `lifecycleStatus = RUNNING` and `lastFiredAt = firedAt`.
    async fn mark_job_running(&self, job_id: JobId, fired_at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Creates the Execution row in RUNNING state.
    async fn create_running_execution(
        &self,
        job_id: JobId,
        attempt_number: i32,
        started_at: DateTime<Utc>,
    ) -> Result<ExecutionId, StoreError>;

    /// The store's only cross-entity write: atomically terminates the
    /// Execution and updates the parent Job's `lifecycleStatus`/`nextFireAt`.
    async fn complete_execution(&self, update: TerminalUpdate) -> Result<(), StoreError>;

    async fn append_schedule_change(&self, change: ScheduleChange) -> Result<(), StoreError>;

    /// Last `limit` (up to 100) executions for a job, `startedAt` descending.
    async fn recent_executions(&self, job_id: JobId, limit: i64) -> Result<Vec<Execution>, StoreError>;
}
