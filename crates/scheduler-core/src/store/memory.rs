//! In-memory `ExecutionStore` test double. Same hand-rolled-mock-over-a-trait
//! shape as this codebase's `dunning_job` tests use for `SubscriptionRepository`,
//! adapted to hold plain `HashMap`s behind a `Mutex` instead of faking Redis.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{Execution, ExecutionId, ExecutionStatus, Job, JobId, LifecycleStatus, ScheduleChange};

use super::{ExecutionStore, TerminalUpdate};

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    executions: HashMap<ExecutionId, Execution>,
    schedule_changes: Vec<ScheduleChange>,
}

/// Thread-safe in-memory store. Not persistent; intended for tests only.
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self { state: Mutex::new(State::default()) }
    }

    /// Test helper: seed a job directly, bypassing `create_job`.
    pub fn seed_job(&self, job: Job) {
        self.state.lock().unwrap().jobs.insert(job.id, job);
    }

    /// Test helper: seed an execution row directly.
    pub fn seed_execution(&self, execution: Execution) {
        self.state.lock().unwrap().executions.insert(execution.id, execution);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn list_enabled_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.jobs.values().filter(|j| j.enabled).cloned().collect())
    }

    async fn fetch_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.state.lock().unwrap().jobs.get(&id).cloned())
    }

    async fn create_job(&self, job: &Job) -> Result<Job, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.jobs.insert(job.id, job.clone());
        Ok(job.clone())
    }

    async fn update_job(&self, job: &Job) -> Result<Job, StoreError> {
        let mut state = self.state.lock().unwrap();
        if !state.jobs.contains_key(&job.id) {
            return Err(StoreError::NotFound(job.id));
        }
        state.jobs.insert(job.id, job.clone());
        Ok(job.clone())
    }

    async fn delete_job(&self, id: JobId) -> Result<bool, StoreError> {
        Ok(self.state.lock().unwrap().jobs.remove(&id).is_some())
    }

    async fn mark_job_running(&self, job_id: JobId, fired_at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let job = state.jobs.get_mut(&job_id).ok_or(StoreError::NotFound(job_id))?;
        job.lifecycle_status = LifecycleStatus::Running;
        job.last_fired_at = Some(fired_at);
        Ok(())
    }

    async fn create_running_execution(
        &self,
        job_id: JobId,
        attempt_number: i32,
        started_at: DateTime<Utc>,
    ) -> Result<ExecutionId, StoreError> {
        let execution = Execution::new_running(job_id, attempt_number, started_at);
        let id = execution.id;
        self.state.lock().unwrap().executions.insert(id, execution);
        Ok(id)
    }

    async fn complete_execution(&self, update: TerminalUpdate) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        {
            let execution = state
                .executions
                .get_mut(&update.execution_id)
                .ok_or_else(|| StoreError::NotFound(update.execution_id))?;
            execution.status = update.status;
            execution.completed_at = Some(update.completed_at);
            execution.response_status_code = update.response_status_code;
            execution.response_body = update.response_body;
            execution.error_message = update.error_message;
            execution.duration_ms = Some(update.duration_ms);
            execution.attempt_number = update.attempt_number;
        }
        if let Some(job) = state.jobs.get_mut(&update.job_id) {
            job.lifecycle_status = update.status.as_job_lifecycle();
            job.next_fire_at = update.next_fire_at;
        }
        Ok(())
    }

    async fn append_schedule_change(&self, change: ScheduleChange) -> Result<(), StoreError> {
        self.state.lock().unwrap().schedule_changes.push(change);
        Ok(())
    }

    async fn recent_executions(&self, job_id: JobId, limit: i64) -> Result<Vec<Execution>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut matching: Vec<Execution> =
            state.executions.values().filter(|e| e.job_id == job_id).cloned().collect();
        matching.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        matching.truncate(limit.max(0) as usize);
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HttpMethod;
    use std::collections::HashMap as StdHashMap;
    use uuid::Uuid;

    fn sample_job() -> Job {
        Job {
            id: Uuid::new_v4(),
            name: "ping".to_string(),
            description: None,
            cron_expression: "*/5 * * * *".to_string(),
            timezone: "UTC".to_string(),
            target_url: "https://example.com".to_string(),
            http_method: HttpMethod::Get,
            headers: StdHashMap::new(),
            body: None,
            query_params: StdHashMap::new(),
            enabled: true,
            retry_budget: 3,
            per_attempt_timeout_ms: 5_000,
            owner_id: "owner".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            lifecycle_status: LifecycleStatus::Pending,
            last_fired_at: None,
            next_fire_at: None,
        }
    }

    #[tokio::test]
    async fn round_trips_a_job() {
        let store = InMemoryStore::new();
        let job = sample_job();
        store.create_job(&job).await.unwrap();
        let fetched = store.fetch_job(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, job.id);
        assert_eq!(store.list_enabled_jobs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn complete_execution_updates_job_atomically() {
        let store = InMemoryStore::new();
        let job = sample_job();
        store.create_job(&job).await.unwrap();
        let started = Utc::now();
        let execution_id = store.create_running_execution(job.id, 1, started).await.unwrap();

        store
            .complete_execution(TerminalUpdate {
                execution_id,
                job_id: job.id,
                status: ExecutionStatus::Success,
                response_status_code: Some(200),
                response_body: Some("{}".to_string()),
                error_message: None,
                duration_ms: 42,
                attempt_number: 1,
                completed_at: Utc::now(),
                next_fire_at: Some(Utc::now()),
            })
            .await
            .unwrap();

        let updated_job = store.fetch_job(job.id).await.unwrap().unwrap();
        assert_eq!(updated_job.lifecycle_status, LifecycleStatus::Success);
        assert!(updated_job.next_fire_at.is_some());

        let recent = store.recent_executions(job.id, 100).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].status, ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn deleting_a_job_removes_it() {
        let store = InMemoryStore::new();
        let job = sample_job();
        store.create_job(&job).await.unwrap();
        assert!(store.delete_job(job.id).await.unwrap());
        assert!(store.fetch_job(job.id).await.unwrap().is_none());
    }
}
