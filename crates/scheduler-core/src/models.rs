//! Core data model: Job, Execution, ScheduleChange.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type JobId = Uuid;
pub type ExecutionId = Uuid;
pub type ScheduleChangeId = Uuid;

/// HTTP methods a job may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// Derived lifecycle status of a Job, reflecting the last-completed firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum LifecycleStatus {
    Pending,
    Running,
    Success,
    Failed,
}

/// Status of a single Execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Success | ExecutionStatus::Failed)
    }

    /// The derived `Job.lifecycleStatus` a terminal write leaves behind.
    pub fn as_job_lifecycle(&self) -> LifecycleStatus {
        match self {
            ExecutionStatus::Success => LifecycleStatus::Success,
            ExecutionStatus::Failed => LifecycleStatus::Failed,
            ExecutionStatus::Running => LifecycleStatus::Running,
        }
    }
}

/// The scheduled unit. `retry_budget` and `per_attempt_timeout_ms` are
/// validated at the boundary (see the `_valid` helpers below); `next_fire_at`
/// is only meaningful while `enabled` is true and the expression parses.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub description: Option<String>,
    pub cron_expression: String,
    pub timezone: String,
    pub target_url: String,
    pub http_method: HttpMethod,
    #[sqlx(json)]
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    #[sqlx(json)]
    pub query_params: HashMap<String, String>,
    pub enabled: bool,
    pub retry_budget: i32,
    pub per_attempt_timeout_ms: i64,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub lifecycle_status: LifecycleStatus,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub next_fire_at: Option<DateTime<Utc>>,
}

impl Job {
    /// `retryBudget ≥ 1`, within the published bound of 10.
    pub fn retry_budget_valid(&self) -> bool {
        (1..=10).contains(&self.retry_budget)
    }

    /// `perAttemptTimeout` within 1s..5min.
    pub fn per_attempt_timeout_valid(&self) -> bool {
        (1_000..=300_000).contains(&self.per_attempt_timeout_ms)
    }

    pub fn per_attempt_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.per_attempt_timeout_ms as u64)
    }
}

/// One firing of a Job.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Execution {
    pub id: ExecutionId,
    pub job_id: JobId,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub response_status_code: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
    pub attempt_number: i32,
}

impl Execution {
    pub fn new_running(job_id: JobId, attempt_number: i32, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            started_at,
            completed_at: None,
            status: ExecutionStatus::Running,
            response_status_code: None,
            response_body: None,
            error_message: None,
            duration_ms: None,
            attempt_number,
        }
    }
}

/// Append-only audit of a cron expression rewrite.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScheduleChange {
    pub id: ScheduleChangeId,
    pub job_id: JobId,
    pub old_expression: String,
    pub new_expression: String,
    pub reason: String,
    pub author: String,
    pub changed_at: DateTime<Utc>,
}

impl ScheduleChange {
    pub const AUTO_REASON_PREFIX: &'static str = "auto:";

    pub fn is_auto(&self) -> bool {
        self.reason.starts_with(Self::AUTO_REASON_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> Job {
        Job {
            id: Uuid::new_v4(),
            name: "ping".to_string(),
            description: None,
            cron_expression: "*/5 * * * *".to_string(),
            timezone: "UTC".to_string(),
            target_url: "https://example.com/ping".to_string(),
            http_method: HttpMethod::Post,
            headers: HashMap::new(),
            body: None,
            query_params: HashMap::new(),
            enabled: true,
            retry_budget: 3,
            per_attempt_timeout_ms: 10_000,
            owner_id: "owner-1".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            lifecycle_status: LifecycleStatus::Pending,
            last_fired_at: None,
            next_fire_at: None,
        }
    }

    #[test]
    fn retry_budget_bounds() {
        let mut job = sample_job();
        job.retry_budget = 0;
        assert!(!job.retry_budget_valid());
        job.retry_budget = 1;
        assert!(job.retry_budget_valid());
        job.retry_budget = 10;
        assert!(job.retry_budget_valid());
        job.retry_budget = 11;
        assert!(!job.retry_budget_valid());
    }

    #[test]
    fn per_attempt_timeout_bounds() {
        let mut job = sample_job();
        job.per_attempt_timeout_ms = 999;
        assert!(!job.per_attempt_timeout_valid());
        job.per_attempt_timeout_ms = 1_000;
        assert!(job.per_attempt_timeout_valid());
        job.per_attempt_timeout_ms = 300_000;
        assert!(job.per_attempt_timeout_valid());
        job.per_attempt_timeout_ms = 300_001;
        assert!(!job.per_attempt_timeout_valid());
    }

    #[test]
    fn schedule_change_detects_auto_reason() {
        let change = ScheduleChange {
            id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            old_expression: "5 * * * *".to_string(),
            new_expression: "10 * * * *".to_string(),
            reason: "auto:failure-based-backoff".to_string(),
            author: "controller".to_string(),
            changed_at: Utc::now(),
        };
        assert!(change.is_auto());
    }
}
