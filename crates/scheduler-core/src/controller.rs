//! Hourly sweep that adapts a job's cron expression to its own recent
//! execution health: backs off a failing schedule, tightens on timeouts, or
//! disables a job outright once it settles into a failure streak.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ControllerConfig;
use crate::error::{ControllerError, RegistryError};
use crate::events::{Event, EventPublisher};
use crate::models::{Execution, ExecutionStatus, Job, ScheduleChange};
use crate::registry::{FiringSink, JobRegistry};
use crate::shutdown::ShutdownSignal;
use crate::store::ExecutionStore;

/// Health summary over a job's last (up to) 100 executions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobMetrics {
    pub total_executions: usize,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub average_execution_time_ms: f64,
    pub recent_failures: usize,
    pub recent_timeouts: usize,
}

/// `executions` must already be ordered `startedAt` descending (the
/// `ExecutionStore::recent_executions` contract).
fn compute_metrics(executions: &[Execution], per_attempt_timeout_ms: i64) -> JobMetrics {
    let n = executions.len();
    let success_count = executions.iter().filter(|e| e.status == ExecutionStatus::Success).count();
    let failure_count = executions.iter().filter(|e| e.status == ExecutionStatus::Failed).count();

    let (success_rate, failure_rate) =
        if n == 0 { (1.0, 0.0) } else { (success_count as f64 / n as f64, failure_count as f64 / n as f64) };

    let durations: Vec<i64> = executions.iter().filter_map(|e| e.duration_ms).collect();
    let average_execution_time_ms =
        if durations.is_empty() { 0.0 } else { durations.iter().sum::<i64>() as f64 / durations.len() as f64 };

    let recent = &executions[..n.min(10)];
    let recent_failures = recent.iter().filter(|e| e.status == ExecutionStatus::Failed).count();
    let recent_timeouts =
        recent.iter().filter(|e| e.duration_ms.is_some_and(|d| d >= per_attempt_timeout_ms)).count();

    JobMetrics { total_executions: n, success_rate, failure_rate, average_execution_time_ms, recent_failures, recent_timeouts }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Action {
    Keep,
    Extend { factor: f64, rule: &'static str },
    Disable,
}

/// First matching rule wins, evaluated in priority order: a healthy job is
/// left alone even if a lower-priority rule would also match.
fn evaluate_rules(metrics: &JobMetrics, per_attempt_timeout_ms: i64) -> Action {
    if metrics.success_rate >= 0.95 && metrics.total_executions >= 20 {
        return Action::Keep;
    }
    if metrics.failure_rate > 0.50 && metrics.total_executions >= 10 {
        return Action::Extend { factor: 2.0, rule: "failure-based-backoff" };
    }
    if metrics.recent_timeouts >= 3 && metrics.total_executions >= 10 {
        return Action::Extend { factor: 1.5, rule: "timeout-reduction" };
    }
    if metrics.average_execution_time_ms > 0.8 * per_attempt_timeout_ms as f64 && metrics.total_executions >= 10 {
        return Action::Extend { factor: 1.2, rule: "slow-execution" };
    }
    if metrics.recent_failures >= 3 {
        return Action::Disable;
    }
    Action::Keep
}

/// Rewrites a 5-field cron expression's minute field by `factor`. Returns
/// `None` when the field isn't a plain integer or a `*/step` form.
fn extend_interval(expression: &str, factor: f64) -> Option<String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.is_empty() {
        return None;
    }

    let new_minute = if let Ok(minute) = fields[0].parse::<i64>() {
        let scaled = ((minute as f64) * factor).floor().max(1.0) as i64;
        scaled.to_string()
    } else if let Some(step) = fields[0].strip_prefix("*/") {
        let step: i64 = step.parse().ok()?;
        let scaled = ((step as f64) * factor).floor().max(1.0) as i64;
        format!("*/{}", scaled)
    } else {
        return None;
    };

    let mut rewritten = vec![new_minute];
    rewritten.extend(fields[1..].iter().map(|f| f.to_string()));
    Some(rewritten.join(" "))
}

/// Hourly sweep over all enabled jobs, adjusting schedules per the rule
/// table above. Owns no timers itself; re-registration goes through the
/// shared `JobRegistry`.
pub struct ReschedulingController<S: ExecutionStore, P: EventPublisher> {
    store: Arc<S>,
    events: Arc<P>,
    registry: Arc<JobRegistry>,
    sink: Arc<dyn FiringSink>,
    config: ControllerConfig,
    shutdown: ShutdownSignal,
}

impl<S: ExecutionStore + 'static, P: EventPublisher + 'static> ReschedulingController<S, P> {
    pub fn spawn(
        store: Arc<S>,
        events: Arc<P>,
        registry: Arc<JobRegistry>,
        sink: Arc<dyn FiringSink>,
        config: ControllerConfig,
        shutdown: ShutdownSignal,
    ) -> Arc<Self> {
        let controller = Arc::new(Self { store, events, registry, sink, config, shutdown });

        let loop_controller = controller.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(loop_controller.config.sweep_interval_secs.max(1)));
            loop {
                tokio::select! {
                    _ = loop_controller.shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        loop_controller.sweep_once().await;
                    }
                }
            }
        });

        controller
    }

    /// One full sweep. Returns immediately if the controller is disabled.
    pub async fn sweep_once(&self) {
        if !self.config.enabled {
            return;
        }

        let jobs = match self.store.list_enabled_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "rescheduling controller failed to list enabled jobs");
                return;
            }
        };

        let batch_size = self.config.batch_size.max(1);
        let outcomes = stream::iter(jobs.into_iter().map(|job| self.process_job(job)))
            .buffer_unordered(batch_size)
            .collect::<Vec<_>>()
            .await;

        for outcome in outcomes {
            if let Err(e) = outcome {
                warn!(error = %e, "rescheduling controller failed to process a job");
            }
        }
    }

    async fn process_job(&self, job: Job) -> Result<(), ControllerError> {
        let executions = self
            .store
            .recent_executions(job.id, 100)
            .await
            .map_err(|e| ControllerError::Store(e.to_string()))?;

        let metrics = compute_metrics(&executions, job.per_attempt_timeout_ms);

        match evaluate_rules(&metrics, job.per_attempt_timeout_ms) {
            Action::Keep => Ok(()),
            Action::Disable => self.disable_job(job).await,
            Action::Extend { factor, rule } => self.extend_job(job, factor, rule).await,
        }
    }

    async fn disable_job(&self, mut job: Job) -> Result<(), ControllerError> {
        job.enabled = false;
        job.updated_at = Utc::now();
        self.store.update_job(&job).await.map_err(|e| ControllerError::Store(e.to_string()))?;
        self.registry.unregister(&job.id);
        self.events
            .publish(Event::JobUpdated { job_id: job.id, job_name: job.name.clone(), timestamp: Utc::now() })
            .await;
        info!(job_id = %job.id, recent_failures = 3, "disabled job after a streak of recent failures");
        Ok(())
    }

    async fn extend_job(&self, mut job: Job, factor: f64, rule: &'static str) -> Result<(), ControllerError> {
        let new_expression = match extend_interval(&job.cron_expression, factor) {
            Some(expr) if expr != job.cron_expression => expr,
            _ => return Ok(()),
        };

        let old_expression = job.cron_expression.clone();
        job.cron_expression = new_expression.clone();
        job.updated_at = Utc::now();
        self.store.update_job(&job).await.map_err(|e| ControllerError::Store(e.to_string()))?;

        let change = ScheduleChange {
            id: Uuid::new_v4(),
            job_id: job.id,
            old_expression: old_expression.clone(),
            new_expression: new_expression.clone(),
            reason: format!("{}{}", ScheduleChange::AUTO_REASON_PREFIX, rule),
            author: "rescheduling-controller".to_string(),
            changed_at: Utc::now(),
        };
        self.store.append_schedule_change(change).await.map_err(|e| ControllerError::Store(e.to_string()))?;

        self.registry
            .register(&job, self.sink.clone())
            .map_err(|RegistryError::Cron(c)| ControllerError::Cron(c))?;

        self.events
            .publish(Event::ScheduleChanged {
                job_id: job.id,
                job_name: job.name.clone(),
                old_expression,
                new_expression,
                timestamp: Utc::now(),
            })
            .await;

        info!(job_id = %job.id, rule, "rewrote job schedule");
        Ok(())
    }
}
