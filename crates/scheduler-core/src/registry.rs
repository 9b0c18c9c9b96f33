//! The in-memory map from job identifier to its active timer. Holds no
//! schedule data itself — only the `JoinHandle` that will enqueue the next
//! firing, so registering a job twice cleanly replaces its old timer instead
//! of leaking it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::cron;
use crate::error::RegistryError;
use crate::models::{Job, JobId};

/// Priority bit carried by an enqueued firing: manual executions take
/// priority over scheduled ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Manual,
    Scheduled,
}

/// One unit of admission into the Worker Pool.
pub struct Firing {
    pub job_id: JobId,
    pub priority: Priority,
    pub result_tx: Option<tokio::sync::oneshot::Sender<crate::driver::ExecutionOutcome>>,
}

impl Firing {
    pub fn scheduled(job_id: JobId) -> Self {
        Self { job_id, priority: Priority::Scheduled, result_tx: None }
    }
}

/// What a timer hands a firing off to. The Worker Pool implements this; the
/// registry itself knows nothing about concurrency limits or dispatch.
#[async_trait]
pub trait FiringSink: Send + Sync {
    async fn enqueue(&self, firing: Firing);
}

struct TimerHandle {
    handle: JoinHandle<()>,
}

/// `register`/`unregister`/`has`/`snapshot`, single-writer, at most one live
/// timer per job id.
pub struct JobRegistry {
    timers: DashMap<JobId, TimerHandle>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self { timers: DashMap::new() }
    }

    /// Unconditionally unregisters any existing timer for this job, then —
    /// if the job is enabled and its expression parses — spawns a new one
    /// that recomputes its next firing via the Cron Evaluator on every lap
    /// and enqueues into `sink` when it arrives.
    pub fn register(&self, job: &Job, sink: Arc<dyn FiringSink>) -> Result<(), RegistryError> {
        self.unregister(&job.id);

        if !job.enabled {
            return Ok(());
        }

        // Validate up front so a malformed expression never spawns a timer
        // that immediately and silently dies.
        cron::next(&job.cron_expression, &job.timezone, Utc::now())?;

        let job_id = job.id;
        let expression = job.cron_expression.clone();
        let timezone = job.timezone.clone();

        let handle = tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let next = match cron::next(&expression, &timezone, now) {
                    Ok(instant) => instant,
                    Err(e) => {
                        error!(%job_id, error = %e, "timer could not compute next firing, stopping");
                        return;
                    }
                };
                let sleep_duration = (next - now).to_std().unwrap_or(std::time::Duration::ZERO);
                tokio::time::sleep(sleep_duration).await;
                info!(%job_id, "timer fired, enqueuing scheduled firing");
                sink.enqueue(Firing::scheduled(job_id)).await;
            }
        });

        self.timers.insert(job_id, TimerHandle { handle });
        Ok(())
    }

    pub fn unregister(&self, job_id: &JobId) {
        if let Some((_, timer)) = self.timers.remove(job_id) {
            timer.handle.abort();
        }
    }

    pub fn has(&self, job_id: &JobId) -> bool {
        self.timers.contains_key(job_id)
    }

    pub fn snapshot(&self) -> Vec<JobId> {
        self.timers.iter().map(|entry| *entry.key()).collect()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HttpMethod, LifecycleStatus};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct CountingSink {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FiringSink for CountingSink {
        async fn enqueue(&self, _firing: Firing) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sample_job(cron_expression: &str, enabled: bool) -> Job {
        Job {
            id: Uuid::new_v4(),
            name: "ping".to_string(),
            description: None,
            cron_expression: cron_expression.to_string(),
            timezone: "UTC".to_string(),
            target_url: "https://example.com".to_string(),
            http_method: HttpMethod::Get,
            headers: HashMap::new(),
            body: None,
            query_params: HashMap::new(),
            enabled,
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
    async fn registering_a_disabled_job_leaves_no_timer() {
        let registry = JobRegistry::new();
        let job = sample_job("*/5 * * * *", false);
        let sink = Arc::new(CountingSink { count: Arc::new(AtomicUsize::new(0)) });
        registry.register(&job, sink).unwrap();
        assert!(!registry.has(&job.id));
    }

    #[tokio::test]
    async fn register_replaces_any_prior_timer() {
        let registry = JobRegistry::new();
        let job = sample_job("*/5 * * * *", true);
        let sink = Arc::new(CountingSink { count: Arc::new(AtomicUsize::new(0)) });
        registry.register(&job, sink.clone()).unwrap();
        assert!(registry.has(&job.id));
        let first_handle_count = registry.timers.len();
        registry.register(&job, sink).unwrap();
        assert_eq!(registry.timers.len(), first_handle_count);
        assert!(registry.has(&job.id));
    }

    #[tokio::test]
    async fn rejects_malformed_cron_expression() {
        let registry = JobRegistry::new();
        let job = sample_job("not a cron", true);
        let sink = Arc::new(CountingSink { count: Arc::new(AtomicUsize::new(0)) });
        assert!(registry.register(&job, sink).is_err());
        assert!(!registry.has(&job.id));
    }

    #[tokio::test]
    async fn unregister_removes_the_timer() {
        let registry = JobRegistry::new();
        let job = sample_job("*/5 * * * *", true);
        let sink = Arc::new(CountingSink { count: Arc::new(AtomicUsize::new(0)) });
        registry.register(&job, sink).unwrap();
        registry.unregister(&job.id);
        assert!(!registry.has(&job.id));
    }

    #[tokio::test]
    async fn snapshot_lists_all_registered_jobs() {
        let registry = JobRegistry::new();
        let job_a = sample_job("*/5 * * * *", true);
        let job_b = sample_job("*/10 * * * *", true);
        let sink = Arc::new(CountingSink { count: Arc::new(AtomicUsize::new(0)) });
        registry.register(&job_a, sink.clone()).unwrap();
        registry.register(&job_b, sink).unwrap();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains(&job_a.id));
        assert!(snapshot.contains(&job_b.id));
    }
}
