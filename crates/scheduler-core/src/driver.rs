//! The per-firing state machine: one `run` call drives a job from RUNNING
//! through its retry loop to a terminal write, emitting events along the way.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::config::HttpConfig;
use crate::error::DriverError;
use crate::events::{Event, EventPublisher};
use crate::invoker::{HttpInvoker, InvokerRequest, InvokerResponse};
use crate::models::{Execution, ExecutionId, ExecutionStatus, Job, JobId};
use crate::pool::FiringExecutor;
use crate::registry::Firing;
use crate::shutdown::ShutdownSignal;
use crate::store::{ExecutionStore, TerminalUpdate};
use crate::{cron, models::LifecycleStatus};

/// What a manual trigger waits on, and what every firing produces internally
/// before being folded into an `Event`.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub job_id: JobId,
    pub execution_id: Option<ExecutionId>,
    pub status: ExecutionStatus,
    pub response_status_code: Option<i32>,
    pub error_message: Option<String>,
}

/// A response only counts as a success if its status falls in `[200, 400)`;
/// 4xx/5xx responses count as attempt failures even though a response was
/// actually received.
fn is_success(status_code: u16) -> bool {
    (200..400).contains(&status_code)
}

/// Trims the body, and calls it HTML if it opens with a doctype/html tag or
/// opens with `<` and closes with `</html>` further down. HTML is never
/// persisted — the execution log UI must never render it.
fn filter_html_body(body: Option<String>) -> Option<String> {
    let body = body?;
    let trimmed = body.trim_start();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    let looks_like_html =
        lower.starts_with("<!doctype") || lower.starts_with("<html") || (trimmed.starts_with('<') && lower.contains("</html>"));
    if looks_like_html {
        warn!("response body looks like HTML, storing null instead");
        None
    } else {
        Some(body)
    }
}

fn backoff_delay_ms(attempt: i32) -> u64 {
    let shift = (attempt - 1).max(0) as u32;
    let delay = 1000u64.saturating_mul(1u64.checked_shl(shift).unwrap_or(u64::MAX));
    delay.min(60_000)
}

pub struct ExecutionDriver<S: ExecutionStore, P: EventPublisher> {
    store: Arc<S>,
    invoker: Arc<HttpInvoker>,
    events: Arc<P>,
    shutdown: ShutdownSignal,
}

impl<S: ExecutionStore, P: EventPublisher> ExecutionDriver<S, P> {
    pub fn new(store: Arc<S>, http_config: &HttpConfig, events: Arc<P>, shutdown: ShutdownSignal) -> Result<Self, DriverError> {
        let invoker = HttpInvoker::new(http_config).map_err(DriverError::Http)?;
        Ok(Self { store, invoker: Arc::new(invoker), events, shutdown })
    }

    fn build_request(job: &Job) -> InvokerRequest {
        InvokerRequest {
            method: job.http_method,
            url: job.target_url.clone(),
            headers: job.headers.clone(),
            query: job.query_params.clone(),
            body: job.body.clone(),
            timeout: job.per_attempt_timeout(),
        }
    }

    async fn write_terminal(
        &self,
        job: &Job,
        execution_id: ExecutionId,
        status: ExecutionStatus,
        response: Option<&InvokerResponse>,
        error_message: Option<String>,
        started_at: chrono::DateTime<Utc>,
        attempt_number: i32,
    ) -> ExecutionOutcome {
        let now = Utc::now();
        let duration_ms = (now - started_at).num_milliseconds().max(0);
        let next_fire_at = match cron::next(&job.cron_expression, &job.timezone, now) {
            Ok(instant) => Some(instant),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "could not compute next firing at terminal write");
                None
            }
        };
        let response_status_code = response.map(|r| r.status_code as i32);
        let response_body = filter_html_body(response.and_then(|r| r.body.clone()));

        let update = TerminalUpdate {
            execution_id,
            job_id: job.id,
            status,
            response_status_code,
            response_body,
            error_message: error_message.clone(),
            duration_ms,
            attempt_number,
            completed_at: now,
            next_fire_at,
        };

        if let Err(e) = self.store.complete_execution(update).await {
            warn!(job_id = %job.id, error = %e, "failed to write terminal execution update");
        }

        self.events
            .publish(Event::ExecutionCompleted {
                job_id: job.id,
                job_name: job.name.clone(),
                status,
                error_message: error_message.clone(),
                timestamp: now,
            })
            .await;

        ExecutionOutcome {
            job_id: job.id,
            execution_id: Some(execution_id),
            status,
            response_status_code,
            error_message,
        }
    }

    /// Runs one firing to completion: RUNNING write, retry loop, terminal
    /// write. Never panics; any internal store/cron failure is logged and
    /// the firing still concludes with a best-effort outcome.
    pub async fn run(&self, job_id: JobId) -> ExecutionOutcome {
        let job = match self.store.fetch_job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(%job_id, "firing for a job that no longer exists");
                return ExecutionOutcome {
                    job_id,
                    execution_id: None,
                    status: ExecutionStatus::Failed,
                    response_status_code: None,
                    error_message: Some(DriverError::JobNotFound.to_string()),
                };
            }
            Err(e) => {
                warn!(%job_id, error = %e, "failed to fetch job for firing");
                return ExecutionOutcome {
                    job_id,
                    execution_id: None,
                    status: ExecutionStatus::Failed,
                    response_status_code: None,
                    error_message: Some(e.to_string()),
                };
            }
        };

        let started_at = Utc::now();
        if let Err(e) = self.store.mark_job_running(job.id, started_at).await {
            warn!(job_id = %job.id, error = %e, "failed to mark job running");
        }

        let execution_id = match self.store.create_running_execution(job.id, 1, started_at).await {
            Ok(id) => id,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "failed to create running execution row");
                return ExecutionOutcome {
                    job_id: job.id,
                    execution_id: None,
                    status: ExecutionStatus::Failed,
                    response_status_code: None,
                    error_message: Some(e.to_string()),
                };
            }
        };

        self.events
            .publish(Event::ExecutionStarted { job_id: job.id, job_name: job.name.clone(), timestamp: started_at })
            .await;

        let request = Self::build_request(&job);
        let mut last_error: Option<String> = None;
        let mut last_response: Option<InvokerResponse> = None;

        for attempt in 1..=job.retry_budget {
            let outcome = self.invoker.invoke(&request).await;
            match outcome {
                Ok(response) if is_success(response.status_code) => {
                    info!(job_id = %job.id, attempt, status = response.status_code, "firing succeeded");
                    return self
                        .write_terminal(&job, execution_id, ExecutionStatus::Success, Some(&response), None, started_at, attempt)
                        .await;
                }
                Ok(response) => {
                    last_error = Some(format!("non-success status code: {}", response.status_code));
                    last_response = Some(response);
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                    last_response = None;
                }
            }

            if attempt < job.retry_budget {
                let delay = Duration::from_millis(backoff_delay_ms(attempt));
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.shutdown.cancelled() => {
                        warn!(job_id = %job.id, attempt, "execution cancelled during retry backoff");
                        return self
                            .write_terminal(
                                &job,
                                execution_id,
                                ExecutionStatus::Failed,
                                last_response.as_ref(),
                                Some("CANCELLED".to_string()),
                                started_at,
                                attempt,
                            )
                            .await;
                    }
                }
            }
        }

        warn!(job_id = %job.id, retry_budget = job.retry_budget, "firing exhausted its retry budget");
        self.write_terminal(
            &job,
            execution_id,
            ExecutionStatus::Failed,
            last_response.as_ref(),
            last_error,
            started_at,
            job.retry_budget,
        )
        .await
    }
}

#[async_trait]
impl<S: ExecutionStore + 'static, P: EventPublisher + 'static> FiringExecutor for ExecutionDriver<S, P> {
    async fn execute(&self, firing: Firing) {
        let outcome = self.run(firing.job_id).await;
        if let Some(tx) = firing.result_tx {
            let _ = tx.send(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullEventPublisher;
    use crate::models::HttpMethod;
    use crate::store::InMemoryStore;
    use std::collections::HashMap as StdHashMap;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_job(target_url: String, retry_budget: i32) -> Job {
        Job {
            id: Uuid::new_v4(),
            name: "ping".to_string(),
            description: None,
            cron_expression: "*/5 * * * *".to_string(),
            timezone: "UTC".to_string(),
            target_url,
            http_method: HttpMethod::Post,
            headers: StdHashMap::new(),
            body: Some("{}".to_string()),
            query_params: StdHashMap::new(),
            enabled: true,
            retry_budget,
            per_attempt_timeout_ms: 2_000,
            owner_id: "owner".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            lifecycle_status: LifecycleStatus::Pending,
            last_fired_at: None,
            next_fire_at: None,
        }
    }

    fn driver(store: Arc<InMemoryStore>) -> ExecutionDriver<InMemoryStore, NullEventPublisher> {
        ExecutionDriver::new(store, &HttpConfig::default(), Arc::new(NullEventPublisher), ShutdownSignal::new()).unwrap()
    }

    #[tokio::test]
    async fn successful_firing_writes_success_and_reschedules() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryStore::new());
        let job = sample_job(format!("{}/hook", server.uri()), 3);
        store.seed_job(job.clone());

        let outcome = driver(store.clone()).run(job.id).await;
        assert_eq!(outcome.status, ExecutionStatus::Success);

        let updated_job = store.fetch_job(job.id).await.unwrap().unwrap();
        assert_eq!(updated_job.lifecycle_status, LifecycleStatus::Success);
        assert!(updated_job.next_fire_at.is_some());
    }

    #[tokio::test]
    async fn non_2xx_status_is_treated_as_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(500).set_body_string("broken"))
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryStore::new());
        let job = sample_job(format!("{}/hook", server.uri()), 1);
        store.seed_job(job.clone());

        let outcome = driver(store.clone()).run(job.id).await;
        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert_eq!(outcome.response_status_code, Some(500));

        let updated_job = store.fetch_job(job.id).await.unwrap().unwrap();
        assert_eq!(updated_job.lifecycle_status, LifecycleStatus::Failed);
    }

    #[tokio::test]
    async fn retries_until_retry_budget_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryStore::new());
        let job = sample_job(format!("{}/hook", server.uri()), 2);
        store.seed_job(job.clone());

        let outcome = driver(store.clone()).run(job.id).await;
        assert_eq!(outcome.status, ExecutionStatus::Failed);

        let recent = store.recent_executions(job.id, 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].attempt_number, 2);
    }

    #[tokio::test]
    async fn html_response_body_is_stored_as_null() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<!DOCTYPE html><html><body>oops</body></html>"))
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryStore::new());
        let job = sample_job(format!("{}/hook", server.uri()), 1);
        store.seed_job(job.clone());

        driver(store.clone()).run(job.id).await;

        let recent = store.recent_executions(job.id, 1).await.unwrap();
        assert!(recent[0].response_body.is_none());
    }

    #[test]
    fn backoff_delay_doubles_and_caps_at_60s() {
        assert_eq!(backoff_delay_ms(1), 1000);
        assert_eq!(backoff_delay_ms(2), 2000);
        assert_eq!(backoff_delay_ms(3), 4000);
        assert_eq!(backoff_delay_ms(10), 60_000);
    }

    #[test]
    fn success_window_is_200_to_400_exclusive() {
        assert!(is_success(200));
        assert!(is_success(399));
        assert!(!is_success(400));
        assert!(!is_success(199));
        assert!(!is_success(500));
    }
}
