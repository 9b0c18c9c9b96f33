//! Boots the other components, re-derives registry state from external job
//! mutation commands, and sequences graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::config::SchedulerConfig;
use crate::driver::{ExecutionDriver, ExecutionOutcome};
use crate::error::{Error, RegistryError};
use crate::events::EventPublisher;
use crate::models::{Job, JobId};
use crate::pool::{FiringExecutor, WorkerPool};
use crate::registry::{Firing, FiringSink, JobRegistry, Priority};
use crate::shutdown::ShutdownSignal;
use crate::store::ExecutionStore;

use crate::controller::ReschedulingController;

pub struct LifecycleOrchestrator<S: ExecutionStore, P: EventPublisher> {
    store: Arc<S>,
    registry: Arc<JobRegistry>,
    pool: Arc<WorkerPool>,
    controller: Arc<ReschedulingController<S, P>>,
    shutdown: ShutdownSignal,
    shutdown_grace: Duration,
}

impl<S: ExecutionStore + 'static, P: EventPublisher + 'static> LifecycleOrchestrator<S, P> {
    /// Boots the registry, worker pool, execution driver and rescheduling
    /// controller, then rehydrates all enabled jobs from storage.
    pub async fn start(store: Arc<S>, events: Arc<P>, config: &SchedulerConfig) -> Result<Arc<Self>, Error> {
        let shutdown = ShutdownSignal::new();
        let registry = Arc::new(JobRegistry::new());

        let driver = Arc::new(ExecutionDriver::new(store.clone(), &config.http, events.clone(), shutdown.clone())?);
        let pool = WorkerPool::spawn(driver as Arc<dyn FiringExecutor>, &config.worker, shutdown.clone());

        let controller = ReschedulingController::spawn(
            store.clone(),
            events,
            registry.clone(),
            pool.clone() as Arc<dyn FiringSink>,
            config.controller.clone(),
            shutdown.clone(),
        );

        let orchestrator =
            Arc::new(Self { store, registry, pool, controller, shutdown, shutdown_grace: Duration::from_millis(config.shutdown.grace_ms) });

        orchestrator.rehydrate().await?;
        Ok(orchestrator)
    }

    async fn rehydrate(&self) -> Result<(), Error> {
        let jobs = self.store.list_enabled_jobs().await?;
        info!(count = jobs.len(), "rehydrating enabled jobs into the registry");
        for job in jobs {
            if let Err(e) = self.registry.register(&job, self.sink()) {
                error!(job_id = %job.id, error = %e, "failed to register job timer during rehydration");
            }
        }
        Ok(())
    }

    fn sink(&self) -> Arc<dyn FiringSink> {
        self.pool.clone() as Arc<dyn FiringSink>
    }

    /// Re-derives the registry entry from the post-mutation job row:
    /// unregister if disabled, register (replacing any prior timer)
    /// otherwise. Every external create/update/enable/disable command
    /// reduces to this one rule.
    pub fn on_job_upserted(&self, job: &Job) -> Result<(), RegistryError> {
        if job.enabled {
            self.registry.register(job, self.sink())
        } else {
            self.registry.unregister(&job.id);
            Ok(())
        }
    }

    pub fn on_job_deleted(&self, job_id: JobId) {
        self.registry.unregister(&job_id);
    }

    /// Enqueues a manual, highest-priority firing and waits for it to
    /// conclude.
    pub async fn trigger_manual(&self, job_id: JobId) -> Result<ExecutionOutcome, Error> {
        let (tx, rx) = oneshot::channel();
        let firing = Firing { job_id, priority: Priority::Manual, result_tx: Some(tx) };
        self.pool.enqueue(firing).await;
        rx.await.map_err(|_| Error::Other("manual execution result channel dropped".to_string()))
    }

    /// Stops the controller and pool admissions, drains in-flight work
    /// within the configured grace period, then unregisters every timer.
    pub async fn shutdown(&self) {
        info!("lifecycle orchestrator shutting down");
        self.shutdown.trigger();
        self.pool.drain(self.shutdown_grace).await;

        for job_id in self.registry.snapshot() {
            self.registry.unregister(&job_id);
        }

        if self.pool.stats().active > 0 {
            warn!("worker pool still reports active executions after drain");
        }
    }
}
