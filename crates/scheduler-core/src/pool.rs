//! Bounded-concurrency dispatcher with priority admission: manual executions
//! always drain ahead of scheduled ones, and the number of in-flight firings
//! never exceeds the configured concurrency.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::WorkerPoolConfig;
use crate::registry::{Firing, FiringSink, Priority};
use crate::shutdown::ShutdownSignal;

/// What the pool hands each admitted firing off to. The Execution Driver
/// implements this.
#[async_trait]
pub trait FiringExecutor: Send + Sync {
    async fn execute(&self, firing: Firing);
}

/// Observable pool state for metrics.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolStats {
    pub pending: usize,
    pub active: usize,
    pub concurrency: usize,
}

/// Bounded-concurrency dispatcher. One instance per process.
pub struct WorkerPool {
    manual_tx: mpsc::UnboundedSender<Firing>,
    scheduled_tx: mpsc::UnboundedSender<Firing>,
    pending: Arc<AtomicUsize>,
    active_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    concurrency: usize,
    shutdown: ShutdownSignal,
    dispatch_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn spawn(executor: Arc<dyn FiringExecutor>, config: &WorkerPoolConfig, shutdown: ShutdownSignal) -> Arc<Self> {
        let (manual_tx, manual_rx) = mpsc::unbounded_channel();
        let (scheduled_tx, scheduled_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let active_handles = Arc::new(Mutex::new(Vec::new()));
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));

        let dispatch_handle = tokio::spawn(run_dispatch_loop(
            manual_rx,
            scheduled_rx,
            semaphore,
            executor,
            pending.clone(),
            active_handles.clone(),
            shutdown.clone(),
        ));

        Arc::new(Self {
            manual_tx,
            scheduled_tx,
            pending,
            active_handles,
            concurrency: config.max_concurrent,
            shutdown,
            dispatch_handle: Mutex::new(Some(dispatch_handle)),
        })
    }

    pub fn stats(&self) -> PoolStats {
        let active = {
            let mut handles = self.active_handles.lock().unwrap();
            handles.retain(|h| !h.is_finished());
            handles.len()
        };
        PoolStats { pending: self.pending.load(Ordering::SeqCst), active, concurrency: self.concurrency }
    }

    /// Stop admitting, wait for active firings to finish within `grace`,
    /// then abort whatever is left.
    pub async fn drain(&self, grace: Duration) {
        self.shutdown.trigger();

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let remaining = {
                let mut handles = self.active_handles.lock().unwrap();
                handles.retain(|h| !h.is_finished());
                handles.len()
            };
            if remaining == 0 || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let leftover: Vec<JoinHandle<()>> = std::mem::take(&mut *self.active_handles.lock().unwrap());
        for handle in leftover {
            if !handle.is_finished() {
                handle.abort();
            }
        }

        if let Some(handle) = self.dispatch_handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl FiringSink for WorkerPool {
    async fn enqueue(&self, firing: Firing) {
        if self.shutdown.is_triggered() {
            warn!(job_id = %firing.job_id, "pool is draining, dropping firing");
            return;
        }
        self.pending.fetch_add(1, Ordering::SeqCst);
        let sent = match firing.priority {
            Priority::Manual => self.manual_tx.send(firing),
            Priority::Scheduled => self.scheduled_tx.send(firing),
        };
        if sent.is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

async fn run_dispatch_loop(
    mut manual_rx: mpsc::UnboundedReceiver<Firing>,
    mut scheduled_rx: mpsc::UnboundedReceiver<Firing>,
    semaphore: Arc<Semaphore>,
    executor: Arc<dyn FiringExecutor>,
    pending: Arc<AtomicUsize>,
    active_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    shutdown: ShutdownSignal,
) {
    loop {
        let firing = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            Some(firing) = manual_rx.recv() => firing,
            Some(firing) = scheduled_rx.recv() => firing,
            else => break,
        };
        pending.fetch_sub(1, Ordering::SeqCst);

        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        let executor = executor.clone();
        let handle = tokio::spawn(async move {
            executor.execute(firing).await;
            drop(permit);
        });
        active_handles.lock().unwrap().push(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::time::Duration as StdDuration;
    use uuid::Uuid;

    struct CountingExecutor {
        executed: Arc<StdAtomicUsize>,
        delay: StdDuration,
    }

    #[async_trait]
    impl FiringExecutor for CountingExecutor {
        async fn execute(&self, _firing: Firing) {
            tokio::time::sleep(self.delay).await;
            self.executed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config(max_concurrent: usize) -> WorkerPoolConfig {
        WorkerPoolConfig { max_concurrent }
    }

    #[tokio::test]
    async fn dispatches_enqueued_firings_up_to_concurrency() {
        let executed = Arc::new(StdAtomicUsize::new(0));
        let executor = Arc::new(CountingExecutor { executed: executed.clone(), delay: StdDuration::from_millis(20) });
        let pool = WorkerPool::spawn(executor, &config(2), ShutdownSignal::new());

        for _ in 0..4 {
            pool.enqueue(Firing::scheduled(Uuid::new_v4())).await;
        }

        tokio::time::sleep(StdDuration::from_millis(150)).await;
        assert_eq!(executed.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn stats_report_pending_and_active() {
        let executed = Arc::new(StdAtomicUsize::new(0));
        let executor = Arc::new(CountingExecutor { executed, delay: StdDuration::from_millis(200) });
        let pool = WorkerPool::spawn(executor, &config(1), ShutdownSignal::new());

        pool.enqueue(Firing::scheduled(Uuid::new_v4())).await;
        pool.enqueue(Firing::scheduled(Uuid::new_v4())).await;
        tokio::time::sleep(StdDuration::from_millis(30)).await;

        let stats = pool.stats();
        assert_eq!(stats.concurrency, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn dropping_firings_after_shutdown_trigger() {
        let executed = Arc::new(StdAtomicUsize::new(0));
        let executor = Arc::new(CountingExecutor { executed: executed.clone(), delay: StdDuration::from_millis(10) });
        let shutdown = ShutdownSignal::new();
        let pool = WorkerPool::spawn(executor, &config(2), shutdown.clone());

        shutdown.trigger();
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        pool.enqueue(Firing::scheduled(Uuid::new_v4())).await;
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        assert_eq!(executed.load(Ordering::SeqCst), 0);
        assert_eq!(pool.stats().pending, 0);
    }

    #[tokio::test]
    async fn drain_waits_for_active_then_returns() {
        let executed = Arc::new(StdAtomicUsize::new(0));
        let executor = Arc::new(CountingExecutor { executed: executed.clone(), delay: StdDuration::from_millis(30) });
        let pool = WorkerPool::spawn(executor, &config(1), ShutdownSignal::new());

        pool.enqueue(Firing::scheduled(Uuid::new_v4())).await;
        tokio::time::sleep(StdDuration::from_millis(5)).await;

        pool.drain(StdDuration::from_millis(500)).await;
        assert_eq!(executed.load(Ordering::SeqCst), 1);
    }
}
