pub mod config;
pub mod controller;
pub mod cron;
pub mod driver;
pub mod error;
pub mod events;
pub mod invoker;
pub mod models;
pub mod orchestrator;
pub mod pool;
pub mod registry;
pub mod shutdown;
pub mod store;

pub use config::SchedulerConfig;
pub use controller::{JobMetrics, ReschedulingController};
pub use driver::{ExecutionDriver, ExecutionOutcome};
pub use error::{Error, Result};
pub use events::{BroadcastEventPublisher, Event, EventPublisher, NullEventPublisher};
pub use invoker::HttpInvoker;
pub use models::{Execution, ExecutionId, ExecutionStatus, HttpMethod, Job, JobId, LifecycleStatus, ScheduleChange};
pub use orchestrator::LifecycleOrchestrator;
pub use pool::{FiringExecutor, PoolStats, WorkerPool};
pub use registry::{Firing, FiringSink, JobRegistry, Priority};
pub use shutdown::ShutdownSignal;
pub use store::{ExecutionStore, InMemoryStore, PostgresStore, TerminalUpdate};

/// Current version of the scheduler crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
