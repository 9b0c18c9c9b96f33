//! Error taxonomy. Each component gets its own `thiserror`-derived leaf enum,
//! aggregated behind one crate-wide `Error` with hand-rolled `Display` and
//! `std::error::Error`, `From` conversions, and a `status_code`/`category`
//! pair for anything that eventually crosses an HTTP boundary.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Failures from parsing or evaluating a cron expression.
#[derive(Debug, Clone, ThisError, Serialize, Deserialize)]
pub enum CronError {
    #[error("malformed cron expression: {0}")]
    MalformedExpression(String),

    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),
}

/// Failures from issuing an outbound HTTP call.
#[derive(Debug, Clone, ThisError, Serialize, Deserialize)]
pub enum InvokerError {
    #[error("no response received")]
    NoResponse,

    #[error("deadline exceeded")]
    Timeout,

    #[error("malformed request: {0}")]
    RequestInvalid(String),
}

/// Failures from the persistence layer.
#[derive(Debug, ThisError)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(uuid::Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures raised by the per-firing state machine.
#[derive(Debug, Clone, ThisError, Serialize, Deserialize)]
pub enum DriverError {
    #[error("job no longer exists")]
    JobNotFound,

    #[error("execution cancelled")]
    Cancelled,

    #[error(transparent)]
    Http(#[from] InvokerError),

    #[error("store error: {0}")]
    Store(String),
}

/// Failures from the hourly rescheduling sweep.
#[derive(Debug, Clone, ThisError, Serialize, Deserialize)]
pub enum ControllerError {
    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Cron(#[from] CronError),
}

/// Failures from registering or unregistering a job's timer.
#[derive(Debug, Clone, ThisError, Serialize, Deserialize)]
pub enum RegistryError {
    #[error(transparent)]
    Cron(#[from] CronError),
}

/// Top-level error for the scheduler crate.
#[derive(Debug)]
pub enum Error {
    Cron(CronError),
    Invoker(InvokerError),
    Store(StoreError),
    Driver(DriverError),
    Controller(ControllerError),
    Registry(RegistryError),
    Config(String),
    NotFound(String),
    QueueOverflow(String),
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Cron(e) => write!(f, "cron error: {}", e),
            Error::Invoker(e) => write!(f, "invoker error: {}", e),
            Error::Store(e) => write!(f, "store error: {}", e),
            Error::Driver(e) => write!(f, "driver error: {}", e),
            Error::Controller(e) => write!(f, "controller error: {}", e),
            Error::Registry(e) => write!(f, "registry error: {}", e),
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::NotFound(msg) => write!(f, "not found: {}", msg),
            Error::QueueOverflow(msg) => write!(f, "queue overflow: {}", msg),
            Error::Other(msg) => write!(f, "error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CronError> for Error {
    fn from(e: CronError) -> Self {
        Error::Cron(e)
    }
}

impl From<InvokerError> for Error {
    fn from(e: InvokerError) -> Self {
        Error::Invoker(e)
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Error::Store(e)
    }
}

impl From<DriverError> for Error {
    fn from(e: DriverError) -> Self {
        Error::Driver(e)
    }
}

impl From<ControllerError> for Error {
    fn from(e: ControllerError) -> Self {
        Error::Controller(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Store(StoreError::Database(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Store(StoreError::Serialization(e))
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl Error {
    pub fn status_code(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::Config(_) => 500,
            Error::Store(_) => 500,
            Error::Cron(_) => 400,
            Error::Invoker(_) => 502,
            Error::Driver(_) => 500,
            Error::Controller(_) => 500,
            Error::Registry(_) => 500,
            Error::QueueOverflow(_) => 503,
            Error::Other(_) => 500,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            Error::Cron(_) => "cron",
            Error::Invoker(_) => "invoker",
            Error::Store(_) => "store",
            Error::Driver(_) => "driver",
            Error::Controller(_) => "controller",
            Error::Registry(_) => "registry",
            Error::Config(_) => "config",
            Error::NotFound(_) => "not_found",
            Error::QueueOverflow(_) => "queue_overflow",
            Error::Other(_) => "other",
        }
    }
}
