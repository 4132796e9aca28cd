// Central Error Type for the Application

use crate::domain::JobId;
use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] crate::port::PluginError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Object enumeration failed: {0}")]
    Enumeration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The job id is already registered as running
    #[error("Job {0} is already started")]
    AlreadyStarted(JobId),

    /// Only raised under the `reject` overflow policy
    #[error("Capacity exceeded: {running} of {max} job slots in use")]
    CapacityExceeded { running: usize, max: usize },

    #[error("Engine is shutting down")]
    ShuttingDown,

    /// Dispatch-loop signal: the job was asked to stop
    #[error("Job {0} is stopping")]
    JobStopping(JobId),

    /// Dispatch-loop signal: the job was marked in error
    #[error("Job {0} is in error")]
    JobInError(JobId),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True for the stop/in-error control signals raised inside the dispatch loop
    pub fn is_dispatch_signal(&self) -> bool {
        matches!(self, AppError::JobStopping(_) | AppError::JobInError(_))
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// Note: sqlx::Error conversion is handled in the infra-sqlite crate
// by converting to AppError::Database(String)
