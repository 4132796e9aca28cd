// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid job state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Unknown job state: {0}")]
    UnknownState(String),

    #[error("Unknown plugin type: {0}")]
    UnknownPluginType(String),

    #[error("Unknown object class: {0}")]
    UnknownObjectClass(String),

    #[error("No source objects left waiting to be processed (count = {count})")]
    NothingWaiting { count: u64 },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
