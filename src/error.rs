//! Error types for taskmgr
//!
//! Centralized error handling using thiserror. Every error maps onto an
//! [`ErrorKind`] so it can travel through the control protocol.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All error types that can occur in taskmgr
#[derive(Debug, Error)]
pub enum TaskError {
    /// No task registered under that name
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// A task with that name is already registered
    #[error("Duplicate task name: {0}")]
    DuplicateTaskName(String),

    /// Task is active and the start policy rejects restarts
    #[error("Task already running: {0}")]
    TaskAlreadyRunning(String),

    /// Period must be a finite number of seconds greater than zero
    #[error("Invalid period: {0}")]
    InvalidPeriod(f64),

    /// Task asked for a parameter the caller did not supply
    #[error("Parameter not found: {0}")]
    ParameterNotFound(String),

    /// Parameter exists but holds a different type
    #[error("Parameter type mismatch for '{name}': expected {expected}, found {found}")]
    ParameterTypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Fault raised inside a task step
    #[error("Internal task fault: {0}")]
    InternalTaskFault(String),

    /// Scheduler configuration rejected by validation
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// The tick loop was started twice
    #[error("Scheduler already running")]
    SchedulerAlreadyRunning,

    /// The tick loop needs a tokio runtime
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Error reported by the remote side of the control protocol
    #[error("{kind}: {message}")]
    Remote { kind: ErrorKind, message: String },

    /// A client wait was cut short because a wait condition held
    #[error("Wait ended on condition: {}", .0.join(", "))]
    ConditionVerified(Vec<String>),

    /// Malformed request or reply in the control protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TaskError {
    /// Protocol-level classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::TaskNotFound(_) => ErrorKind::TaskNotFound,
            TaskError::DuplicateTaskName(_) => ErrorKind::DuplicateTaskName,
            TaskError::TaskAlreadyRunning(_) => ErrorKind::TaskAlreadyRunning,
            TaskError::InvalidPeriod(_) => ErrorKind::InvalidPeriod,
            TaskError::ParameterNotFound(_) => ErrorKind::ParameterNotFound,
            TaskError::ParameterTypeMismatch { .. } => ErrorKind::ParameterTypeMismatch,
            TaskError::InternalTaskFault(_) => ErrorKind::InternalTaskFault,
            TaskError::Remote { kind, .. } => *kind,
            TaskError::InvalidConfig(_)
            | TaskError::SchedulerAlreadyRunning
            | TaskError::Runtime(_)
            | TaskError::ConditionVerified(_)
            | TaskError::Protocol(_)
            | TaskError::Json(_) => ErrorKind::Internal,
        }
    }
}

/// Error codes carried in control protocol replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    TaskNotFound,
    DuplicateTaskName,
    TaskAlreadyRunning,
    InvalidPeriod,
    ParameterNotFound,
    ParameterTypeMismatch,
    InternalTaskFault,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Result type alias for taskmgr operations
pub type Result<T> = std::result::Result<T, TaskError>;
