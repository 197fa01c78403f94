//! Task states and activation outcomes

use serde::{Deserialize, Serialize};

/// Current state of a task as seen by status queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Dormant, waiting for a start request
    Idle,
    /// Activated and stepped by the tick loop
    Active,
    /// Timeout expired; collapses to Idle on the following tick
    TimedOut,
    /// A step faulted; collapses to Idle on the following tick
    Error,
}

impl TaskState {
    /// Returns true if the task currently holds an activation
    pub fn is_active(&self) -> bool {
        matches!(self, TaskState::Active)
    }

    /// Returns true for the states that linger one tick before Idle
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::TimedOut | TaskState::Error)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Idle => "Idle",
            TaskState::Active => "Active",
            TaskState::TimedOut => "TimedOut",
            TaskState::Error => "Error",
        };
        f.write_str(s)
    }
}

/// How the most recent activation of a task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskOutcome {
    /// Work signalled completion
    Completed,
    /// Stopped by a control request or scheduler shutdown
    Stopped,
    /// Active time reached the timeout
    TimedOut,
    /// A step failed or panicked
    Failed,
}

impl TaskOutcome {
    /// True for outcomes a waiting client treats as success
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Completed | TaskOutcome::Stopped)
    }
}
