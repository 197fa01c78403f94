//! Status snapshots
//!
//! A [`StatusSnapshot`] is built under the scheduler's state lock in one pass
//! over the registered tasks, so every entry is internally consistent and all
//! entries come from the same instant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::{TaskInstance, TaskOutcome, TaskState};

/// Status of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub name: String,
    pub state: TaskState,
    /// Current or most recent activation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<u64>,
    /// Seconds since start, as of the last tick
    pub elapsed: f64,
    /// Step spacing of the current or most recent activation, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<f64>,
    #[serde(default)]
    pub auto_restart: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<TaskOutcome>,
    /// Recently finished activations, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent: Vec<FinishedActivation>,
    /// When the state last changed
    pub status_time: DateTime<Utc>,
}

impl TaskStatus {
    /// How activation `instance_id` ended, if this status still lists it
    pub fn outcome_of(&self, instance_id: u64) -> Option<TaskOutcome> {
        self.recent
            .iter()
            .find(|f| f.instance_id == instance_id)
            .map(|f| f.outcome)
    }
}

/// Outcome of one finished activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishedActivation {
    pub instance_id: u64,
    pub outcome: TaskOutcome,
}

/// Immutable point-in-time view of every registered task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    taken_at: DateTime<Utc>,
    tasks: Vec<TaskStatus>,
}

impl StatusSnapshot {
    pub fn new(taken_at: DateTime<Utc>, tasks: Vec<TaskStatus>) -> Self {
        Self { taken_at, tasks }
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    /// Entries in registration order
    pub fn tasks(&self) -> &[TaskStatus] {
        &self.tasks
    }

    pub fn get(&self, name: &str) -> Option<&TaskStatus> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Shorthand for the state of one task
    pub fn state_of(&self, name: &str) -> Option<TaskState> {
        self.get(name).map(|t| t.state)
    }

    /// Tasks currently holding an activation
    pub fn active(&self) -> impl Iterator<Item = &TaskStatus> {
        self.tasks.iter().filter(|t| t.state.is_active())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn into_tasks(self) -> Vec<TaskStatus> {
        self.tasks
    }
}

/// Builds snapshots from the scheduler's task table
pub struct StatusReporter;

impl StatusReporter {
    /// One pass over the instances; caller holds the state lock
    pub fn snapshot<'a>(instances: impl IntoIterator<Item = &'a TaskInstance>) -> StatusSnapshot {
        let tasks = instances.into_iter().map(TaskInstance::status).collect();
        StatusSnapshot::new(Utc::now(), tasks)
    }
}
