//! taskmgr - a cooperative task scheduler
//!
//! Named, pluggable tasks are registered once and then started, stopped and
//! observed by remote callers. A periodic tick advances every active task by
//! at most one bounded step, enforces timeouts, and keeps a consistent status
//! map that clients read as immutable snapshots.

pub mod client;
pub mod error;
pub mod params;
pub mod protocol;
pub mod registry;
pub mod scheduler;
pub mod status;
pub mod task;

pub use client::{LocalTransport, TaskClient, Transport, WaitCondition};
pub use error::{ErrorKind, Result, TaskError};
pub use params::{ParamValue, ParameterSet};
pub use registry::{TaskDescriptor, TaskRegistry};
pub use scheduler::{Scheduler, SchedulerConfig, StartPolicy, TaskHandle};
pub use status::{FinishedActivation, StatusSnapshot, TaskStatus};
pub use task::{
    FnTask, StepContext, StepResult, TaskDefinition, TaskOutcome, TaskState, TaskStep, WaitTask,
};
