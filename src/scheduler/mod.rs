//! Scheduler module for cooperative task execution.
//!
//! This module provides:
//! - **SchedulerConfig**: tick cadence, step budget and start policy.
//! - **Scheduler**: start/stop/status entry points plus the tick loop.
//! - **Commands**: start/stop requests queued by running steps.
//!
//! # Architecture
//!
//! 1. A tokio task ticks the scheduler at a fixed interval
//! 2. Each tick lifts due step work out of the locked task table
//! 3. Steps run without the lock; results are applied under it
//! 4. Control requests and snapshots take the same lock briefly
//!
//! # Example
//!
//! ```ignore
//! use taskmgr::params::ParameterSet;
//! use taskmgr::registry::TaskRegistry;
//! use taskmgr::scheduler::{Scheduler, SchedulerConfig};
//! use taskmgr::task::WaitTask;
//!
//! let mut registry = TaskRegistry::new();
//! registry.register(Arc::new(WaitTask::new("Test")))?;
//! let scheduler = Scheduler::new(registry, SchedulerConfig::default())?;
//! scheduler.start_scheduler()?;
//! scheduler.start("Test", true, 0.5, ParameterSet::new().with("task_duration", 50.0))?;
//! ```

mod command;
mod config;
mod engine;
mod tick;

pub use command::{Command, CommandReceiver, CommandSender};
pub(crate) use command::command_channel;
pub use config::{SchedulerConfig, StartPolicy};
pub use engine::{Scheduler, TaskHandle};
pub use tick::{TickReport, TickStats};
