//! Tick bookkeeping
//!
//! Each tick:
//! - applies commands queued by steps
//! - collapses TimedOut/Error states left by the previous tick
//! - enforces timeouts
//! - runs every due step outside the state lock
//!
//! User code (steps and task factories) runs under `catch_unwind`, so a
//! panicking task becomes an `InternalTaskFault` instead of ending the loop.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use crate::error::{Result, TaskError};
use crate::params::ParameterSet;
use crate::scheduler::CommandSender;
use crate::task::{StepContext, StepJob, StepResult, TaskDefinition, TaskStep};

/// What happened during one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Steps executed
    pub stepped: usize,
    /// Activations that signalled completion
    pub completed: usize,
    /// Activations that faulted
    pub failed: usize,
    /// Activations forced out by their timeout
    pub timed_out: usize,
    /// Completed activations started again
    pub restarted: usize,
    /// Step results dropped because the activation changed mid-step
    pub discarded: usize,
}

impl TickReport {
    /// True when anything changed state
    pub fn has_transitions(&self) -> bool {
        self.completed + self.failed + self.timed_out + self.restarted > 0
    }
}

/// Counters across the scheduler's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickStats {
    pub tick_count: u64,
    pub total_started: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_timed_out: u64,
}

impl TickStats {
    pub fn record(&mut self, report: &TickReport) {
        self.tick_count += 1;
        self.total_completed += report.completed as u64;
        self.total_failed += report.failed as u64;
        self.total_timed_out += report.timed_out as u64;
        self.total_started += report.restarted as u64;
    }
}

/// Run one step with panic isolation; the lock must not be held
pub(crate) fn run_step(
    name: &str,
    job: &mut StepJob,
    commands: &CommandSender,
    budget: Duration,
) -> StepResult {
    let ctx = StepContext::new(
        name,
        job.instance_id,
        job.elapsed,
        job.step_index,
        &job.params,
        commands,
    );
    let work = &mut job.work;
    let started = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(|| work.step(&ctx)))
        .unwrap_or_else(|payload| {
            StepResult::Failed(TaskError::InternalTaskFault(panic_message(&*payload)).to_string())
        });
    let took = started.elapsed();
    if took > budget {
        log::warn!(
            "Task {} step {} took {:?}, over the {:?} budget",
            name,
            job.step_index,
            took,
            budget
        );
    }
    result
}

/// Build fresh work for an activation; a panicking factory becomes a fault
pub(crate) fn instantiate(
    definition: &dyn TaskDefinition,
    params: &ParameterSet,
) -> Result<Box<dyn TaskStep>> {
    panic::catch_unwind(AssertUnwindSafe(|| definition.instantiate(params)))
        .unwrap_or_else(|payload| {
            let message = panic_message(&*payload);
            log::warn!("Task {} factory panicked: {}", definition.name(), message);
            Err(TaskError::InternalTaskFault(message))
        })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "step panicked".to_string()
    }
}
