//! Task definition and resumable step contracts
//!
//! A [`TaskDefinition`] is the registry entry: metadata plus a factory that
//! turns a [`ParameterSet`] into fresh [`TaskStep`] work for one activation.
//! The scheduler calls [`TaskStep::step`] once per due tick; work that has to
//! wait keeps its progress in `self` and returns [`StepResult::Incomplete`].

use std::time::Duration;

use crate::error::Result;
use crate::params::ParameterSet;
use crate::scheduler::{Command, CommandSender};

/// Result of a single execution step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    /// More work remains; call again after the period
    Incomplete,
    /// Work finished
    Done,
    /// Work failed; the message becomes the task's last error
    Failed(String),
}

/// Resumable work for one activation of a task
pub trait TaskStep: Send {
    /// Run one short, non-blocking step
    fn step(&mut self, ctx: &StepContext<'_>) -> StepResult;
}

/// A named, pluggable unit of work
pub trait TaskDefinition: Send + Sync {
    /// Unique registry name
    fn name(&self) -> &str;

    /// One-line help shown in the task directory
    fn description(&self) -> &str {
        ""
    }

    /// Step spacing advertised in the task directory
    fn default_period(&self) -> Duration {
        Duration::from_secs(1)
    }

    /// Timeout used when the start request does not carry `task_timeout`
    fn default_timeout(&self) -> Option<Duration> {
        None
    }

    /// Build fresh work for one activation, validating parameters up front
    fn instantiate(&self, params: &ParameterSet) -> Result<Box<dyn TaskStep>>;
}

/// What a step can see about its own activation
pub struct StepContext<'a> {
    name: &'a str,
    instance_id: u64,
    elapsed: Duration,
    step_index: u64,
    params: &'a ParameterSet,
    commands: &'a CommandSender,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(
        name: &'a str,
        instance_id: u64,
        elapsed: Duration,
        step_index: u64,
        params: &'a ParameterSet,
        commands: &'a CommandSender,
    ) -> Self {
        Self {
            name,
            instance_id,
            elapsed,
            step_index,
            params,
            commands,
        }
    }

    /// Name of the running task
    pub fn name(&self) -> &str {
        self.name
    }

    /// Id of this activation
    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    /// Wall-clock time since the start request, as of this tick
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Zero-based count of steps already run in this activation
    pub fn step_index(&self) -> u64 {
        self.step_index
    }

    pub fn params(&self) -> &ParameterSet {
        self.params
    }

    /// Queue a start for another task; applied at the next tick boundary
    pub fn request_start(
        &self,
        name: impl Into<String>,
        auto_restart: bool,
        period: f64,
        params: ParameterSet,
    ) {
        self.send(Command::Start {
            name: name.into(),
            auto_restart,
            period,
            params,
        });
    }

    /// Queue a stop; applied at the next tick boundary
    pub fn request_stop(&self, name: impl Into<String>) {
        self.send(Command::Stop { name: name.into() });
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::warn!("Task {} queued a command after scheduler shutdown", self.name);
        }
    }
}
