//! Built-in task definitions
//!
//! - [`WaitTask`]: stays active for `task_duration` seconds, then completes
//! - [`FnTask`]: wraps a closure as a stateless step function

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::params::{ParameterSet, TASK_DURATION};
use crate::task::definition::{StepContext, StepResult, TaskDefinition, TaskStep};

/// Completes once the activation has been running for `task_duration` seconds
#[derive(Debug, Clone)]
pub struct WaitTask {
    name: String,
    default_duration: f64,
}

impl WaitTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_duration: 1.0,
        }
    }

    /// Duration used when the start request omits `task_duration`
    pub fn with_default_duration(mut self, secs: f64) -> Self {
        self.default_duration = secs;
        self
    }
}

impl TaskDefinition for WaitTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Wait for task_duration seconds, then complete"
    }

    fn instantiate(&self, params: &ParameterSet) -> Result<Box<dyn TaskStep>> {
        let secs = params.number_or(TASK_DURATION, self.default_duration)?;
        let duration = Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX);
        Ok(Box::new(Wait { duration }))
    }
}

struct Wait {
    duration: Duration,
}

impl TaskStep for Wait {
    fn step(&mut self, ctx: &StepContext<'_>) -> StepResult {
        if ctx.elapsed() >= self.duration {
            log::debug!("{} waited {:?}", ctx.name(), self.duration);
            StepResult::Done
        } else {
            StepResult::Incomplete
        }
    }
}

/// Function-backed task definition
///
/// The closure is shared by every activation, so any state it needs across
/// steps must live behind explicit synchronization.
pub struct FnTask<F> {
    name: String,
    description: String,
    timeout: Option<Duration>,
    f: Arc<F>,
}

impl<F> FnTask<F>
where
    F: Fn(&StepContext<'_>) -> StepResult + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            timeout: None,
            f: Arc::new(f),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Shorthand for `Arc::new(FnTask::new(..))`
    pub fn arc(name: impl Into<String>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

impl<F> TaskDefinition for FnTask<F>
where
    F: Fn(&StepContext<'_>) -> StepResult + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn default_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn instantiate(&self, _params: &ParameterSet) -> Result<Box<dyn TaskStep>> {
        Ok(Box::new(FnStep { f: Arc::clone(&self.f) }))
    }
}

struct FnStep<F> {
    f: Arc<F>,
}

impl<F> TaskStep for FnStep<F>
where
    F: Fn(&StepContext<'_>) -> StepResult + Send + Sync + 'static,
{
    fn step(&mut self, ctx: &StepContext<'_>) -> StepResult {
        (self.f)(ctx)
    }
}
