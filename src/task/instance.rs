//! Per-task state machine
//!
//! One [`TaskInstance`] exists per registered task. The scheduler mutates it
//! only while holding its state lock; the step work itself is moved out in a
//! [`StepJob`] for execution and handed back through [`TaskInstance::finish_step`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::params::ParameterSet;
use crate::status::{FinishedActivation, TaskStatus};
use crate::task::definition::{StepResult, TaskDefinition, TaskStep};
use crate::task::state::{TaskOutcome, TaskState};

/// Finished activations kept per task for clients waiting on an instance id
pub const RECENT_OUTCOMES: usize = 16;

/// Start-time settings for one activation
#[derive(Debug, Clone, PartialEq)]
pub struct ActivationSpec {
    pub period: Duration,
    pub timeout: Option<Duration>,
    pub auto_restart: bool,
    pub params: Arc<ParameterSet>,
}

struct Activation {
    instance_id: u64,
    spec: ActivationSpec,
    started_at: Instant,
    last_step_at: Option<Instant>,
    steps: u64,
    /// None while a step is executing outside the lock
    work: Option<Box<dyn TaskStep>>,
}

/// Work lifted out of an instance for one step
pub struct StepJob {
    pub instance_id: u64,
    pub elapsed: Duration,
    pub step_index: u64,
    pub params: Arc<ParameterSet>,
    pub work: Box<dyn TaskStep>,
}

/// What a tick decided for one instance
pub enum TickAction {
    /// Nothing to do
    Skip,
    /// Timeout expired during this tick
    TimedOut,
    /// A step is due
    Step(StepJob),
}

/// Result of handing a step's work back to the instance
#[derive(Debug, Clone, PartialEq)]
pub enum StepDisposition {
    /// Activation changed while the step ran; result ignored
    Discarded,
    /// Still active
    Continue,
    /// Finished; carries the activation settings when an automatic restart is wanted
    Completed(Option<ActivationSpec>),
    /// Step failed, instance is in Error
    Failed,
}

/// State machine wrapping one task definition
pub struct TaskInstance {
    definition: Arc<dyn TaskDefinition>,
    state: TaskState,
    activation: Option<Activation>,
    last_instance_id: Option<u64>,
    last_period: Option<Duration>,
    last_auto_restart: bool,
    elapsed: Duration,
    last_error: Option<String>,
    last_outcome: Option<TaskOutcome>,
    recent: VecDeque<FinishedActivation>,
    status_time: DateTime<Utc>,
}

impl TaskInstance {
    /// Dormant instance for a freshly registered definition
    pub fn new(definition: Arc<dyn TaskDefinition>) -> Self {
        Self {
            definition,
            state: TaskState::Idle,
            activation: None,
            last_instance_id: None,
            last_period: None,
            last_auto_restart: false,
            elapsed: Duration::ZERO,
            last_error: None,
            last_outcome: None,
            recent: VecDeque::with_capacity(RECENT_OUTCOMES),
            status_time: Utc::now(),
        }
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn definition(&self) -> &Arc<dyn TaskDefinition> {
        &self.definition
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Id of the current or most recent activation
    pub fn instance_id(&self) -> Option<u64> {
        self.last_instance_id
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_outcome(&self) -> Option<TaskOutcome> {
        self.last_outcome
    }

    /// How activation `instance_id` ended, if it is still remembered
    pub fn outcome_of(&self, instance_id: u64) -> Option<TaskOutcome> {
        self.recent
            .iter()
            .find(|f| f.instance_id == instance_id)
            .map(|f| f.outcome)
    }

    /// Bind new work and enter Active with elapsed reset
    pub fn activate(
        &mut self,
        instance_id: u64,
        spec: ActivationSpec,
        work: Box<dyn TaskStep>,
        now: Instant,
    ) {
        self.last_period = Some(spec.period);
        self.last_auto_restart = spec.auto_restart;
        self.activation = Some(Activation {
            instance_id,
            spec,
            started_at: now,
            last_step_at: None,
            steps: 0,
            work: Some(work),
        });
        self.last_instance_id = Some(instance_id);
        self.elapsed = Duration::ZERO;
        self.last_error = None;
        self.last_outcome = None;
        self.set_state(TaskState::Active);
    }

    /// Return to Idle; true if an activation was dropped
    pub fn stop(&mut self) -> bool {
        let was_active = self.activation.is_some();
        if was_active {
            self.end(TaskState::Idle, TaskOutcome::Stopped);
        } else if self.state != TaskState::Idle {
            self.set_state(TaskState::Idle);
        }
        was_active
    }

    /// Advance one tick: collapse terminal states, enforce the timeout, and
    /// lift out the work when a step is due
    pub fn on_tick(&mut self, now: Instant) -> TickAction {
        if self.state.is_terminal() {
            self.set_state(TaskState::Idle);
            return TickAction::Skip;
        }
        let Some(act) = self.activation.as_mut() else {
            return TickAction::Skip;
        };

        let elapsed = now.saturating_duration_since(act.started_at);
        if elapsed > self.elapsed {
            self.elapsed = elapsed;
        }

        if let Some(timeout) = act.spec.timeout
            && self.elapsed >= timeout
        {
            self.end(TaskState::TimedOut, TaskOutcome::TimedOut);
            return TickAction::TimedOut;
        }

        let due = act
            .last_step_at
            .is_none_or(|last| now.saturating_duration_since(last) >= act.spec.period);
        if !due {
            return TickAction::Skip;
        }
        // Previous step still out: skip rather than run two at once
        let Some(work) = act.work.take() else {
            return TickAction::Skip;
        };
        act.last_step_at = Some(now);
        let step_index = act.steps;
        act.steps += 1;
        TickAction::Step(StepJob {
            instance_id: act.instance_id,
            elapsed: self.elapsed,
            step_index,
            params: Arc::clone(&act.spec.params),
            work,
        })
    }

    /// Hand back work after a step and apply its result
    pub fn finish_step(
        &mut self,
        instance_id: u64,
        work: Box<dyn TaskStep>,
        result: StepResult,
    ) -> StepDisposition {
        let Some(act) = self.activation.as_mut() else {
            return StepDisposition::Discarded;
        };
        if act.instance_id != instance_id {
            return StepDisposition::Discarded;
        }
        match result {
            StepResult::Incomplete => {
                act.work = Some(work);
                StepDisposition::Continue
            }
            StepResult::Done => {
                let restart = act.spec.auto_restart.then(|| act.spec.clone());
                self.end(TaskState::Idle, TaskOutcome::Completed);
                StepDisposition::Completed(restart)
            }
            StepResult::Failed(message) => {
                self.last_error = Some(message);
                self.end(TaskState::Error, TaskOutcome::Failed);
                StepDisposition::Failed
            }
        }
    }

    /// Record a failure raised outside a step (e.g. a failed auto restart)
    pub fn fail(&mut self, message: String) {
        self.last_error = Some(message);
        self.end(TaskState::Error, TaskOutcome::Failed);
    }

    /// Consistent copy of the status fields
    pub fn status(&self) -> TaskStatus {
        TaskStatus {
            name: self.name().to_string(),
            state: self.state,
            instance_id: self.last_instance_id,
            elapsed: self.elapsed.as_secs_f64(),
            period: self.last_period.map(|p| p.as_secs_f64()),
            auto_restart: self.last_auto_restart,
            last_error: self.last_error.clone(),
            last_outcome: self.last_outcome,
            recent: self.recent.iter().copied().collect(),
            status_time: self.status_time,
        }
    }

    fn end(&mut self, state: TaskState, outcome: TaskOutcome) {
        if let Some(act) = self.activation.take() {
            if self.recent.len() == RECENT_OUTCOMES {
                self.recent.pop_front();
            }
            self.recent.push_back(FinishedActivation {
                instance_id: act.instance_id,
                outcome,
            });
        }
        self.last_outcome = Some(outcome);
        self.set_state(state);
    }

    fn set_state(&mut self, state: TaskState) {
        self.state = state;
        self.status_time = Utc::now();
    }
}
