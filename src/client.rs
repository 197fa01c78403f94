//! Client facade for remote callers.
//!
//! [`TaskClient`] speaks the control protocol over any [`Transport`]. The
//! in-process [`LocalTransport`] sends every request through its JSON text
//! form so it behaves like a real wire.
//!
//! Waiting is done by polling the status map. A wait can also be cut short by
//! [`WaitCondition`]s registered on the client: when any of them holds, the
//! awaited tasks are stopped and the wait fails with
//! [`TaskError::ConditionVerified`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::{Result, TaskError};
use crate::params::ParameterSet;
use crate::protocol::{
    self, ControlReply, ControlRequest, ControlResponse, StartTaskParams, StopAllReply,
    StopTaskParams, TaskDirectory, methods,
};
use crate::registry::TaskDescriptor;
use crate::scheduler::Scheduler;
use crate::status::{StatusSnapshot, TaskStatus};
use crate::task::TaskOutcome;

/// Request/response carrier between a client and the scheduler.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, request: ControlRequest) -> Result<ControlResponse>;
}

/// Transport that dispatches straight into a scheduler in the same process.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    scheduler: Scheduler,
}

impl LocalTransport {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn call(&self, request: ControlRequest) -> Result<ControlResponse> {
        let wire = serde_json::to_string(&request)?;
        let response = protocol::dispatch_json(&self.scheduler, &wire);
        let wire = serde_json::to_string(&response)?;
        Ok(serde_json::from_str(&wire)?)
    }
}

type Predicate = Box<dyn Fn(&StatusSnapshot) -> bool + Send + Sync>;

/// Named predicate over the status map that ends a wait early.
pub struct WaitCondition {
    name: String,
    predicate: Predicate,
}

impl WaitCondition {
    pub fn new(
        name: impl Into<String>,
        predicate: impl Fn(&StatusSnapshot) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            predicate: Box::new(predicate),
        }
    }

    /// Holds once activation `instance_id` of `task` has completed.
    pub fn is_completed(task: &str, instance_id: u64) -> Self {
        let task = task.to_string();
        let name = format!("{} #{} completed", task, instance_id);
        Self::new(name, move |snapshot| {
            snapshot.get(&task).and_then(|s| s.outcome_of(instance_id))
                == Some(TaskOutcome::Completed)
        })
    }

    /// Holds while activation `instance_id` of `task` is active.
    pub fn is_running(task: &str, instance_id: u64) -> Self {
        let task = task.to_string();
        let name = format!("{} #{} running", task, instance_id);
        Self::new(name, move |snapshot| {
            snapshot
                .get(&task)
                .is_some_and(|s| s.instance_id == Some(instance_id) && s.state.is_active())
        })
    }

    /// Holds when `self` does not.
    pub fn negate(self) -> Self {
        let name = format!("not {}", self.name);
        let inner = self.predicate;
        Self::new(name, move |snapshot| !inner(snapshot))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_verified(&self, snapshot: &StatusSnapshot) -> bool {
        (self.predicate)(snapshot)
    }
}

impl fmt::Debug for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitCondition").field("name", &self.name).finish()
    }
}

/// Typed client for the control protocol.
pub struct TaskClient<T: Transport> {
    transport: T,
    next_id: AtomicU64,
    conditions: Mutex<Vec<WaitCondition>>,
}

impl<T: Transport> TaskClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
            conditions: Mutex::new(Vec::new()),
        }
    }

    /// Registered tasks, in registration order.
    pub async fn task_directory(&self) -> Result<Vec<TaskDescriptor>> {
        let dir: TaskDirectory = self.request(methods::TASK_DIRECTORY, json!({})).await?;
        Ok(dir.tasks)
    }

    /// Full status snapshot.
    pub async fn status_snapshot(&self) -> Result<StatusSnapshot> {
        self.request(methods::STATUS_MAP, json!({})).await
    }

    /// Status snapshot keyed by task name.
    pub async fn status_map(&self) -> Result<BTreeMap<String, TaskStatus>> {
        let snapshot = self.status_snapshot().await?;
        Ok(snapshot
            .into_tasks()
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect())
    }

    /// Status of one task.
    pub async fn task_status(&self, name: &str) -> Result<TaskStatus> {
        let snapshot = self.status_snapshot().await?;
        snapshot
            .get(name)
            .cloned()
            .ok_or_else(|| TaskError::TaskNotFound(name.to_string()))
    }

    /// Start a task and return the new instance id.
    pub async fn start_task(
        &self,
        name: &str,
        auto_restart: bool,
        period: f64,
        params: ParameterSet,
    ) -> Result<u64> {
        let params = StartTaskParams {
            name: name.to_string(),
            auto_restart,
            period,
            params,
        };
        let params = serde_json::to_value(params)?;
        let reply: ControlReply = self.request(methods::START_TASK, params).await?;
        reply
            .into_result()?
            .ok_or_else(|| TaskError::Protocol("start reply without instance id".into()))
    }

    pub async fn stop_task(&self, name: &str) -> Result<()> {
        let params = serde_json::to_value(StopTaskParams {
            name: name.to_string(),
        })?;
        let reply: ControlReply = self.request(methods::STOP_TASK, params).await?;
        reply.into_result().map(|_| ())
    }

    /// Return every task to idle, reporting how many were active.
    pub async fn stop_all(&self) -> Result<usize> {
        let reply: StopAllReply = self.request(methods::STOP_ALL, json!({})).await?;
        Ok(reply.stopped)
    }

    pub fn add_condition(&self, condition: WaitCondition) {
        self.conditions().push(condition);
    }

    pub fn clear_conditions(&self) {
        self.conditions().clear();
    }

    /// Names of the registered conditions that hold in `snapshot`.
    pub fn verified_conditions(&self, snapshot: &StatusSnapshot) -> Vec<String> {
        self.conditions()
            .iter()
            .filter(|c| c.is_verified(snapshot))
            .map(|c| c.name().to_string())
            .collect()
    }

    /// Poll until activation `instance_id` of `name` has ended.
    pub async fn wait_task(
        &self,
        name: &str,
        instance_id: u64,
        poll: Duration,
    ) -> Result<TaskOutcome> {
        self.wait_all_tasks(&[(name, instance_id)], poll)
            .await?
            .pop()
            .ok_or_else(|| TaskError::Protocol("wait returned no outcome".into()))
    }

    /// Poll until every listed activation has ended; outcomes follow `targets`.
    pub async fn wait_all_tasks(
        &self,
        targets: &[(&str, u64)],
        poll: Duration,
    ) -> Result<Vec<TaskOutcome>> {
        loop {
            let progress = self.poll_targets(targets).await?;
            if let Some(outcomes) = progress.into_iter().collect::<Option<Vec<_>>>() {
                return Ok(outcomes);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Poll until one listed activation has ended and return its index and
    /// outcome. With `stop_others`, the activations still running are stopped.
    pub async fn wait_any_tasks(
        &self,
        targets: &[(&str, u64)],
        stop_others: bool,
        poll: Duration,
    ) -> Result<(usize, TaskOutcome)> {
        if targets.is_empty() {
            return Err(TaskError::Protocol("no tasks to wait for".into()));
        }
        loop {
            let progress = self.poll_targets(targets).await?;
            let finished = progress
                .iter()
                .enumerate()
                .find_map(|(i, outcome)| outcome.map(|o| (i, o)));
            if let Some((index, outcome)) = finished {
                if stop_others {
                    for ((name, _), pending) in targets.iter().zip(&progress) {
                        if pending.is_none() {
                            self.stop_task(name).await?;
                        }
                    }
                }
                return Ok((index, outcome));
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Start a task and wait for that activation to end.
    pub async fn start_task_and_wait(
        &self,
        name: &str,
        period: f64,
        params: ParameterSet,
        poll: Duration,
    ) -> Result<TaskOutcome> {
        let instance_id = self.start_task(name, false, period, params).await?;
        self.wait_task(name, instance_id, poll).await
    }

    /// One poll: `None` for activations still running
    async fn poll_targets(&self, targets: &[(&str, u64)]) -> Result<Vec<Option<TaskOutcome>>> {
        let snapshot = self.status_snapshot().await?;

        let verified = self.verified_conditions(&snapshot);
        if !verified.is_empty() {
            self.clear_conditions();
            for (name, instance_id) in targets {
                let running = snapshot
                    .get(name)
                    .is_some_and(|s| s.instance_id == Some(*instance_id) && s.state.is_active());
                if running {
                    self.stop_task(name).await?;
                }
            }
            log::info!("Wait on {:?} ended by {:?}", targets, verified);
            return Err(TaskError::ConditionVerified(verified));
        }

        targets
            .iter()
            .map(|(name, instance_id)| activation_progress(&snapshot, name, *instance_id))
            .collect()
    }

    fn conditions(&self) -> std::sync::MutexGuard<'_, Vec<WaitCondition>> {
        self.conditions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn request<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let response = self.transport.call(ControlRequest::new(id, method, params)).await?;
        Ok(serde_json::from_value(response.into_result(id)?)?)
    }
}

/// Outcome of one activation as recorded in `snapshot`, `None` while running
fn activation_progress(
    snapshot: &StatusSnapshot,
    name: &str,
    instance_id: u64,
) -> Result<Option<TaskOutcome>> {
    let status = snapshot
        .get(name)
        .ok_or_else(|| TaskError::TaskNotFound(name.to_string()))?;
    if let Some(outcome) = status.outcome_of(instance_id) {
        return Ok(Some(outcome));
    }
    if status.instance_id == Some(instance_id) && status.state.is_active() {
        return Ok(None);
    }
    Err(TaskError::Protocol(format!(
        "instance {} of {} is not known",
        instance_id, name
    )))
}
