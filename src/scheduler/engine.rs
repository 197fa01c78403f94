//! Scheduler - drives active tasks on a fixed tick and serves control requests
//!
//! All per-task mutable state lives in one `Mutex<Vec<TaskInstance>>`, indexed
//! by registry position. The lock is held only to read or write state: step
//! work is lifted out before it runs and handed back afterwards, so status
//! queries and start/stop requests never wait on a running step.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{Result, TaskError};
use crate::params::{ParameterSet, TASK_TIMEOUT};
use crate::registry::{TaskDescriptor, TaskRegistry};
use crate::scheduler::command::{Command, CommandReceiver, CommandSender, command_channel};
use crate::scheduler::config::{SchedulerConfig, StartPolicy};
use crate::scheduler::tick::{self, TickReport, TickStats, run_step};
use crate::status::{StatusReporter, StatusSnapshot, TaskStatus};
use crate::task::{
    ActivationSpec, StepDisposition, TaskDefinition, TaskInstance, TaskState, TickAction,
};

/// Identifies one accepted activation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub name: String,
    pub instance_id: u64,
}

struct Shared {
    config: SchedulerConfig,
    registry: TaskRegistry,
    instances: Mutex<Vec<TaskInstance>>,
    stats: Mutex<TickStats>,
    next_instance_id: AtomicU64,
    commands_tx: CommandSender,
    commands_rx: Mutex<CommandReceiver>,
}

struct TickLoop {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

/// Cooperative task scheduler
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
    tick_loop: Arc<Mutex<Option<TickLoop>>>,
}

impl Scheduler {
    /// Build a scheduler over a fully populated registry
    pub fn new(registry: TaskRegistry, config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        let instances = registry.iter().map(|d| TaskInstance::new(Arc::clone(d))).collect();
        let (commands_tx, commands_rx) = command_channel();
        log::info!(
            "Scheduler created with {} task(s), tick {:?}, start policy {:?}",
            registry.len(),
            config.tick_interval(),
            config.start_policy
        );
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                registry,
                instances: Mutex::new(instances),
                stats: Mutex::new(TickStats::default()),
                next_instance_id: AtomicU64::new(1),
                commands_tx,
                commands_rx: Mutex::new(commands_rx),
            }),
            tick_loop: Arc::new(Mutex::new(None)),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.shared.registry
    }

    /// Start a task now
    pub fn start(
        &self,
        name: &str,
        auto_restart: bool,
        period: f64,
        params: ParameterSet,
    ) -> Result<TaskHandle> {
        self.start_at(name, auto_restart, period, params, Instant::now())
    }

    /// Start a task as of `now`, for callers driving their own clock
    pub fn start_at(
        &self,
        name: &str,
        auto_restart: bool,
        period: f64,
        params: ParameterSet,
        now: Instant,
    ) -> Result<TaskHandle> {
        let pos = self.shared.registry.position(name)?;
        let definition = Arc::clone(self.definition(pos));
        let period = period_from_secs(period)?;
        let timeout = self.resolve_timeout(definition.as_ref(), &params)?;

        let policy = self.shared.config.start_policy;
        let busy = self.lock().get(pos).is_some_and(|i| i.state().is_active());
        if policy == StartPolicy::Reject && busy {
            return Err(TaskError::TaskAlreadyRunning(name.to_string()));
        }

        // User code; keep it outside the lock
        let work = tick::instantiate(definition.as_ref(), &params)?;
        let spec = ActivationSpec {
            period,
            timeout,
            auto_restart,
            params: Arc::new(params),
        };

        let instance_id = {
            let mut instances = self.lock();
            let inst = &mut instances[pos];
            if inst.state().is_active() {
                match policy {
                    StartPolicy::Reject => {
                        return Err(TaskError::TaskAlreadyRunning(name.to_string()));
                    }
                    StartPolicy::Preempt => {
                        log::info!("Preempting task {} (instance {:?})", name, inst.instance_id());
                        inst.stop();
                    }
                }
            }
            let id = self.next_instance_id();
            inst.activate(id, spec, work, now);
            id
        };
        self.with_stats(|s| s.total_started += 1);

        log::info!(
            "Started task {} instance {} (period {:?}, timeout {:?}, auto_restart {})",
            name,
            instance_id,
            period,
            timeout,
            auto_restart
        );
        Ok(TaskHandle {
            name: name.to_string(),
            instance_id,
        })
    }

    /// Return a task to Idle; idempotent for tasks that are not running
    pub fn stop(&self, name: &str) -> Result<()> {
        let pos = self.shared.registry.position(name)?;
        let stopped = self.lock()[pos].stop();
        if stopped {
            log::info!("Stopped task {}", name);
        } else {
            log::debug!("Stop requested for idle task {}", name);
        }
        Ok(())
    }

    /// Return every task to Idle, returning how many were active
    pub fn stop_all(&self) -> usize {
        let stopped = self.lock().iter_mut().map(TaskInstance::stop).filter(|s| *s).count();
        if stopped > 0 {
            log::info!("Stopped {} task(s)", stopped);
        }
        stopped
    }

    /// Advance every task by one tick
    pub fn tick(&self) -> TickReport {
        self.tick_at(Instant::now())
    }

    /// Tick as of `now`, for callers driving their own clock
    pub fn tick_at(&self, now: Instant) -> TickReport {
        self.apply_queued_commands(now);

        let mut report = TickReport::default();
        let mut jobs = Vec::new();
        {
            let mut instances = self.lock();
            for (pos, inst) in instances.iter_mut().enumerate() {
                match inst.on_tick(now) {
                    TickAction::Skip => {}
                    TickAction::TimedOut => {
                        log::warn!("Task {} timed out after {:?}", inst.name(), inst.elapsed());
                        report.timed_out += 1;
                    }
                    TickAction::Step(job) => jobs.push((pos, job)),
                }
            }
        }

        let budget = self.shared.config.step_budget();
        let mut results = Vec::with_capacity(jobs.len());
        for (pos, mut job) in jobs {
            let name = self.definition(pos).name();
            let result = run_step(name, &mut job, &self.shared.commands_tx, budget);
            report.stepped += 1;
            results.push((pos, job.instance_id, job.work, result));
        }

        let mut restarts = Vec::new();
        {
            let mut instances = self.lock();
            for (pos, instance_id, work, result) in results {
                let inst = &mut instances[pos];
                match inst.finish_step(instance_id, work, result) {
                    StepDisposition::Continue => {}
                    StepDisposition::Discarded => {
                        log::debug!(
                            "Dropped stale step result for {} instance {}",
                            inst.name(),
                            instance_id
                        );
                        report.discarded += 1;
                    }
                    StepDisposition::Completed(restart) => {
                        log::info!("Task {} instance {} completed", inst.name(), instance_id);
                        report.completed += 1;
                        if let Some(spec) = restart {
                            restarts.push((pos, instance_id, spec));
                        }
                    }
                    StepDisposition::Failed => {
                        log::warn!(
                            "Task {} instance {} failed: {}",
                            inst.name(),
                            instance_id,
                            inst.last_error().unwrap_or_default()
                        );
                        report.failed += 1;
                    }
                }
            }
        }

        for (pos, finished_id, spec) in restarts {
            if self.restart(pos, finished_id, spec, now) {
                report.restarted += 1;
            }
        }

        self.with_stats(|s| s.record(&report));
        report
    }

    /// Consistent copy of every task's status
    pub fn status_snapshot(&self) -> StatusSnapshot {
        StatusReporter::snapshot(self.lock().iter())
    }

    pub fn task_status(&self, name: &str) -> Result<TaskStatus> {
        let pos = self.shared.registry.position(name)?;
        Ok(self.lock()[pos].status())
    }

    pub fn task_directory(&self) -> Vec<TaskDescriptor> {
        self.shared.registry.directory()
    }

    pub fn stats(&self) -> TickStats {
        self.shared.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Spawn the tick loop on the current tokio runtime
    pub fn start_scheduler(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TaskError::Runtime(e.to_string()))?;
        let mut tick_loop = self.tick_loop.lock().unwrap_or_else(PoisonError::into_inner);
        if tick_loop.is_some() {
            return Err(TaskError::SchedulerAlreadyRunning);
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let scheduler = self.clone();
        let period = self.shared.config.tick_interval();
        let join = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let report = scheduler.tick();
                        if report.has_transitions() {
                            log::debug!("Tick: {:?}", report);
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            log::info!("Tick loop stopped");
        });

        *tick_loop = Some(TickLoop { shutdown_tx, join });
        log::info!("Tick loop started, interval {:?}", period);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.tick_loop.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Stop the tick loop and return every task to Idle
    pub async fn shutdown(&self) {
        let tick_loop = self.tick_loop.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(tl) = tick_loop {
            let _ = tl.shutdown_tx.send(()).await;
            if let Err(e) = tl.join.await {
                log::warn!("Tick loop ended abnormally: {}", e);
            }
        }
        let stopped = self.stop_all();
        log::info!("Scheduler shut down, {} task(s) stopped", stopped);
    }

    fn apply_queued_commands(&self, now: Instant) {
        let commands: Vec<Command> = {
            let mut rx = self.shared.commands_rx.lock().unwrap_or_else(PoisonError::into_inner);
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };
        for command in commands {
            match command {
                Command::Start {
                    name,
                    auto_restart,
                    period,
                    params,
                } => {
                    if let Err(e) = self.start_at(&name, auto_restart, period, params, now) {
                        log::warn!("Queued start of {} rejected: {}", name, e);
                    }
                }
                Command::Stop { name } => {
                    if let Err(e) = self.stop(&name) {
                        log::warn!("Queued stop of {} rejected: {}", name, e);
                    }
                }
            }
        }
    }

    /// Re-activate a completed auto-restart task unless someone touched it
    fn restart(&self, pos: usize, finished_id: u64, spec: ActivationSpec, now: Instant) -> bool {
        let definition = Arc::clone(self.definition(pos));
        let work = tick::instantiate(definition.as_ref(), &spec.params);

        let mut instances = self.lock();
        let inst = &mut instances[pos];
        if inst.state() != TaskState::Idle || inst.instance_id() != Some(finished_id) {
            return false;
        }
        match work {
            Ok(work) => {
                let id = self.next_instance_id();
                inst.activate(id, spec, work, now);
                log::info!("Restarted task {} as instance {}", definition.name(), id);
                true
            }
            Err(e) => {
                log::warn!("Restart of {} failed: {}", definition.name(), e);
                inst.fail(e.to_string());
                false
            }
        }
    }

    fn resolve_timeout(
        &self,
        definition: &dyn TaskDefinition,
        params: &ParameterSet,
    ) -> Result<Option<Duration>> {
        match params.optional_number(TASK_TIMEOUT)? {
            Some(secs) if secs > 0.0 => Ok(Duration::try_from_secs_f64(secs).ok()),
            Some(_) => Ok(None),
            None => Ok(definition
                .default_timeout()
                .or_else(|| self.shared.config.default_timeout())),
        }
    }

    fn definition(&self, pos: usize) -> &Arc<dyn TaskDefinition> {
        self.shared.registry.definition_at(pos)
    }

    fn next_instance_id(&self) -> u64 {
        self.shared.next_instance_id.fetch_add(1, Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TaskInstance>> {
        self.shared.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_stats(&self, f: impl FnOnce(&mut TickStats)) {
        let mut stats = self.shared.stats.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *stats);
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.shared.config)
            .field("registry", &self.shared.registry)
            .field("running", &self.is_running())
            .finish()
    }
}

fn period_from_secs(period: f64) -> Result<Duration> {
    if !(period.is_finite() && period > 0.0) {
        return Err(TaskError::InvalidPeriod(period));
    }
    Duration::try_from_secs_f64(period).map_err(|_| TaskError::InvalidPeriod(period))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::TASK_DURATION;
    use crate::task::{FnTask, StepContext, StepResult, TaskOutcome, TaskStep, WaitTask};

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    fn scheduler_with(policy: StartPolicy) -> Scheduler {
        let mut registry = TaskRegistry::new();
        registry.register(Arc::new(WaitTask::new("Test"))).unwrap();
        registry.register(Arc::new(WaitTask::new("Other"))).unwrap();
        registry
            .register(FnTask::arc("Faulty", |_ctx: &StepContext<'_>| {
                StepResult::Failed("bad sensor".into())
            }))
            .unwrap();
        registry
            .register(FnTask::arc("Panicky", |_ctx: &StepContext<'_>| panic!("boom")))
            .unwrap();
        registry
            .register(FnTask::arc("Stopper", |ctx: &StepContext<'_>| {
                ctx.request_stop("Other");
                StepResult::Done
            }))
            .unwrap();
        let config = SchedulerConfig::new(Duration::from_millis(500)).with_start_policy(policy);
        Scheduler::new(registry, config).unwrap()
    }

    fn scheduler() -> Scheduler {
        scheduler_with(StartPolicy::Reject)
    }

    fn long_wait() -> ParameterSet {
        ParameterSet::new().with(TASK_DURATION, 50.0)
    }

    #[test]
    fn test_start_shows_active_with_zero_elapsed() {
        let s = scheduler();
        let handle = s.start("Test", true, 0.5, long_wait()).unwrap();
        assert_eq!(handle.name, "Test");

        let snap = s.status_snapshot();
        let st = snap.get("Test").unwrap();
        assert_eq!(st.state, TaskState::Active);
        assert_eq!(st.elapsed, 0.0);
        assert_eq!(st.instance_id, Some(handle.instance_id));
        assert_eq!(st.period, Some(0.5));
        assert!(st.auto_restart);
    }

    #[test]
    fn test_instance_ids_increase() {
        let s = scheduler();
        let a = s.start("Test", false, 0.5, long_wait()).unwrap();
        let b = s.start("Other", false, 0.5, long_wait()).unwrap();
        assert!(b.instance_id > a.instance_id);
    }

    #[test]
    fn test_start_unknown_task() {
        let s = scheduler();
        let before = s.status_snapshot();
        let err = s.start("Nope", false, 0.5, ParameterSet::new()).unwrap_err();
        assert!(matches!(err, TaskError::TaskNotFound(ref n) if n == "Nope"));
        let after = s.status_snapshot();
        assert_eq!(before.tasks().len(), after.tasks().len());
        assert!(
            after
                .tasks()
                .iter()
                .all(|t| t.state == TaskState::Idle && t.instance_id.is_none())
        );
    }

    #[test]
    fn test_start_invalid_period() {
        let s = scheduler();
        for period in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = s.start("Test", false, period, ParameterSet::new()).unwrap_err();
            assert!(matches!(err, TaskError::InvalidPeriod(_)), "period {period}");
        }
        assert_eq!(s.status_snapshot().state_of("Test"), Some(TaskState::Idle));
    }

    #[test]
    fn test_start_rejects_bad_timeout_type() {
        let s = scheduler();
        let params = ParameterSet::new().with(TASK_TIMEOUT, "soon");
        let err = s.start("Test", false, 0.5, params).unwrap_err();
        assert!(matches!(err, TaskError::ParameterTypeMismatch { .. }));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let s = scheduler();
        assert!(s.stop("Test").is_ok());
        s.start("Test", false, 0.5, long_wait()).unwrap();
        assert!(s.stop("Test").is_ok());
        assert!(s.stop("Test").is_ok());
        let st = s.task_status("Test").unwrap();
        assert_eq!(st.state, TaskState::Idle);
        assert_eq!(st.last_outcome, Some(TaskOutcome::Stopped));
    }

    #[test]
    fn test_stop_unknown_task() {
        let s = scheduler();
        assert!(matches!(s.stop("Nope"), Err(TaskError::TaskNotFound(_))));
    }

    #[test]
    fn test_double_start_rejected() {
        let s = scheduler();
        let first = s.start("Test", false, 0.5, long_wait()).unwrap();
        let err = s.start("Test", false, 0.5, long_wait()).unwrap_err();
        assert!(matches!(err, TaskError::TaskAlreadyRunning(_)));
        assert_eq!(s.task_status("Test").unwrap().instance_id, Some(first.instance_id));
    }

    #[test]
    fn test_double_start_preempts() {
        let s = scheduler_with(StartPolicy::Preempt);
        let t0 = Instant::now();
        let first = s.start_at("Test", false, 0.5, long_wait(), t0).unwrap();
        s.tick_at(t0 + secs(2.0));
        assert_eq!(s.task_status("Test").unwrap().elapsed, 2.0);

        let second = s.start_at("Test", false, 0.5, long_wait(), t0 + secs(2.1)).unwrap();
        assert!(second.instance_id > first.instance_id);
        let st = s.task_status("Test").unwrap();
        assert_eq!(st.state, TaskState::Active);
        assert_eq!(st.elapsed, 0.0);
        assert_eq!(st.instance_id, Some(second.instance_id));
    }

    #[test]
    fn test_timeout_transitions_within_one_tick() {
        let s = scheduler();
        let t0 = Instant::now();
        let params = long_wait().with(TASK_TIMEOUT, 5.0);
        s.start_at("Test", true, 0.5, params, t0).unwrap();

        let mut tick = 0;
        loop {
            tick += 1;
            let now = t0 + secs(0.5 * tick as f64);
            let report = s.tick_at(now);
            let state = s.status_snapshot().state_of("Test").unwrap();
            if now - t0 < secs(5.0) {
                assert_eq!(state, TaskState::Active, "tick {tick}");
                assert_eq!(report.timed_out, 0);
            } else {
                assert_eq!(state, TaskState::TimedOut);
                assert_eq!(report.timed_out, 1);
                break;
            }
        }

        s.tick_at(t0 + secs(0.5 * (tick + 1) as f64));
        let st = s.task_status("Test").unwrap();
        assert_eq!(st.state, TaskState::Idle);
        assert_eq!(st.last_outcome, Some(TaskOutcome::TimedOut));
    }

    #[test]
    fn test_completion_returns_to_idle() {
        let s = scheduler();
        let t0 = Instant::now();
        let params = ParameterSet::new().with(TASK_DURATION, 1.0);
        s.start_at("Test", false, 0.5, params, t0).unwrap();
        s.tick_at(t0 + secs(0.5));
        assert_eq!(s.task_status("Test").unwrap().state, TaskState::Active);
        let report = s.tick_at(t0 + secs(1.0));
        assert_eq!(report.completed, 1);
        let st = s.task_status("Test").unwrap();
        assert_eq!(st.state, TaskState::Idle);
        assert_eq!(st.last_outcome, Some(TaskOutcome::Completed));
    }

    #[test]
    fn test_auto_restart_after_completion() {
        let s = scheduler();
        let t0 = Instant::now();
        let params = ParameterSet::new().with(TASK_DURATION, 1.0);
        let first = s.start_at("Test", true, 0.5, params, t0).unwrap();
        let report = s.tick_at(t0 + secs(1.0));
        assert_eq!(report.completed, 1);
        assert_eq!(report.restarted, 1);

        let st = s.task_status("Test").unwrap();
        assert_eq!(st.state, TaskState::Active);
        assert!(st.instance_id.unwrap() > first.instance_id);
        assert_eq!(st.elapsed, 0.0);
    }

    #[test]
    fn test_period_spaces_steps() {
        let mut registry = TaskRegistry::new();
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        registry
            .register(FnTask::arc("Count", move |_ctx: &StepContext<'_>| {
                counter.fetch_add(1, Ordering::SeqCst);
                StepResult::Incomplete
            }))
            .unwrap();
        let s = Scheduler::new(registry, SchedulerConfig::default()).unwrap();
        let t0 = Instant::now();
        s.start_at("Count", false, 1.0, ParameterSet::new(), t0).unwrap();
        for i in 0..=8 {
            s.tick_at(t0 + secs(0.25 * i as f64));
        }
        // Steps at 0.0, 1.0, 2.0
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_failed_step_sets_error_then_idle() {
        let s = scheduler();
        let t0 = Instant::now();
        s.start_at("Faulty", false, 0.5, ParameterSet::new(), t0).unwrap();
        s.start_at("Test", false, 0.5, long_wait(), t0).unwrap();

        let report = s.tick_at(t0 + secs(0.5));
        assert_eq!(report.failed, 1);
        let snap = s.status_snapshot();
        let faulty = snap.get("Faulty").unwrap();
        assert_eq!(faulty.state, TaskState::Error);
        assert_eq!(faulty.last_error.as_deref(), Some("bad sensor"));
        // Sibling unaffected
        assert_eq!(snap.state_of("Test"), Some(TaskState::Active));

        s.tick_at(t0 + secs(1.0));
        let faulty = s.task_status("Faulty").unwrap();
        assert_eq!(faulty.state, TaskState::Idle);
        assert_eq!(faulty.last_error.as_deref(), Some("bad sensor"));
        assert_eq!(faulty.last_outcome, Some(TaskOutcome::Failed));
    }

    #[test]
    fn test_panicking_step_is_contained() {
        let s = scheduler();
        let t0 = Instant::now();
        s.start_at("Panicky", false, 0.5, ParameterSet::new(), t0).unwrap();
        let report = s.tick_at(t0);
        assert_eq!(report.failed, 1);
        let st = s.task_status("Panicky").unwrap();
        assert_eq!(st.state, TaskState::Error);
        assert!(st.last_error.unwrap().contains("boom"));
    }

    struct Finish;

    impl TaskStep for Finish {
        fn step(&mut self, _ctx: &StepContext<'_>) -> StepResult {
            StepResult::Done
        }
    }

    /// Factory that works `healthy` times, then panics
    struct FlakyFactory {
        name: &'static str,
        healthy: u64,
        calls: AtomicU64,
    }

    impl FlakyFactory {
        fn arc(name: &'static str, healthy: u64) -> Arc<Self> {
            Arc::new(Self {
                name,
                healthy,
                calls: AtomicU64::new(0),
            })
        }
    }

    impl TaskDefinition for FlakyFactory {
        fn name(&self) -> &str {
            self.name
        }

        fn instantiate(&self, _params: &ParameterSet) -> Result<Box<dyn TaskStep>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.healthy {
                panic!("factory exhausted");
            }
            Ok(Box::new(Finish))
        }
    }

    fn flaky_scheduler(tick: Duration) -> Scheduler {
        let mut registry = TaskRegistry::new();
        registry.register(FlakyFactory::arc("Flaky", 1)).unwrap();
        registry.register(FlakyFactory::arc("Broken", 0)).unwrap();
        registry.register(Arc::new(WaitTask::new("Sibling"))).unwrap();
        registry
            .register(FnTask::arc("Launcher", |ctx: &StepContext<'_>| {
                ctx.request_start("Broken", false, 0.5, ParameterSet::new());
                StepResult::Done
            }))
            .unwrap();
        Scheduler::new(registry, SchedulerConfig::new(tick)).unwrap()
    }

    #[test]
    fn test_panicking_restart_factory_is_contained() {
        let s = flaky_scheduler(Duration::from_millis(500));
        let t0 = Instant::now();
        let params = ParameterSet::new().with(TASK_DURATION, 1.0);
        s.start_at("Flaky", true, 0.5, ParameterSet::new(), t0).unwrap();
        s.start_at("Sibling", false, 0.5, params, t0).unwrap();

        let report = s.tick_at(t0);
        assert_eq!(report.completed, 1);
        assert_eq!(report.restarted, 0);
        let flaky = s.task_status("Flaky").unwrap();
        assert_eq!(flaky.state, TaskState::Error);
        assert_eq!(
            flaky.last_error.as_deref(),
            Some("Internal task fault: factory exhausted")
        );

        let report = s.tick_at(t0 + secs(1.0));
        assert_eq!(report.completed, 1);
        assert_eq!(s.task_status("Flaky").unwrap().state, TaskState::Idle);
        let sibling = s.task_status("Sibling").unwrap();
        assert_eq!(sibling.last_outcome, Some(TaskOutcome::Completed));
    }

    #[test]
    fn test_panicking_factory_rejects_start() {
        let s = flaky_scheduler(Duration::from_millis(500));
        let err = s.start("Broken", false, 0.5, ParameterSet::new()).unwrap_err();
        assert!(matches!(err, TaskError::InternalTaskFault(ref m) if m == "factory exhausted"));
        assert_eq!(s.task_status("Broken").unwrap().state, TaskState::Idle);
    }

    #[test]
    fn test_queued_start_with_panicking_factory_is_dropped() {
        let s = flaky_scheduler(Duration::from_millis(500));
        let t0 = Instant::now();
        s.start_at("Launcher", false, 0.5, ParameterSet::new(), t0).unwrap();
        s.start_at("Sibling", false, 0.5, long_wait(), t0).unwrap();
        s.tick_at(t0);
        s.tick_at(t0 + secs(0.5));
        assert_eq!(s.task_status("Broken").unwrap().state, TaskState::Idle);
        assert_eq!(s.task_status("Sibling").unwrap().state, TaskState::Active);
        assert_eq!(s.stats().tick_count, 2);
    }

    #[tokio::test]
    async fn test_tick_loop_survives_panicking_factory() {
        let s = flaky_scheduler(Duration::from_millis(10));
        let params = ParameterSet::new().with(TASK_DURATION, 0.2);
        s.start("Flaky", true, 0.01, ParameterSet::new()).unwrap();
        s.start("Sibling", false, 0.01, params).unwrap();
        s.start_scheduler().unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        let sibling = s.task_status("Sibling").unwrap();
        assert_eq!(sibling.state, TaskState::Idle);
        assert_eq!(sibling.last_outcome, Some(TaskOutcome::Completed));
        assert!(s.stats().tick_count > 10);
        s.shutdown().await;
    }

    #[test]
    fn test_step_requests_are_applied_next_tick() {
        let s = scheduler();
        let t0 = Instant::now();
        s.start_at("Other", false, 0.5, long_wait(), t0).unwrap();
        s.start_at("Stopper", false, 0.5, ParameterSet::new(), t0).unwrap();

        s.tick_at(t0);
        assert_eq!(s.task_status("Other").unwrap().state, TaskState::Active);
        s.tick_at(t0 + secs(0.5));
        assert_eq!(s.task_status("Other").unwrap().state, TaskState::Idle);
    }

    #[test]
    fn test_elapsed_never_decreases() {
        let s = scheduler();
        let t0 = Instant::now();
        s.start_at("Test", false, 0.5, long_wait(), t0).unwrap();
        let mut last = 0.0;
        for i in 0..10 {
            s.tick_at(t0 + secs(0.5 * i as f64));
            let elapsed = s.task_status("Test").unwrap().elapsed;
            assert!(elapsed >= last);
            last = elapsed;
        }
    }

    #[test]
    fn test_stop_all() {
        let s = scheduler();
        s.start("Test", false, 0.5, long_wait()).unwrap();
        s.start("Other", false, 0.5, long_wait()).unwrap();
        assert_eq!(s.stop_all(), 2);
        assert_eq!(s.status_snapshot().active().count(), 0);
    }

    #[test]
    fn test_definition_timeout_and_config_default() {
        let mut registry = TaskRegistry::new();
        registry
            .register(Arc::new(
                FnTask::new("Bounded", |_ctx: &StepContext<'_>| StepResult::Incomplete)
                    .with_timeout(secs(1.0)),
            ))
            .unwrap();
        registry.register(Arc::new(WaitTask::new("Plain"))).unwrap();
        let config = SchedulerConfig::default().with_default_timeout(secs(2.0));
        let s = Scheduler::new(registry, config).unwrap();

        let t0 = Instant::now();
        s.start_at("Bounded", false, 0.5, ParameterSet::new(), t0).unwrap();
        s.start_at("Plain", false, 0.5, long_wait(), t0).unwrap();
        s.tick_at(t0 + secs(1.0));
        assert_eq!(s.task_status("Bounded").unwrap().state, TaskState::TimedOut);
        assert_eq!(s.task_status("Plain").unwrap().state, TaskState::Active);
        s.tick_at(t0 + secs(2.0));
        assert_eq!(s.task_status("Plain").unwrap().state, TaskState::TimedOut);
    }

    #[test]
    fn test_non_positive_timeout_disables_timeout() {
        let s = scheduler();
        let t0 = Instant::now();
        s.start_at("Test", false, 0.5, long_wait().with(TASK_TIMEOUT, -1.0), t0).unwrap();
        s.tick_at(t0 + secs(30.0));
        assert_eq!(s.task_status("Test").unwrap().state, TaskState::Active);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SchedulerConfig {
            step_budget_ms: 0,
            ..Default::default()
        };
        assert!(Scheduler::new(TaskRegistry::new(), config).is_err());
    }

    #[test]
    fn test_start_scheduler_requires_runtime() {
        let s = scheduler();
        assert!(matches!(s.start_scheduler(), Err(TaskError::Runtime(_))));
    }

    #[tokio::test]
    async fn test_start_scheduler_twice() {
        let s = scheduler();
        s.start_scheduler().unwrap();
        assert!(s.is_running());
        assert!(matches!(s.start_scheduler(), Err(TaskError::SchedulerAlreadyRunning)));
        s.shutdown().await;
        assert!(!s.is_running());
    }

    #[tokio::test]
    async fn test_tick_loop_drives_tasks_and_shutdown_idles_them() {
        let mut registry = TaskRegistry::new();
        registry.register(Arc::new(WaitTask::new("Quick"))).unwrap();
        registry.register(Arc::new(WaitTask::new("Long"))).unwrap();
        let s = Scheduler::new(registry, SchedulerConfig::new(Duration::from_millis(10))).unwrap();
        s.start_scheduler().unwrap();

        s.start("Quick", false, 0.01, ParameterSet::new().with(TASK_DURATION, 0.05))
            .unwrap();
        s.start("Long", false, 0.01, long_wait()).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let snap = s.status_snapshot();
        assert_eq!(snap.get("Quick").unwrap().last_outcome, Some(TaskOutcome::Completed));
        assert_eq!(snap.state_of("Long"), Some(TaskState::Active));
        assert!(s.stats().tick_count > 0);

        s.shutdown().await;
        assert_eq!(s.status_snapshot().state_of("Long"), Some(TaskState::Idle));
    }
}
