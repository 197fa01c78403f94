//! Scheduler configuration
//!
//! Replaces process-wide scheduler globals with an explicit value passed to
//! [`Scheduler::new`](super::Scheduler::new).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TaskError};

/// What `start` does when the task is already active
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartPolicy {
    /// Fail with `TaskAlreadyRunning`
    #[default]
    Reject,
    /// Stop the running activation and start a fresh one
    Preempt,
}

/// Configuration for the scheduler and its tick loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Interval between ticks
    pub tick_interval_ms: u64,
    /// Steps running longer than this are reported
    pub step_budget_ms: u64,
    /// Policy for starting an already active task
    pub start_policy: StartPolicy,
    /// Timeout applied when neither the request nor the definition sets one
    pub default_timeout_secs: Option<f64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 500,
            step_budget_ms: 50,
            start_policy: StartPolicy::Reject,
            default_timeout_secs: None,
        }
    }
}

impl SchedulerConfig {
    /// Create a config with a custom tick interval
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            tick_interval_ms: tick_interval.as_millis() as u64,
            ..Default::default()
        }
    }

    pub fn with_start_policy(mut self, policy: StartPolicy) -> Self {
        self.start_policy = policy;
        self
    }

    pub fn with_step_budget(mut self, budget: Duration) -> Self {
        self.step_budget_ms = budget.as_millis() as u64;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_secs = Some(timeout.as_secs_f64());
        self
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn step_budget(&self) -> Duration {
        Duration::from_millis(self.step_budget_ms)
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(TaskError::InvalidConfig("tick_interval_ms must be > 0".to_string()));
        }
        if self.step_budget_ms == 0 {
            return Err(TaskError::InvalidConfig("step_budget_ms must be > 0".to_string()));
        }
        if let Some(secs) = self.default_timeout_secs
            && !(secs.is_finite() && secs > 0.0)
        {
            return Err(TaskError::InvalidConfig(format!(
                "default_timeout_secs must be a positive number, got {}",
                secs
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.tick_interval(), Duration::from_millis(500));
        assert_eq!(config.step_budget(), Duration::from_millis(50));
        assert_eq!(config.start_policy, StartPolicy::Reject);
        assert_eq!(config.default_timeout(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = SchedulerConfig::new(Duration::from_millis(20))
            .with_start_policy(StartPolicy::Preempt)
            .with_step_budget(Duration::from_millis(5))
            .with_default_timeout(Duration::from_secs(3));
        assert_eq!(config.tick_interval_ms, 20);
        assert_eq!(config.step_budget_ms, 5);
        assert_eq!(config.start_policy, StartPolicy::Preempt);
        assert_eq!(config.default_timeout(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_invalid_zero_interval() {
        let config = SchedulerConfig {
            tick_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TaskError::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_default_timeout() {
        let config = SchedulerConfig {
            default_timeout_secs: Some(-2.0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_partial() {
        let config: SchedulerConfig =
            serde_yaml::from_str("start_policy: preempt\ntick_interval_ms: 100\n").unwrap();
        assert_eq!(config.start_policy, StartPolicy::Preempt);
        assert_eq!(config.tick_interval_ms, 100);
        assert_eq!(config.step_budget_ms, 50);
    }
}
