//! Tuning knobs for the engine and the scheduler.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on loop iterations; a loop may declare a lower one.
    pub max_loop_iterations: usize,
    /// Per-call timeout for actions that don't set `timeout_ms`.
    pub default_action_timeout_ms: u64,
    /// Ceiling for exponential retry back-off.
    pub max_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_loop_iterations: 100,
            default_action_timeout_ms: 30_000,
            max_backoff_ms: 60_000,
        }
    }
}

impl EngineConfig {
    pub fn default_action_timeout(&self) -> Duration {
        Duration::from_millis(self.default_action_timeout_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often next-fire times are re-evaluated.
    pub tick_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_ms: 1_000 }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}
