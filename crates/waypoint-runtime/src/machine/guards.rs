//! Bounded-resource guards checked on entry to planning.

use serde::Deserialize;
use std::time::Duration;
use waypoint_contract::AgentError;

/// Run-level limits. Unset fields mean unbounded; guard violations consume
/// a failure slot through the machine's error state like any other failure.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuardConfig {
    pub max_duration_ms: Option<u64>,
    pub max_iterations: Option<u64>,
    pub max_failures: Option<u64>,
}

impl GuardConfig {
    pub fn with_max_duration_ms(mut self, limit: u64) -> Self {
        self.max_duration_ms = Some(limit);
        self
    }

    pub fn with_max_iterations(mut self, limit: u64) -> Self {
        self.max_iterations = Some(limit);
        self
    }

    pub fn with_max_failures(mut self, limit: u64) -> Self {
        self.max_failures = Some(limit);
        self
    }

    /// Entry guard for the plan state.
    pub fn check_plan_entry(&self, elapsed: Duration, iterations: u64) -> Result<(), AgentError> {
        let elapsed_ms = elapsed.as_millis() as u64;
        if let Some(limit_ms) = self.max_duration_ms {
            if elapsed_ms > limit_ms {
                return Err(AgentError::DurationExceeded {
                    elapsed_ms,
                    limit_ms,
                });
            }
        }
        if let Some(limit) = self.max_iterations {
            if iterations >= limit {
                return Err(AgentError::IterationsExceeded {
                    iterations,
                    limit,
                });
            }
        }
        Ok(())
    }

    /// Whether another failure slot remains after `failures` consumed ones.
    pub fn failures_remaining(&self, failures: u64) -> bool {
        self.max_failures.map_or(true, |max| failures < max)
    }
}
