//! Master plan model: ordered steps, pointer, and append-only history.
//!
//! The plan history is a versioned, append-only record of what happened to
//! the plan during a run. [`MasterPlan::record`] is the only way entries are
//! added, which is what keeps the `history[i].version == i + 1` chain intact.

use crate::{now_millis, JsonMap};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Status of one plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Ready,
    InProgress,
    Blocked,
    Succeeded,
    Failed,
    Skipped,
}

/// Status of the whole plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Draft,
    Ready,
    InProgress,
    Blocked,
    Completed,
    Failed,
    Aborted,
}

/// One tool candidate in a step's priority order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolChoice {
    pub tool_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub parameters: JsonMap,
}

impl ToolChoice {
    pub fn new(tool_id: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            description: None,
            parameters: JsonMap::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: JsonMap) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Backoff strategy for step-scoped retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    None,
    Immediate,
    Linear,
    Exponential,
}

/// Bounded-retry policy for one step. Enforced by the collaborators, not by
/// the state machine; the machine only tracks the attempt counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<RetryStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
}

impl RetryPolicy {
    pub fn new(limit: u32, strategy: RetryStrategy, interval_ms: u64) -> Self {
        Self {
            limit: Some(limit),
            strategy: Some(strategy),
            interval_ms: Some(interval_ms),
        }
    }

    /// Delay implied by the strategy before retry `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let interval = Duration::from_millis(self.interval_ms.unwrap_or(0));
        match self.strategy.unwrap_or(RetryStrategy::None) {
            RetryStrategy::None | RetryStrategy::Immediate => Duration::ZERO,
            RetryStrategy::Linear => interval * attempt.max(1),
            RetryStrategy::Exponential => interval * 2u32.saturating_pow(attempt.saturating_sub(1)),
        }
    }
}

/// One step of a master plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanItem {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_task_id: Option<String>,
    /// Tool candidates in priority order. Must be non-empty.
    pub tool_sequence: Vec<ToolChoice>,
    /// Must be non-empty.
    pub success_criteria: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub metadata: JsonMap,
}

impl PlanItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            status: StepStatus::Pending,
            related_task_id: None,
            tool_sequence: Vec::new(),
            success_criteria: Vec::new(),
            retry: None,
            metadata: JsonMap::new(),
        }
    }

    pub fn with_tool(mut self, choice: ToolChoice) -> Self {
        self.tool_sequence.push(choice);
        self
    }

    pub fn with_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.success_criteria.push(criterion.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.related_task_id = Some(task_id.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Task this step reports against: `related_task_id`, else the step id.
    pub fn task_ref(&self) -> &str {
        self.related_task_id.as_deref().unwrap_or(&self.id)
    }

    pub fn validate(&self) -> Result<(), PlanValidationError> {
        if self.tool_sequence.is_empty() {
            return Err(PlanValidationError::EmptyToolSequence {
                step_id: self.id.clone(),
            });
        }
        if self.success_criteria.is_empty() {
            return Err(PlanValidationError::EmptySuccessCriteria {
                step_id: self.id.clone(),
            });
        }
        Ok(())
    }
}

/// What a history entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanHistoryEvent {
    Created,
    PointerAdvanced,
    StepUpdated,
    Replanned,
    StatusChanged,
}

/// Append-only history record with a monotonically increasing version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanHistoryEntry {
    pub version: u64,
    pub timestamp: u64,
    pub event: PlanHistoryEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Structural problems detected by [`MasterPlan::validate`].
#[derive(Debug, Clone, Error)]
pub enum PlanValidationError {
    #[error("plan has no steps")]
    EmptySteps,
    #[error("currentIndex {index} out of range for {len} steps")]
    PointerOutOfRange { index: usize, len: usize },
    #[error("step {step_id} has an empty tool sequence")]
    EmptyToolSequence { step_id: String },
    #[error("step {step_id} has no success criteria")]
    EmptySuccessCriteria { step_id: String },
    #[error("history entry {position} has version {version}, expected {expected}")]
    HistoryVersionGap {
        position: usize,
        version: u64,
        expected: u64,
    },
    #[error("history entry {position} moves backwards in time")]
    HistoryTimestampRegression { position: usize },
}

/// The full ordered plan for one agent run.
///
/// `plan_id` is stable across replans within a run; replans are recorded in
/// `history` rather than by minting a new plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterPlan {
    pub plan_id: String,
    pub steps: Vec<PlanItem>,
    pub current_index: usize,
    pub status: PlanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(default)]
    pub history: Vec<PlanHistoryEntry>,
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub metadata: JsonMap,
}

impl MasterPlan {
    /// Create a ready plan with a `created` history entry at version 1.
    pub fn new(steps: Vec<PlanItem>) -> Self {
        let now = now_millis();
        let mut plan = Self {
            plan_id: Uuid::new_v4().to_string(),
            steps,
            current_index: 0,
            status: PlanStatus::Ready,
            reasoning: None,
            user_message: None,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
            metadata: JsonMap::new(),
        };
        plan.record(PlanHistoryEvent::Created, Some("plan created".into()), None);
        plan
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn current_step(&self) -> Option<&PlanItem> {
        self.steps.get(self.current_index)
    }

    /// Append a history entry, owning the version chain and keeping
    /// `updated_at` and entry timestamps monotonic.
    pub fn record(&mut self, event: PlanHistoryEvent, summary: Option<String>, payload: Option<Value>) {
        let floor = self.history.last().map(|h| h.timestamp).unwrap_or(0);
        let timestamp = now_millis().max(floor);
        self.history.push(PlanHistoryEntry {
            version: self.history.len() as u64 + 1,
            timestamp,
            event,
            summary,
            payload,
        });
        self.updated_at = timestamp;
    }

    /// Move the pointer to the next step, recording the advance. Returns
    /// `false` (and records nothing) when already at the last step.
    pub fn advance_pointer(&mut self) -> bool {
        if self.current_index + 1 >= self.steps.len() {
            return false;
        }
        self.current_index += 1;
        let summary = format!("pointer advanced to step {}", self.current_index);
        self.record(PlanHistoryEvent::PointerAdvanced, Some(summary), None);
        true
    }

    /// Update one step's status, recording the change. Unknown ids are a
    /// no-op returning `false`.
    pub fn set_step_status(&mut self, step_id: &str, status: StepStatus) -> bool {
        let Some(step) = self.steps.iter_mut().find(|s| s.id == step_id) else {
            return false;
        };
        step.status = status;
        let summary = format!("step {step_id} -> {status:?}");
        self.record(PlanHistoryEvent::StepUpdated, Some(summary), None);
        true
    }

    pub fn set_status(&mut self, status: PlanStatus) {
        if self.status != status {
            self.status = status;
            self.record(
                PlanHistoryEvent::StatusChanged,
                Some(format!("plan -> {status:?}")),
                None,
            );
        }
    }

    /// Check the structural invariants a planner or reflector must uphold.
    pub fn validate(&self) -> Result<(), PlanValidationError> {
        if self.steps.is_empty() {
            return Err(PlanValidationError::EmptySteps);
        }
        if self.current_index >= self.steps.len() {
            return Err(PlanValidationError::PointerOutOfRange {
                index: self.current_index,
                len: self.steps.len(),
            });
        }
        for step in &self.steps {
            step.validate()?;
        }
        let mut last_ts = 0u64;
        for (position, entry) in self.history.iter().enumerate() {
            let expected = position as u64 + 1;
            if entry.version != expected {
                return Err(PlanValidationError::HistoryVersionGap {
                    position,
                    version: entry.version,
                    expected,
                });
            }
            if entry.timestamp < last_ts {
                return Err(PlanValidationError::HistoryTimestampRegression { position });
            }
            last_ts = entry.timestamp;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str) -> PlanItem {
        PlanItem::new(id, "a step")
            .with_tool(ToolChoice::new("echo"))
            .with_criterion("tool reported success")
    }

    #[test]
    fn new_plan_starts_with_created_history() {
        let plan = MasterPlan::new(vec![step("s1")]);
        assert_eq!(plan.history.len(), 1);
        assert_eq!(plan.history[0].version, 1);
        assert_eq!(plan.history[0].event, PlanHistoryEvent::Created);
        plan.validate().unwrap();
    }

    #[test]
    fn record_keeps_versions_contiguous_and_timestamps_monotonic() {
        let mut plan = MasterPlan::new(vec![step("s1"), step("s2")]);
        assert!(plan.advance_pointer());
        plan.set_step_status("s1", StepStatus::Succeeded);
        plan.set_status(PlanStatus::Completed);
        for (i, entry) in plan.history.iter().enumerate() {
            assert_eq!(entry.version, i as u64 + 1);
        }
        for pair in plan.history.windows(2) {
            assert!(pair[1].timestamp >= pair[0].timestamp);
        }
        plan.validate().unwrap();
    }

    #[test]
    fn advance_pointer_stops_at_last_step() {
        let mut plan = MasterPlan::new(vec![step("s1")]);
        assert!(!plan.advance_pointer());
        assert_eq!(plan.current_index, 0);
    }

    #[test]
    fn validate_rejects_out_of_range_pointer() {
        let mut plan = MasterPlan::new(vec![step("s1")]);
        plan.current_index = 5;
        assert!(matches!(
            plan.validate(),
            Err(PlanValidationError::PointerOutOfRange { .. })
        ));
    }

    #[test]
    fn validate_rejects_step_without_tools() {
        let mut plan = MasterPlan::new(vec![step("s1")]);
        plan.steps[0].tool_sequence.clear();
        assert!(matches!(
            plan.validate(),
            Err(PlanValidationError::EmptyToolSequence { .. })
        ));
    }

    #[test]
    fn validate_rejects_history_version_gap() {
        let mut plan = MasterPlan::new(vec![step("s1")]);
        plan.history[0].version = 7;
        assert!(matches!(
            plan.validate(),
            Err(PlanValidationError::HistoryVersionGap { .. })
        ));
    }

    #[test]
    fn retry_delays_follow_strategy() {
        let policy = RetryPolicy::new(3, RetryStrategy::Exponential, 100);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));

        let linear = RetryPolicy::new(3, RetryStrategy::Linear, 50);
        assert_eq!(linear.delay_for(2), Duration::from_millis(100));

        assert_eq!(RetryPolicy::default().delay_for(4), Duration::ZERO);
    }
}
