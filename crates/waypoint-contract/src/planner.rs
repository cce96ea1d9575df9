//! Planner and reflector contracts.
//!
//! Both collaborators are opaque to the core: the machine hands them a
//! snapshot and stores whatever structurally valid plan they return. Their
//! prompting, model clients, and output sanitisation live elsewhere.

use crate::observation::Observation;
use crate::plan::{MasterPlan, PlanHistoryEntry, PlanItem};
use crate::snapshot::AgentContextSnapshot;
use crate::task::TaskNode;
use crate::{now_millis, JsonMap};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Command returned by the reflector selecting the next transition.
///
/// Unrecognised wire values decode to [`Directive::Unknown`], which the
/// machine treats as a default-safe re-plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Directive {
    Advance,
    Retry,
    Fallback,
    AwaitUser,
    Abort,
    Complete,
    Replan,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("planning failed: {0}")]
    Failed(String),

    #[error("planner returned an invalid plan: {0}")]
    InvalidPlan(String),
}

#[derive(Debug, Error)]
pub enum ReflectorError {
    #[error("reflection failed: {0}")]
    Failed(String),

    #[error("reflector returned an invalid plan: {0}")]
    InvalidPlan(String),
}

/// Outcome of one planning call. The returned plan is authoritative and
/// overwrites any prior plan in the context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerResult {
    pub plan: MasterPlan,
    pub issued_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_entry: Option<PlanHistoryEntry>,
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub metadata: JsonMap,
}

impl PlannerResult {
    pub fn new(plan: MasterPlan) -> Self {
        Self {
            plan,
            issued_at: now_millis(),
            history_entry: None,
            metadata: JsonMap::new(),
        }
    }
}

/// Everything the reflector sees about the step that just ran.
#[derive(Debug, Clone)]
pub struct ReflectionInput {
    pub plan: MasterPlan,
    pub current_step: PlanItem,
    /// Absent only on the defensive path where execution produced nothing.
    pub observation: Option<Observation>,
    pub snapshot: AgentContextSnapshot,
    /// 1-based attempt number for the current step.
    pub attempt: u32,
}

/// Outcome of one reflection call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflectionResult {
    pub directive: Directive,
    pub plan: MasterPlan,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_entry: Option<PlanHistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub metadata: JsonMap,
}

impl ReflectionResult {
    pub fn new(directive: Directive, plan: MasterPlan) -> Self {
        Self {
            directive,
            plan,
            history_entry: None,
            message: None,
            metadata: JsonMap::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Task upserts requested via `metadata.taskUpdates`. Malformed entries
    /// are dropped rather than failing the reflection.
    pub fn task_updates(&self) -> Vec<TaskNode> {
        self.metadata
            .get("taskUpdates")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }
}

/// Produces the authoritative plan from a context snapshot.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, snapshot: AgentContextSnapshot) -> Result<PlannerResult, PlannerError>;
}

/// Judges the latest observation and directs the machine's next move.
#[async_trait]
pub trait Reflector: Send + Sync {
    async fn reflect(&self, input: ReflectionInput) -> Result<ReflectionResult, ReflectorError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{PlanItem, ToolChoice};
    use crate::TaskStatus;

    #[test]
    fn unknown_directive_decodes_to_unknown() {
        let directive: Directive = serde_json::from_value(serde_json::json!("escalate")).unwrap();
        assert_eq!(directive, Directive::Unknown);
        let known: Directive = serde_json::from_value(serde_json::json!("await_user")).unwrap();
        assert_eq!(known, Directive::AwaitUser);
    }

    #[test]
    fn task_updates_decode_from_metadata() {
        let plan = MasterPlan::new(vec![PlanItem::new("s1", "step")
            .with_tool(ToolChoice::new("echo"))
            .with_criterion("done")]);
        let mut result = ReflectionResult::new(Directive::Advance, plan);
        result.metadata.insert(
            "taskUpdates".into(),
            serde_json::json!([{
                "taskId": "t-1",
                "description": "updated",
                "status": "succeeded"
            }]),
        );
        let updates = result.task_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].task_id, "t-1");
        assert_eq!(updates[0].status, TaskStatus::Succeeded);
    }

    #[test]
    fn malformed_task_updates_are_dropped() {
        let plan = MasterPlan::new(vec![PlanItem::new("s1", "step")
            .with_tool(ToolChoice::new("echo"))
            .with_criterion("done")]);
        let mut result = ReflectionResult::new(Directive::Advance, plan);
        result
            .metadata
            .insert("taskUpdates".into(), serde_json::json!("not-a-list"));
        assert!(result.task_updates().is_empty());
    }
}
