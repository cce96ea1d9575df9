//! Execution evidence appended to the agent context.

use crate::tool::ToolResult;
use crate::{now_millis, JsonMap};
use serde::{Deserialize, Serialize};

/// Where an observation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationSource {
    Tool,
    User,
    System,
}

/// Evidence from one execution. Append-only; observations never expire
/// during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub source: ObservationSource,
    pub related_task_id: String,
    pub timestamp: u64,
    #[serde(default)]
    pub payload: JsonMap,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Observation {
    /// Derive a tool-sourced observation from an execution result.
    pub fn from_tool_result(related_task_id: impl Into<String>, result: &ToolResult) -> Self {
        Self {
            source: ObservationSource::Tool,
            related_task_id: related_task_id.into(),
            timestamp: now_millis(),
            payload: result.output.clone(),
            success: result.success,
            latency_ms: result.latency_ms,
            error: result.error.clone(),
        }
    }
}
