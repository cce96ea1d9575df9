//! Execution and run outcome envelopes.

use crate::observation::Observation;
use crate::plan::PlanItem;
use crate::snapshot::AgentContextSnapshot;
use crate::state::MachineState;
use crate::tool::ToolResult;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What the executor produced for one plan step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub plan_id: String,
    pub step_index: usize,
    pub step: PlanItem,
    /// Tool actually chosen (preferred id or first sequence entry).
    pub tool_id: String,
    pub result: ToolResult,
}

/// Terminal summary of one agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRunResult {
    pub state: MachineState,
    pub iterations: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_observation: Option<Observation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_result: Option<ExecutionResult>,
    pub final_snapshot: AgentContextSnapshot,
}

#[derive(Debug, Error)]
#[error("recorder failed: {0}")]
pub struct RecorderError(pub String);

/// Optional observer the executor notifies after each execution. Errors
/// from the recorder are swallowed and logged, never propagated into the
/// run.
pub trait ExecutionRecorder: Send + Sync {
    fn record_execution_result(
        &self,
        result: &ExecutionResult,
        snapshot: AgentContextSnapshot,
    ) -> Result<(), RecorderError>;
}
