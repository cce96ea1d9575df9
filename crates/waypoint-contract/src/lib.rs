//! Contracts shared by every waypoint crate.
//!
//! This crate defines the data model of one agent run (task tree, master
//! plan, observations, bus events, context snapshots) and the trait
//! contracts behind which the external collaborators live: [`ToolAdapter`]
//! for tools, [`Planner`] and [`Reflector`] for the reasoning components.
//! The execution core in `waypoint-runtime` depends only on these types.

pub mod error;
pub mod event;
pub mod observation;
pub mod plan;
pub mod planner;
pub mod result;
pub mod snapshot;
pub mod state;
pub mod task;
pub mod testing;
pub mod tool;

pub use error::AgentError;
pub use event::{BusEvent, BusEventType};
pub use observation::{Observation, ObservationSource};
pub use plan::{
    MasterPlan, PlanHistoryEntry, PlanHistoryEvent, PlanItem, PlanStatus, PlanValidationError,
    RetryPolicy, RetryStrategy, StepStatus, ToolChoice,
};
pub use planner::{
    Directive, Planner, PlannerError, PlannerResult, ReflectionInput, ReflectionResult, Reflector,
    ReflectorError,
};
pub use result::{AgentRunResult, ExecutionRecorder, ExecutionResult, RecorderError};
pub use snapshot::AgentContextSnapshot;
pub use state::MachineState;
pub use task::{TaskNode, TaskStatus};
pub use tool::{
    validate_against_schema, ToolAdapter, ToolDescriptor, ToolError, ToolInput, ToolResult,
    TypedToolAdapter,
};

/// Open-schema JSON object used for payloads, metadata, and working memory.
///
/// The planner/tool ecosystem depends on these staying open; do not replace
/// them with closed structs.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Coerce a JSON value into a [`JsonMap`], discarding non-object values.
///
/// Handy with `serde_json::json!`:
///
/// ```
/// use waypoint_contract::json_map;
/// let payload = json_map(serde_json::json!({"echo": "hi"}));
/// assert_eq!(payload.len(), 1);
/// ```
pub fn json_map(value: serde_json::Value) -> JsonMap {
    match value {
        serde_json::Value::Object(map) => map,
        _ => JsonMap::new(),
    }
}
