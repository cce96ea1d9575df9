//! Immutable point-in-time view of an agent context.

use crate::observation::Observation;
use crate::plan::MasterPlan;
use crate::task::TaskNode;
use crate::JsonMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Deep copy of one agent's context. Mutating a snapshot never affects the
/// live store, and a JSON round-trip is structurally lossless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentContextSnapshot {
    pub agent_id: String,
    pub root_task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_task_id: Option<String>,
    pub tasks: HashMap<String, TaskNode>,
    #[serde(default)]
    pub observations: Vec<Observation>,
    #[serde(default)]
    pub working_memory: JsonMap,
    #[serde(default)]
    pub metadata: JsonMap,
    pub iteration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_plan: Option<MasterPlan>,
}

impl AgentContextSnapshot {
    pub fn task(&self, task_id: &str) -> Option<&TaskNode> {
        self.tasks.get(task_id)
    }

    pub fn root_task(&self) -> Option<&TaskNode> {
        self.tasks.get(&self.root_task_id)
    }

    pub fn last_observation(&self) -> Option<&Observation> {
        self.observations.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{MasterPlan, PlanItem, ToolChoice};
    use crate::tool::ToolResult;
    use crate::{json_map, TaskNode};

    #[test]
    fn json_round_trip_is_structurally_equal() {
        let root = TaskNode::new("t-root", "root task");
        let plan = MasterPlan::new(vec![PlanItem::new("s1", "step")
            .with_tool(ToolChoice::new("echo"))
            .with_criterion("done")]);
        let snapshot = AgentContextSnapshot {
            agent_id: "a-1".into(),
            root_task_id: "t-root".into(),
            active_task_id: Some("t-root".into()),
            tasks: HashMap::from([("t-root".into(), root)]),
            observations: vec![Observation::from_tool_result(
                "t-root",
                &ToolResult::ok(json_map(serde_json::json!({"echo": "hi"}))),
            )],
            working_memory: json_map(serde_json::json!({"k": "v"})),
            metadata: JsonMap::new(),
            iteration: 3,
            master_plan: Some(plan),
        };

        let encoded = serde_json::to_string(&snapshot).unwrap();
        let decoded: AgentContextSnapshot = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, snapshot);
    }
}
