//! Bus events broadcast to every observer of a run.

use crate::{now_millis, JsonMap};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of a [`BusEvent`], serialized as the dotted wire string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusEventType {
    #[serde(rename = "tool.request")]
    ToolRequest,
    #[serde(rename = "tool.result")]
    ToolResult,
    #[serde(rename = "user.input")]
    UserInput,
    #[serde(rename = "system.alert")]
    SystemAlert,
    #[serde(rename = "agent.transition")]
    AgentTransition,
    #[serde(rename = "agent.log")]
    AgentLog,
    #[serde(rename = "agent.finished")]
    AgentFinished,
}

impl BusEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToolRequest => "tool.request",
            Self::ToolResult => "tool.result",
            Self::UserInput => "user.input",
            Self::SystemAlert => "system.alert",
            Self::AgentTransition => "agent.transition",
            Self::AgentLog => "agent.log",
            Self::AgentFinished => "agent.finished",
        }
    }
}

/// One event on the bus.
///
/// `trace_id` correlates request/result pairs and ties transitions to the
/// task they report against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusEvent {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: BusEventType,
    pub timestamp: u64,
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_task_id: Option<String>,
    #[serde(default)]
    pub payload: JsonMap,
}

impl BusEvent {
    pub fn new(event_type: BusEventType, trace_id: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type,
            timestamp: now_millis(),
            trace_id: trace_id.into(),
            related_task_id: None,
            payload: JsonMap::new(),
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.related_task_id = Some(task_id.into());
        self
    }

    pub fn with_payload(mut self, payload: JsonMap) -> Self {
        self.payload = payload;
        self
    }
}
