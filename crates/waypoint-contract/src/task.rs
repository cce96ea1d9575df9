//! Task-tree node model.

use crate::{now_millis, JsonMap};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// A node in the task tree.
///
/// Every id listed in `children` must exist as a key of the owning task
/// map, and a child's `parent_id` must name its parent (absent for the
/// root). The context store refreshes `updated_at` on every upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskNode {
    pub task_id: String,
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub metadata: JsonMap,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

impl TaskNode {
    /// Create a pending task, stamping both timestamps.
    pub fn new(task_id: impl Into<String>, description: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            task_id: task_id.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            parent_id: None,
            children: Vec::new(),
            metadata: JsonMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Refresh `updated_at`, keeping `created_at <= updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = now_millis().max(self.created_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_stamps_timestamps() {
        let task = TaskNode::new("t-1", "do something");
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.created_at > 0);
        assert_eq!(task.created_at, task.updated_at);
    }

    #[test]
    fn task_serializes_camel_case() {
        let task = TaskNode::new("t-1", "do something").with_parent("t-0");
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["taskId"], "t-1");
        assert_eq!(json["parentId"], "t-0");
        assert_eq!(json["status"], "pending");
    }

    #[test]
    fn touch_never_moves_updated_before_created() {
        let mut task = TaskNode::new("t-1", "x");
        task.created_at = u64::MAX;
        task.touch();
        assert!(task.updated_at >= task.created_at);
    }
}
