//! The authoritative mutable store for one agent run.
//!
//! Exclusively owned by its machine for the duration of a run; everything
//! outside the run reads snapshot copies only. Invariant enforcement is
//! best-effort — upstream collaborators are responsible for structurally
//! valid task updates — except that `root_task_id` always resolves.

use std::collections::HashMap;
use waypoint_contract::{
    now_millis, AgentContextSnapshot, JsonMap, MasterPlan, Observation, TaskNode,
};

/// Mutable context: task tree, observations, working memory, metadata,
/// iteration counter, and the current master plan.
pub struct AgentContext {
    agent_id: String,
    root_task_id: String,
    active_task_id: Option<String>,
    tasks: HashMap<String, TaskNode>,
    observations: Vec<Observation>,
    working_memory: JsonMap,
    metadata: JsonMap,
    iteration: u64,
    master_plan: Option<MasterPlan>,
}

impl AgentContext {
    pub fn new(agent_id: impl Into<String>, mut root_task: TaskNode) -> Self {
        if root_task.created_at == 0 {
            root_task.created_at = now_millis();
        }
        root_task.touch();
        let root_task_id = root_task.task_id.clone();
        Self {
            agent_id: agent_id.into(),
            root_task_id: root_task_id.clone(),
            active_task_id: None,
            tasks: HashMap::from([(root_task_id, root_task)]),
            observations: Vec::new(),
            working_memory: JsonMap::new(),
            metadata: JsonMap::new(),
            iteration: 0,
            master_plan: None,
        }
    }

    pub fn with_metadata(mut self, metadata: JsonMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn root_task_id(&self) -> &str {
        &self.root_task_id
    }

    pub fn active_task_id(&self) -> Option<&str> {
        self.active_task_id.as_deref()
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Deep copy of the current state; never shares mutable references with
    /// the live store.
    pub fn snapshot(&self) -> AgentContextSnapshot {
        AgentContextSnapshot {
            agent_id: self.agent_id.clone(),
            root_task_id: self.root_task_id.clone(),
            active_task_id: self.active_task_id.clone(),
            tasks: self.tasks.clone(),
            observations: self.observations.clone(),
            working_memory: self.working_memory.clone(),
            metadata: self.metadata.clone(),
            iteration: self.iteration,
            master_plan: self.master_plan.clone(),
        }
    }

    /// Update the active-task pointer and advance the iteration counter.
    pub fn set_active_task(&mut self, task_id: Option<String>) {
        self.active_task_id = task_id;
        self.iteration += 1;
    }

    /// Insert or update a task. `created_at` is filled on first insert and
    /// preserved afterwards; `updated_at` always refreshes; an omitted
    /// (empty) `children` list keeps the existing one.
    pub fn upsert_task(&mut self, mut node: TaskNode) {
        let now = now_millis();
        match self.tasks.get(&node.task_id) {
            Some(existing) => {
                node.created_at = existing.created_at;
                if node.children.is_empty() {
                    node.children = existing.children.clone();
                }
            }
            None => {
                if node.created_at == 0 {
                    node.created_at = now;
                }
            }
        }
        node.updated_at = now.max(node.created_at);
        self.tasks.insert(node.task_id.clone(), node);
    }

    /// Link `child_id` under `parent_id`. Idempotent; an unknown parent is
    /// a silent no-op (the caller owns parent existence).
    pub fn link_child(&mut self, parent_id: &str, child_id: &str) {
        let Some(parent) = self.tasks.get_mut(parent_id) else {
            return;
        };
        if parent.children.iter().any(|c| c == child_id) {
            return;
        }
        parent.children.push(child_id.to_string());
        parent.touch();
        if let Some(child) = self.tasks.get_mut(child_id) {
            child.parent_id = Some(parent_id.to_string());
            child.touch();
        }
    }

    pub fn add_observation(&mut self, observation: Observation) {
        self.observations.push(observation);
    }

    /// Shallow merge into working memory; unmentioned keys survive.
    pub fn merge_working_memory(&mut self, update: JsonMap) {
        for (key, value) in update {
            self.working_memory.insert(key, value);
        }
    }

    pub fn working_memory(&self) -> &JsonMap {
        &self.working_memory
    }

    pub fn set_master_plan(&mut self, plan: Option<MasterPlan>) {
        self.master_plan = plan;
    }

    pub fn get_master_plan(&self) -> Option<&MasterPlan> {
        self.master_plan.as_ref()
    }

    /// Selective update. Maps merge shallowly, lists replace wholesale, and
    /// `iteration` is either set explicitly or bumped iff the active task
    /// was part of the update.
    pub fn patch(&mut self, update: ContextUpdate) {
        let touched_active_task = update.active_task_id.is_some();
        if let Some(active) = update.active_task_id {
            self.active_task_id = active;
        }
        if let Some(mut tasks) = update.tasks {
            // The root must keep resolving, whatever the replacement says.
            if !tasks.contains_key(&self.root_task_id) {
                if let Some(root) = self.tasks.get(&self.root_task_id) {
                    tasks.insert(self.root_task_id.clone(), root.clone());
                }
            }
            self.tasks = tasks;
        }
        if let Some(observations) = update.observations {
            self.observations = observations;
        }
        if let Some(memory) = update.working_memory {
            self.merge_working_memory(memory);
        }
        if let Some(metadata) = update.metadata {
            for (key, value) in metadata {
                self.metadata.insert(key, value);
            }
        }
        if let Some(plan) = update.master_plan {
            self.master_plan = plan;
        }
        match update.iteration {
            Some(iteration) => self.iteration = iteration,
            None if touched_active_task => self.iteration += 1,
            None => {}
        }
    }
}

/// Field-presence patch for [`AgentContext::patch`]. Nested options encode
/// "set to this value" vs. "leave alone" for nullable fields.
#[derive(Debug, Default)]
pub struct ContextUpdate {
    pub active_task_id: Option<Option<String>>,
    pub tasks: Option<HashMap<String, TaskNode>>,
    pub observations: Option<Vec<Observation>>,
    pub working_memory: Option<JsonMap>,
    pub metadata: Option<JsonMap>,
    pub iteration: Option<u64>,
    pub master_plan: Option<Option<MasterPlan>>,
}

impl ContextUpdate {
    pub fn with_active_task(mut self, task_id: Option<String>) -> Self {
        self.active_task_id = Some(task_id);
        self
    }

    pub fn with_working_memory(mut self, memory: JsonMap) -> Self {
        self.working_memory = Some(memory);
        self
    }

    pub fn with_metadata(mut self, metadata: JsonMap) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_iteration(mut self, iteration: u64) -> Self {
        self.iteration = Some(iteration);
        self
    }

    pub fn with_tasks(mut self, tasks: HashMap<String, TaskNode>) -> Self {
        self.tasks = Some(tasks);
        self
    }
}
