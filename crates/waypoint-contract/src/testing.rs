//! Test doubles for exercising the runtime without real collaborators.
//!
//! These are deliberately deterministic: planners replay scripted plans,
//! reflectors replay scripted directives, and tools answer from canned
//! outcomes. Integration tests across the workspace build on them.

use crate::plan::{MasterPlan, PlanHistoryEvent, PlanItem, PlanStatus, StepStatus, ToolChoice};
use crate::planner::{
    Directive, Planner, PlannerError, PlannerResult, ReflectionInput, ReflectionResult, Reflector,
    ReflectorError,
};
use crate::task::TaskNode;
use crate::tool::{ToolAdapter, ToolDescriptor, ToolError, ToolInput, ToolResult};
use crate::JsonMap;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// A one-step plan targeting `task_id` through `tool_id`.
pub fn single_step_plan(tool_id: &str, task_id: &str) -> MasterPlan {
    MasterPlan::new(vec![PlanItem::new("step-1", "scripted step")
        .with_task(task_id)
        .with_tool(ToolChoice::new(tool_id))
        .with_criterion("tool reported success")])
}

/// Planner that replays scripted plans, optionally repeating the last one
/// forever.
pub struct ScriptedPlanner {
    plans: Mutex<VecDeque<MasterPlan>>,
    repeat: Mutex<Option<MasterPlan>>,
    calls: AtomicU32,
}

impl ScriptedPlanner {
    pub fn once(plan: MasterPlan) -> Self {
        Self::sequence(vec![plan])
    }

    pub fn sequence(plans: Vec<MasterPlan>) -> Self {
        Self {
            plans: Mutex::new(plans.into()),
            repeat: Mutex::new(None),
            calls: AtomicU32::new(0),
        }
    }

    /// Return `plan` on every call, however many times planning re-enters.
    pub fn repeating(plan: MasterPlan) -> Self {
        Self {
            plans: Mutex::new(VecDeque::new()),
            repeat: Mutex::new(Some(plan)),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(
        &self,
        _snapshot: crate::AgentContextSnapshot,
    ) -> Result<PlannerResult, PlannerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(plan) = self.plans.lock().unwrap().pop_front() {
            return Ok(PlannerResult::new(plan));
        }
        if let Some(plan) = self.repeat.lock().unwrap().clone() {
            return Ok(PlannerResult::new(plan));
        }
        Err(PlannerError::Failed("planner script exhausted".into()))
    }
}

/// Planner that always fails, for exercising the error path.
pub struct FailingPlanner;

#[async_trait]
impl Planner for FailingPlanner {
    async fn plan(
        &self,
        _snapshot: crate::AgentContextSnapshot,
    ) -> Result<PlannerResult, PlannerError> {
        Err(PlannerError::Failed("scripted planner failure".into()))
    }
}

/// One scripted reflection outcome.
#[derive(Debug, Clone)]
pub struct ReflectionStep {
    pub directive: Directive,
    pub message: Option<String>,
    pub task_updates: Vec<TaskNode>,
}

impl ReflectionStep {
    pub fn new(directive: Directive) -> Self {
        Self {
            directive,
            message: None,
            task_updates: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_task_update(mut self, task: TaskNode) -> Self {
        self.task_updates.push(task);
        self
    }
}

/// Reflector that replays scripted directives, applying the plan mutations
/// a well-behaved reflector would (pointer advance, step status, plan
/// status).
pub struct ScriptedReflector {
    steps: Mutex<VecDeque<ReflectionStep>>,
    calls: AtomicU32,
    seen_attempts: Mutex<Vec<u32>>,
}

impl ScriptedReflector {
    pub fn sequence(steps: Vec<ReflectionStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            calls: AtomicU32::new(0),
            seen_attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn directives(directives: Vec<Directive>) -> Self {
        Self::sequence(directives.into_iter().map(ReflectionStep::new).collect())
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Attempt numbers the reflector was handed, in call order.
    pub fn seen_attempts(&self) -> Vec<u32> {
        self.seen_attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reflector for ScriptedReflector {
    async fn reflect(&self, input: ReflectionInput) -> Result<ReflectionResult, ReflectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_attempts.lock().unwrap().push(input.attempt);
        let Some(step) = self.steps.lock().unwrap().pop_front() else {
            return Err(ReflectorError::Failed("reflector script exhausted".into()));
        };

        let mut plan = input.plan;
        match step.directive {
            Directive::Complete => {
                plan.set_step_status(&input.current_step.id, StepStatus::Succeeded);
                plan.set_status(PlanStatus::Completed);
            }
            Directive::Abort => plan.set_status(PlanStatus::Aborted),
            Directive::Advance => {
                plan.set_step_status(&input.current_step.id, StepStatus::Succeeded);
                plan.advance_pointer();
            }
            Directive::Replan => {
                plan.record(
                    PlanHistoryEvent::Replanned,
                    Some("scripted replan".into()),
                    None,
                );
            }
            _ => {}
        }

        let mut result = ReflectionResult::new(step.directive, plan);
        result.message = step.message;
        if !step.task_updates.is_empty() {
            result.metadata.insert(
                "taskUpdates".into(),
                serde_json::to_value(&step.task_updates)
                    .map_err(|e| ReflectorError::Failed(e.to_string()))?,
            );
        }
        Ok(result)
    }
}

/// Tool that always succeeds with a fixed output.
pub struct StaticTool {
    id: String,
    output: JsonMap,
}

impl StaticTool {
    pub fn new(id: impl Into<String>, output: JsonMap) -> Self {
        Self {
            id: id.into(),
            output,
        }
    }
}

#[async_trait]
impl ToolAdapter for StaticTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(&self.id, "always succeeds with a canned output")
    }

    async fn execute(&self, _input: ToolInput) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::ok(self.output.clone()))
    }
}

/// Tool that fails (as a value, not an error) the first `failures` calls,
/// then succeeds.
pub struct FailNTimesTool {
    id: String,
    failures: u32,
    calls: AtomicU32,
    output: JsonMap,
}

impl FailNTimesTool {
    pub fn new(id: impl Into<String>, failures: u32, output: JsonMap) -> Self {
        Self {
            id: id.into(),
            failures,
            calls: AtomicU32::new(0),
            output,
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolAdapter for FailNTimesTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(&self.id, "fails N times, then succeeds")
    }

    async fn execute(&self, _input: ToolInput) -> Result<ToolResult, ToolError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Ok(ToolResult::fail(format!("transient failure {}", call + 1)))
        } else {
            Ok(ToolResult::ok(self.output.clone()))
        }
    }
}

/// Tool whose adapter errors out — the "uncaught exception" path.
pub struct ErroringTool {
    id: String,
}

impl ErroringTool {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl ToolAdapter for ErroringTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(&self.id, "always raises an adapter error")
    }

    async fn execute(&self, _input: ToolInput) -> Result<ToolResult, ToolError> {
        Err(ToolError::ExecutionFailed("adapter blew up".into()))
    }
}
