//! The plan → act → observe → reflect state machine.
//!
//! An explicit loop switches on the current state; each state function does
//! its work and returns the next state. The suspension points are exactly
//! the planner call, the tool call inside the executor, and the reflector
//! call — everything else is synchronous bookkeeping on loop-local
//! counters.
//!
//! Failure routing: planner/executor/reflector errors and guard violations
//! each consume one failure slot and pass through the error state; a
//! reflector `abort` is immediately terminal without consuming a slot. A
//! tool returning `success = false` is not a machine failure at all — it is
//! evidence for the reflector.

mod guards;
mod stop;

pub use guards::GuardConfig;
pub use stop::StopToken;

use crate::context::AgentContext;
use crate::executor::{ExecuteRequest, Executor};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use waypoint_contract::{
    json_map, AgentContextSnapshot, AgentError, AgentRunResult, Directive, ExecutionResult,
    MachineState, MasterPlan, Observation, PlanItem, Planner, Reflector,
};

/// Receives every state change of a machine. The runtime wrapper publishes
/// these to the snapshot stream and the event bus.
pub trait TransitionSink: Send + Sync {
    /// A non-terminal state finished its work.
    fn on_transition(&self, state: MachineState, snapshot: &AgentContextSnapshot);

    /// The machine reached its terminal state.
    fn on_finished(&self, snapshot: &AgentContextSnapshot);

    /// Diagnostic record, emitted on the failure path.
    fn on_log(&self, message: &str, kind: &str, snapshot: &AgentContextSnapshot) {
        let _ = (message, kind, snapshot);
    }
}

/// Sink that discards everything; for tests and embedded use.
pub struct NoopSink;

impl TransitionSink for NoopSink {
    fn on_transition(&self, _state: MachineState, _snapshot: &AgentContextSnapshot) {}
    fn on_finished(&self, _snapshot: &AgentContextSnapshot) {}
}

/// Drives one agent run from initial planning to the terminal state.
pub struct AgentMachine {
    ctx: AgentContext,
    planner: Arc<dyn Planner>,
    reflector: Arc<dyn Reflector>,
    executor: Executor,
    guards: GuardConfig,
    sink: Arc<dyn TransitionSink>,
    stop: StopToken,

    plan: Option<MasterPlan>,
    current_step: Option<PlanItem>,
    current_step_index: usize,
    execution_result: Option<ExecutionResult>,
    observation: Option<Observation>,
    preferred_tool: Option<String>,
    last_error: Option<AgentError>,

    attempt: u32,
    iterations: u64,
    failures: u64,
    started_at: Instant,
}

impl AgentMachine {
    pub fn new(
        ctx: AgentContext,
        planner: Arc<dyn Planner>,
        reflector: Arc<dyn Reflector>,
        executor: Executor,
    ) -> Self {
        Self {
            ctx,
            planner,
            reflector,
            executor,
            guards: GuardConfig::default(),
            sink: Arc::new(NoopSink),
            stop: StopToken::new(),
            plan: None,
            current_step: None,
            current_step_index: 0,
            execution_result: None,
            observation: None,
            preferred_tool: None,
            last_error: None,
            attempt: 0,
            iterations: 0,
            failures: 0,
            started_at: Instant::now(),
        }
    }

    pub fn with_guards(mut self, guards: GuardConfig) -> Self {
        self.guards = guards;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn TransitionSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_stop_token(mut self, stop: StopToken) -> Self {
        self.stop = stop;
        self
    }

    /// Clone of the machine's stop token for external cancellation.
    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    /// Run to the terminal state. Never panics out of a collaborator
    /// failure; the terminal state is always reached.
    pub async fn run(mut self) -> AgentRunResult {
        self.started_at = Instant::now();
        let mut state = MachineState::Plan;
        loop {
            // STOP is honoured at state boundaries only; an in-flight tool
            // call has already completed by the time we get here.
            if self.stop.is_stopped() {
                break;
            }
            let next = match state {
                MachineState::Plan => self.on_plan().await,
                MachineState::Act => self.on_act().await,
                MachineState::Observe => self.on_observe(),
                MachineState::Reflect => self.on_reflect().await,
                MachineState::Error => self.on_error(),
                MachineState::Finish => break,
            };
            self.sink.on_transition(state, &self.ctx.snapshot());
            if next == MachineState::Finish {
                break;
            }
            state = next;
        }

        let final_snapshot = self.ctx.snapshot();
        self.sink.on_finished(&final_snapshot);
        AgentRunResult {
            state: MachineState::Finish,
            iterations: self.iterations,
            last_observation: final_snapshot.observations.last().cloned(),
            execution_result: self.execution_result,
            final_snapshot,
        }
    }

    fn fail(&mut self, error: AgentError) -> MachineState {
        tracing::debug!(kind = error.kind(), error = %error, "machine failure");
        self.last_error = Some(error);
        MachineState::Error
    }

    /// Track the step under the plan pointer, moving the context's active
    /// task when the step targets a different task.
    fn resolve_current_step(&mut self, plan: &MasterPlan) {
        match plan.current_step() {
            Some(step) => {
                let task_ref = step.task_ref().to_string();
                if self.ctx.active_task_id() != Some(task_ref.as_str()) {
                    self.ctx.set_active_task(Some(task_ref));
                }
                self.current_step = Some(step.clone());
                self.current_step_index = plan.current_index;
            }
            None => {
                self.current_step = None;
            }
        }
    }

    async fn on_plan(&mut self) -> MachineState {
        if let Err(guard) = self
            .guards
            .check_plan_entry(self.started_at.elapsed(), self.iterations)
        {
            return self.fail(guard);
        }

        let result = match self.planner.plan(self.ctx.snapshot()).await {
            Ok(result) => result,
            Err(e) => return self.fail(AgentError::PlannerFailed(e.to_string())),
        };

        let mut plan = result.plan;
        if let Some(entry) = result.history_entry {
            plan.record(entry.event, entry.summary, entry.payload);
        }
        if let Err(e) = plan.validate() {
            return self.fail(AgentError::PlannerFailed(e.to_string()));
        }

        self.ctx.set_master_plan(Some(plan.clone()));
        self.resolve_current_step(&plan);
        self.plan = Some(plan);
        self.execution_result = None;
        self.observation = None;
        self.attempt = 0;
        self.preferred_tool = None;
        MachineState::Act
    }

    async fn on_act(&mut self) -> MachineState {
        let (Some(plan), Some(step)) = (self.plan.clone(), self.current_step.clone()) else {
            return self.fail(AgentError::NoCurrentStep);
        };
        let snapshot = self.ctx.snapshot();
        let request = ExecuteRequest {
            plan: &plan,
            step_index: self.current_step_index,
            step: &step,
            snapshot: &snapshot,
            preferred_tool_id: self.preferred_tool.as_deref(),
        };
        match self.executor.execute(request).await {
            Ok(execution) => {
                self.execution_result = Some(execution);
                MachineState::Observe
            }
            Err(e) => self.fail(e),
        }
    }

    fn on_observe(&mut self) -> MachineState {
        match &self.execution_result {
            Some(execution) => {
                let observation =
                    Observation::from_tool_result(execution.step.task_ref(), &execution.result);
                self.ctx.add_observation(observation.clone());
                self.observation = Some(observation);
            }
            // Defensive path: nothing executed, nothing to record.
            None => self.observation = None,
        }
        MachineState::Reflect
    }

    async fn on_reflect(&mut self) -> MachineState {
        // Nothing to anchor reflection to: recover through planning.
        let (Some(plan), Some(step)) = (self.plan.clone(), self.current_step.clone()) else {
            return MachineState::Plan;
        };

        let input = waypoint_contract::ReflectionInput {
            plan,
            current_step: step.clone(),
            observation: self.observation.clone(),
            snapshot: self.ctx.snapshot(),
            attempt: self.attempt + 1,
        };
        let reflection = match self.reflector.reflect(input).await {
            Ok(reflection) => reflection,
            Err(e) => return self.fail(AgentError::ReflectorFailed(e.to_string())),
        };

        let mut plan = reflection.plan.clone();
        if let Some(entry) = reflection.history_entry.clone() {
            plan.record(entry.event, entry.summary, entry.payload);
        }
        if let Err(e) = plan.validate() {
            return self.fail(AgentError::ReflectorFailed(e.to_string()));
        }

        self.ctx.set_master_plan(Some(plan.clone()));
        for task in reflection.task_updates() {
            self.ctx.upsert_task(task);
        }
        if let Some(message) = &reflection.message {
            self.ctx
                .merge_working_memory(json_map(json!({"reflectMessage": message})));
        }
        self.resolve_current_step(&plan);
        self.plan = Some(plan);
        self.iterations += 1;

        let directive = reflection.directive;
        if matches!(directive, Directive::Retry | Directive::Fallback) {
            self.attempt += 1;
        } else {
            self.attempt = 0;
        }
        self.preferred_tool = match directive {
            // Fallback walks the step's tool priority order by attempt.
            Directive::Fallback => {
                let sequence = &step.tool_sequence;
                let index = (self.attempt as usize).min(sequence.len().saturating_sub(1));
                sequence.get(index).map(|choice| choice.tool_id.clone())
            }
            _ => None,
        };

        match directive {
            Directive::Complete => MachineState::Finish,
            Directive::Abort => {
                if let Some(message) = &reflection.message {
                    self.ctx
                        .merge_working_memory(json_map(json!({"abortReason": message})));
                }
                MachineState::Finish
            }
            Directive::Replan | Directive::AwaitUser | Directive::Unknown => MachineState::Plan,
            Directive::Advance | Directive::Retry | Directive::Fallback => MachineState::Act,
        }
    }

    fn on_error(&mut self) -> MachineState {
        self.failures += 1;
        let (kind, message) = match &self.last_error {
            Some(error) => (error.kind(), error.to_string()),
            None => ("unknown", "unknown failure".to_string()),
        };
        self.ctx
            .merge_working_memory(json_map(json!({"lastError": message})));
        self.sink.on_log(&message, kind, &self.ctx.snapshot());

        if !self.guards.failures_remaining(self.failures) {
            return MachineState::Finish;
        }
        if self.current_step.is_some() {
            // Give the reflector a chance to recover from the failure.
            MachineState::Reflect
        } else {
            MachineState::Plan
        }
    }
}
