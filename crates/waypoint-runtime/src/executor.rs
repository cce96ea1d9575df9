//! Mediates between plan steps and tools.
//!
//! Every execution emits the `tool.request`/`tool.result` pair observers
//! rely on for traceability: same fresh `trace_id` on both, request before
//! invocation, result after, with wall-clock latency stamped on the result.

use crate::bus::EventBus;
use crate::registry::ToolRegistry;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;
use waypoint_contract::{
    json_map, AgentContextSnapshot, AgentError, BusEvent, BusEventType, ExecutionRecorder,
    ExecutionResult, MasterPlan, PlanItem, ToolInput, ToolResult,
};

/// One execution request.
pub struct ExecuteRequest<'a> {
    pub plan: &'a MasterPlan,
    pub step_index: usize,
    pub step: &'a PlanItem,
    pub snapshot: &'a AgentContextSnapshot,
    /// Overrides the step's first tool-sequence entry when set.
    pub preferred_tool_id: Option<&'a str>,
}

/// Selects the tool for a step, invokes it, and reports the outcome.
#[derive(Clone)]
pub struct Executor {
    registry: ToolRegistry,
    bus: EventBus,
    recorder: Option<Arc<dyn ExecutionRecorder>>,
}

impl Executor {
    pub fn new(registry: ToolRegistry, bus: EventBus) -> Self {
        Self {
            registry,
            bus,
            recorder: None,
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn ExecutionRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Run one step. Tool-level failure comes back as a successful
    /// `ExecutionResult` carrying `result.success == false`; only a missing
    /// tool candidate or an unregistered tool id is an `AgentError`.
    pub async fn execute(&self, req: ExecuteRequest<'_>) -> Result<ExecutionResult, AgentError> {
        let step = req.step;

        let tool_id = match req.preferred_tool_id {
            Some(id) => id.to_string(),
            None => step
                .tool_sequence
                .first()
                .map(|choice| choice.tool_id.clone())
                .ok_or_else(|| AgentError::NoToolCandidate {
                    step_id: step.id.clone(),
                })?,
        };

        let adapter = self
            .registry
            .get(&tool_id)
            .ok_or_else(|| AgentError::ToolNotRegistered {
                tool_id: tool_id.clone(),
            })?;

        let trace_id = Uuid::new_v4().to_string();
        let related_task = step.task_ref().to_string();
        let step_value = serde_json::to_value(step).unwrap_or(Value::Null);

        self.bus.emit(
            BusEvent::new(BusEventType::ToolRequest, &trace_id)
                .with_task(&related_task)
                .with_payload(json_map(serde_json::json!({
                    "toolId": tool_id,
                    "planId": req.plan.plan_id,
                    "stepId": step.id,
                    "stepIndex": req.step_index,
                    "step": step_value,
                }))),
        );

        // Parameters come from the chosen sequence entry (falling back to
        // the head entry) merged with the plan/step correlation keys.
        let mut params = step
            .tool_sequence
            .iter()
            .find(|choice| choice.tool_id == tool_id)
            .or_else(|| step.tool_sequence.first())
            .map(|choice| choice.parameters.clone())
            .unwrap_or_default();
        params.insert("planId".into(), Value::String(req.plan.plan_id.clone()));
        params.insert("stepId".into(), Value::String(step.id.clone()));

        let input = ToolInput {
            task_id: related_task.clone(),
            trace_id: trace_id.clone(),
            params: params.clone(),
            snapshot: req.snapshot.clone(),
        };

        let started = Instant::now();
        let mut result = match adapter.validate_params(&Value::Object(params)) {
            Err(e) => ToolResult::fail(e.to_string()),
            Ok(()) => match adapter.execute(input).await {
                Ok(result) => result,
                // Adapter "exceptions" become ordinary tool failures.
                Err(e) => ToolResult::fail(e.to_string()),
            },
        };
        result.latency_ms = Some(started.elapsed().as_millis() as u64);

        self.bus.emit(
            BusEvent::new(BusEventType::ToolResult, &trace_id)
                .with_task(&related_task)
                .with_payload(json_map(serde_json::json!({
                    "toolId": tool_id,
                    "planId": req.plan.plan_id,
                    "stepId": step.id,
                    "stepIndex": req.step_index,
                    "step": step_value,
                    "result": serde_json::to_value(&result).unwrap_or(Value::Null),
                }))),
        );

        let execution = ExecutionResult {
            plan_id: req.plan.plan_id.clone(),
            step_index: req.step_index,
            step: step.clone(),
            tool_id,
            result,
        };

        if let Some(recorder) = &self.recorder {
            if let Err(e) =
                recorder.record_execution_result(&execution, req.snapshot.clone())
            {
                tracing::warn!(error = %e, "execution recorder failed");
            }
        }

        Ok(execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use waypoint_contract::testing::{single_step_plan, ErroringTool, StaticTool};
    use waypoint_contract::{JsonMap, RecorderError};

    fn snapshot() -> AgentContextSnapshot {
        AgentContextSnapshot {
            agent_id: "a".into(),
            root_task_id: "t-root".into(),
            active_task_id: None,
            tasks: HashMap::new(),
            observations: Vec::new(),
            working_memory: JsonMap::new(),
            metadata: JsonMap::new(),
            iteration: 0,
            master_plan: None,
        }
    }

    fn executor_with(tools: Vec<Arc<dyn waypoint_contract::ToolAdapter>>) -> (Executor, EventBus) {
        let registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool).unwrap();
        }
        let bus = EventBus::new();
        (Executor::new(registry, bus.clone()), bus)
    }

    #[tokio::test]
    async fn emits_trace_paired_request_and_result() {
        let output = json_map(serde_json::json!({"echo": "hi"}));
        let (executor, bus) = executor_with(vec![Arc::new(StaticTool::new("echo", output))]);
        let plan = single_step_plan("echo", "t-root");
        let snapshot = snapshot();

        let execution = executor
            .execute(ExecuteRequest {
                plan: &plan,
                step_index: 0,
                step: &plan.steps[0],
                snapshot: &snapshot,
                preferred_tool_id: None,
            })
            .await
            .unwrap();

        assert!(execution.result.success);
        assert_eq!(execution.tool_id, "echo");
        assert!(execution.result.latency_ms.is_some());

        let history = bus.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].event_type, BusEventType::ToolRequest);
        assert_eq!(history[1].event_type, BusEventType::ToolResult);
        assert_eq!(history[0].trace_id, history[1].trace_id);
        assert_eq!(history[0].related_task_id.as_deref(), Some("t-root"));
        assert_eq!(history[1].payload["result"]["success"], true);
    }

    #[tokio::test]
    async fn missing_tool_sequence_is_no_tool_candidate() {
        let (executor, _bus) = executor_with(vec![]);
        let mut plan = single_step_plan("echo", "t-root");
        plan.steps[0].tool_sequence.clear();
        let snapshot = snapshot();

        let err = executor
            .execute(ExecuteRequest {
                plan: &plan,
                step_index: 0,
                step: &plan.steps[0],
                snapshot: &snapshot,
                preferred_tool_id: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NoToolCandidate { .. }));
    }

    #[tokio::test]
    async fn unknown_tool_is_tool_not_registered() {
        let (executor, bus) = executor_with(vec![]);
        let plan = single_step_plan("ghost", "t-root");
        let snapshot = snapshot();

        let err = executor
            .execute(ExecuteRequest {
                plan: &plan,
                step_index: 0,
                step: &plan.steps[0],
                snapshot: &snapshot,
                preferred_tool_id: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolNotRegistered { tool_id } if tool_id == "ghost"));
        // Failed before the request event: nothing on the bus.
        assert!(bus.history().is_empty());
    }

    #[tokio::test]
    async fn adapter_error_becomes_failed_result() {
        let (executor, bus) = executor_with(vec![Arc::new(ErroringTool::new("bomb"))]);
        let plan = single_step_plan("bomb", "t-root");
        let snapshot = snapshot();

        let execution = executor
            .execute(ExecuteRequest {
                plan: &plan,
                step_index: 0,
                step: &plan.steps[0],
                snapshot: &snapshot,
                preferred_tool_id: None,
            })
            .await
            .unwrap();

        assert!(!execution.result.success);
        assert!(execution
            .result
            .error
            .as_deref()
            .unwrap()
            .contains("adapter blew up"));
        // The result event still went out with the failure attached.
        assert_eq!(bus.history()[1].payload["result"]["success"], false);
    }

    #[tokio::test]
    async fn preferred_tool_overrides_sequence_head() {
        let (executor, _bus) = executor_with(vec![
            Arc::new(StaticTool::new("primary", JsonMap::new())),
            Arc::new(StaticTool::new("backup", JsonMap::new())),
        ]);
        let mut plan = single_step_plan("primary", "t-root");
        plan.steps[0]
            .tool_sequence
            .push(waypoint_contract::ToolChoice::new("backup"));
        let snapshot = snapshot();

        let execution = executor
            .execute(ExecuteRequest {
                plan: &plan,
                step_index: 0,
                step: &plan.steps[0],
                snapshot: &snapshot,
                preferred_tool_id: Some("backup"),
            })
            .await
            .unwrap();
        assert_eq!(execution.tool_id, "backup");
    }

    struct CountingRecorder {
        calls: AtomicUsize,
        fail: bool,
    }

    impl ExecutionRecorder for CountingRecorder {
        fn record_execution_result(
            &self,
            _result: &ExecutionResult,
            _snapshot: AgentContextSnapshot,
        ) -> Result<(), RecorderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(RecorderError("recorder exploded".into()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn recorder_errors_are_swallowed() {
        let registry = ToolRegistry::new();
        registry
            .register(Arc::new(StaticTool::new("echo", JsonMap::new())))
            .unwrap();
        let recorder = Arc::new(CountingRecorder {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let executor =
            Executor::new(registry, EventBus::new()).with_recorder(recorder.clone());
        let plan = single_step_plan("echo", "t-root");
        let snapshot = snapshot();

        let execution = executor
            .execute(ExecuteRequest {
                plan: &plan,
                step_index: 0,
                step: &plan.steps[0],
                snapshot: &snapshot,
                preferred_tool_id: None,
            })
            .await
            .unwrap();

        assert!(execution.result.success);
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);
    }
}
