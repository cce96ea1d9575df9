//! Wires one machine run to the shared broadcast streams.

use crate::bus::{Broadcast, EventBus};
use crate::context::AgentContext;
use crate::executor::Executor;
use crate::machine::{AgentMachine, GuardConfig, StopToken, TransitionSink};
use crate::registry::ToolRegistry;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use waypoint_contract::{
    json_map, AgentContextSnapshot, AgentRunResult, BusEvent, BusEventType, ExecutionRecorder,
    JsonMap, MachineState, Planner, Reflector, TaskNode,
};

/// Publishes machine transitions to the snapshot stream and the event bus.
struct StreamSink {
    bus: EventBus,
    snapshots: Broadcast<AgentContextSnapshot>,
}

impl StreamSink {
    fn trace_for(snapshot: &AgentContextSnapshot) -> String {
        snapshot
            .active_task_id
            .clone()
            .unwrap_or_else(|| snapshot.root_task_id.clone())
    }

    fn transition_event(
        &self,
        event_type: BusEventType,
        state: MachineState,
        snapshot: &AgentContextSnapshot,
    ) -> BusEvent {
        let trace = Self::trace_for(snapshot);
        BusEvent::new(event_type, &trace)
            .with_task(&trace)
            .with_payload(json_map(json!({
                "agentId": snapshot.agent_id,
                "state": state.as_str(),
                "iteration": snapshot.iteration,
                "activeTaskId": snapshot.active_task_id,
            })))
    }
}

impl TransitionSink for StreamSink {
    fn on_transition(&self, state: MachineState, snapshot: &AgentContextSnapshot) {
        self.snapshots.emit(snapshot.clone());
        self.bus
            .emit(self.transition_event(BusEventType::AgentTransition, state, snapshot));
    }

    fn on_finished(&self, snapshot: &AgentContextSnapshot) {
        self.snapshots.emit(snapshot.clone());
        self.bus.emit(self.transition_event(
            BusEventType::AgentFinished,
            MachineState::Finish,
            snapshot,
        ));
    }

    fn on_log(&self, message: &str, kind: &str, snapshot: &AgentContextSnapshot) {
        let trace = Self::trace_for(snapshot);
        self.bus.emit(
            BusEvent::new(BusEventType::AgentLog, &trace)
                .with_task(&trace)
                .with_payload(json_map(json!({
                    "agentId": snapshot.agent_id,
                    "kind": kind,
                    "message": message,
                }))),
        );
    }
}

/// Factory for agent runs sharing one event bus and snapshot stream.
#[derive(Clone)]
pub struct AgentRuntime {
    planner: Arc<dyn Planner>,
    reflector: Arc<dyn Reflector>,
    registry: ToolRegistry,
    bus: EventBus,
    snapshots: Broadcast<AgentContextSnapshot>,
    guards: GuardConfig,
    recorder: Option<Arc<dyn ExecutionRecorder>>,
}

impl AgentRuntime {
    pub fn new(
        planner: Arc<dyn Planner>,
        reflector: Arc<dyn Reflector>,
        registry: ToolRegistry,
        bus: EventBus,
        snapshots: Broadcast<AgentContextSnapshot>,
    ) -> Self {
        Self {
            planner,
            reflector,
            registry,
            bus,
            snapshots,
            guards: GuardConfig::default(),
            recorder: None,
        }
    }

    pub fn with_guards(mut self, guards: GuardConfig) -> Self {
        self.guards = guards;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn ExecutionRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn snapshots(&self) -> &Broadcast<AgentContextSnapshot> {
        &self.snapshots
    }

    /// Run one agent with a generated agent id.
    pub async fn run_task(&self, root_task: TaskNode, metadata: JsonMap) -> AgentRunResult {
        let agent_id = Uuid::new_v4().to_string();
        self.run_with(agent_id, root_task, metadata, StopToken::new())
            .await
    }

    /// Run one agent end to end, serially within this call.
    pub async fn run_with(
        &self,
        agent_id: String,
        root_task: TaskNode,
        metadata: JsonMap,
        stop: StopToken,
    ) -> AgentRunResult {
        tracing::info!(agent_id = %agent_id, root_task = %root_task.task_id, "agent run starting");
        let ctx = AgentContext::new(agent_id, root_task).with_metadata(metadata);
        let mut executor = Executor::new(self.registry.clone(), self.bus.clone());
        if let Some(recorder) = &self.recorder {
            executor = executor.with_recorder(Arc::clone(recorder));
        }
        let sink = Arc::new(StreamSink {
            bus: self.bus.clone(),
            snapshots: self.snapshots.clone(),
        });
        let machine = AgentMachine::new(
            ctx,
            Arc::clone(&self.planner),
            Arc::clone(&self.reflector),
            executor,
        )
        .with_guards(self.guards)
        .with_sink(sink)
        .with_stop_token(stop);

        let result = machine.run().await;
        tracing::info!(
            iterations = result.iterations,
            "agent run finished in state {:?}",
            result.state
        );
        result
    }
}
