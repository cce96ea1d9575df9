//! Execution core for one agent run.
//!
//! The pieces compose bottom-up: [`bus::EventBus`] broadcasts run events,
//! [`context::AgentContext`] is the single mutable store, the
//! [`executor::Executor`] mediates between plan steps and registered tools,
//! and [`machine::AgentMachine`] drives the plan → act → observe → reflect
//! loop to its terminal state. [`runtime::AgentRuntime`] wires them together
//! for callers such as the bridge server.

pub mod bus;
pub mod context;
pub mod executor;
pub mod machine;
pub mod registry;
pub mod runtime;

pub use bus::{Broadcast, EventBus, Subscription, TypedSubscription};
pub use context::{AgentContext, ContextUpdate};
pub use executor::{ExecuteRequest, Executor};
pub use machine::{AgentMachine, GuardConfig, StopToken, TransitionSink};
pub use registry::{RegistryError, ToolRegistry};
pub use runtime::AgentRuntime;
