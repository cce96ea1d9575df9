//! Tool contracts: adapter trait, descriptor, input/result envelopes.
//!
//! Adapters never "throw" for ordinary execution failure — they return
//! `Ok(ToolResult { success: false, .. })`. An `Err(ToolError)` is the
//! uncaught-exception path, which the executor converts into a failed
//! result rather than letting it escape the run.

use crate::snapshot::AgentContextSnapshot;
use crate::JsonMap;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Tool execution errors.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("denied: {0}")]
    Denied(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Tool metadata surfaced by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Unique tool id.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
}

impl ToolDescriptor {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = schema;
        self
    }
}

/// Input envelope for one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolInput {
    /// Task the invocation reports against.
    pub task_id: String,
    /// Correlation id shared with the `tool.request`/`tool.result` pair.
    pub trace_id: String,
    /// Step parameters merged with `planId`/`stepId`.
    pub params: JsonMap,
    /// Context at invocation time; a copy, safe to hold.
    pub snapshot: AgentContextSnapshot,
}

impl ToolInput {
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

/// Outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub success: bool,
    #[serde(default)]
    pub output: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl ToolResult {
    pub fn ok(output: JsonMap) -> Self {
        Self {
            success: true,
            output,
            error: None,
            latency_ms: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: JsonMap::new(),
            error: Some(error.into()),
            latency_ms: None,
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }
}

/// Contract every tool satisfies.
///
/// File-oriented adapters must refuse paths that resolve outside their
/// configured workspace root.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Id, description, and parameter schema.
    fn descriptor(&self) -> ToolDescriptor;

    /// Validate parameters against the descriptor schema before execution.
    ///
    /// The default implementation uses [`validate_against_schema`] with
    /// `descriptor().parameters`. Override to customise or skip validation.
    fn validate_params(&self, params: &Value) -> Result<(), ToolError> {
        validate_against_schema(&self.descriptor().parameters, params)
    }

    /// Execute the tool. `input.trace_id` doubles as an idempotency key for
    /// side effects.
    async fn execute(&self, input: ToolInput) -> Result<ToolResult, ToolError>;
}

/// Validate a JSON value against a JSON Schema.
///
/// Returns `Err(ToolError::InvalidParams)` listing all violations.
pub fn validate_against_schema(schema: &Value, params: &Value) -> Result<(), ToolError> {
    let validator = jsonschema::Validator::new(schema)
        .map_err(|e| ToolError::Internal(format!("invalid tool schema: {e}")))?;
    if validator.is_valid(params) {
        return Ok(());
    }
    let errors: Vec<String> = validator
        .iter_errors(params)
        .map(|e| e.to_string())
        .collect();
    Err(ToolError::InvalidParams(errors.join("; ")))
}

// ---------------------------------------------------------------------------
// TypedToolAdapter – strongly-typed adapter with automatic schema generation
// ---------------------------------------------------------------------------

/// Strongly-typed variant of [`ToolAdapter`] with schema generation.
///
/// Implement this instead of [`ToolAdapter`] when the tool has a fixed
/// parameter shape; a blanket impl provides [`ToolAdapter`] automatically.
/// Unknown keys (such as the injected `planId`/`stepId`) are ignored during
/// deserialization, so `Params` only needs to name the fields it uses.
#[async_trait]
pub trait TypedToolAdapter: Send + Sync {
    /// Parameter type — must derive `Deserialize` and `JsonSchema`.
    type Params: for<'de> Deserialize<'de> + JsonSchema + Send;

    fn tool_id(&self) -> &str;

    fn description(&self) -> &str;

    /// Optional business-logic validation after deserialization.
    fn validate(&self, _params: &Self::Params) -> Result<(), String> {
        Ok(())
    }

    async fn execute(&self, params: Self::Params, input: &ToolInput)
        -> Result<ToolResult, ToolError>;
}

#[async_trait]
impl<T: TypedToolAdapter> ToolAdapter for T {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(self.tool_id(), self.description())
            .with_parameters(typed_params_schema::<T::Params>())
    }

    /// Skips JSON Schema validation — `from_value` deserialization covers it.
    fn validate_params(&self, _params: &Value) -> Result<(), ToolError> {
        Ok(())
    }

    async fn execute(&self, input: ToolInput) -> Result<ToolResult, ToolError> {
        let typed: T::Params = serde_json::from_value(Value::Object(input.params.clone()))
            .map_err(|e| ToolError::InvalidParams(e.to_string()))?;
        self.validate(&typed).map_err(ToolError::InvalidParams)?;
        TypedToolAdapter::execute(self, typed, &input).await
    }
}

/// Generate a JSON Schema `Value` from a type implementing `JsonSchema`.
fn typed_params_schema<T: JsonSchema>() -> Value {
    let mut schema = serde_json::to_value(schemars::schema_for!(T))
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}));
    // Observers don't need the meta key.
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
    }
    schema
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_map;
    use serde_json::json;
    use std::collections::HashMap;

    fn snapshot() -> AgentContextSnapshot {
        AgentContextSnapshot {
            agent_id: "a".into(),
            root_task_id: "t".into(),
            active_task_id: None,
            tasks: HashMap::new(),
            observations: Vec::new(),
            working_memory: JsonMap::new(),
            metadata: JsonMap::new(),
            iteration: 0,
            master_plan: None,
        }
    }

    #[test]
    fn schema_validation_reports_violations() {
        let schema = json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        });
        assert!(validate_against_schema(&schema, &json!({"path": "a.txt"})).is_ok());
        let err = validate_against_schema(&schema, &json!({})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }

    #[derive(Deserialize, JsonSchema)]
    struct GreetParams {
        name: String,
    }

    struct GreetTool;

    #[async_trait]
    impl TypedToolAdapter for GreetTool {
        type Params = GreetParams;

        fn tool_id(&self) -> &str {
            "greet"
        }

        fn description(&self) -> &str {
            "Greet someone"
        }

        async fn execute(
            &self,
            params: GreetParams,
            _input: &ToolInput,
        ) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::ok(json_map(
                json!({"greeting": format!("hello, {}", params.name)}),
            )))
        }
    }

    #[tokio::test]
    async fn typed_adapter_deserializes_and_ignores_injected_keys() {
        let adapter = GreetTool;
        let input = ToolInput {
            task_id: "t".into(),
            trace_id: "trace".into(),
            params: json_map(json!({"name": "ada", "planId": "p1", "stepId": "s1"})),
            snapshot: snapshot(),
        };
        let result = ToolAdapter::execute(&adapter, input).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output["greeting"], "hello, ada");
    }

    #[tokio::test]
    async fn typed_adapter_rejects_missing_fields() {
        let adapter = GreetTool;
        let input = ToolInput {
            task_id: "t".into(),
            trace_id: "trace".into(),
            params: JsonMap::new(),
            snapshot: snapshot(),
        };
        let err = ToolAdapter::execute(&adapter, input).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }
}
