//! Failures surfaced by the execution core.

use thiserror::Error;

/// Machine-level failures. Each consumes one failure slot and routes the
/// machine through its `error` state; none is fatal until `max_failures`
/// is exhausted. A tool returning `success = false` is NOT one of these —
/// that flows through observe/reflect as ordinary evidence.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("no tool candidate for step {step_id}")]
    NoToolCandidate { step_id: String },

    #[error("tool not registered: {tool_id}")]
    ToolNotRegistered { tool_id: String },

    #[error("no current step to act on")]
    NoCurrentStep,

    #[error("planner failed: {0}")]
    PlannerFailed(String),

    #[error("reflector failed: {0}")]
    ReflectorFailed(String),

    #[error("run duration {elapsed_ms}ms exceeded limit of {limit_ms}ms")]
    DurationExceeded { elapsed_ms: u64, limit_ms: u64 },

    #[error("iteration count {iterations} reached limit of {limit}")]
    IterationsExceeded { iterations: u64, limit: u64 },
}

impl AgentError {
    /// Stable kind string used in event payloads and working memory.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoToolCandidate { .. } => "no-tool-candidate",
            Self::ToolNotRegistered { .. } => "tool-not-registered",
            Self::NoCurrentStep => "no-current-step",
            Self::PlannerFailed(_) => "planner-failed",
            Self::ReflectorFailed(_) => "reflector-failed",
            Self::DurationExceeded { .. } => "guard-duration-exceeded",
            Self::IterationsExceeded { .. } => "guard-iterations-exceeded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(
            AgentError::NoToolCandidate {
                step_id: "s1".into()
            }
            .kind(),
            "no-tool-candidate"
        );
        assert_eq!(
            AgentError::DurationExceeded {
                elapsed_ms: 10,
                limit_ms: 5
            }
            .kind(),
            "guard-duration-exceeded"
        );
    }
}
