//! States of the plan/act/observe/reflect machine.

use serde::{Deserialize, Serialize};

/// Machine states. `Finish` is the only terminal state; every run reaches
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    Plan,
    Act,
    Observe,
    Reflect,
    Error,
    Finish,
}

impl MachineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, MachineState::Finish)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Act => "act",
            Self::Observe => "observe",
            Self::Reflect => "reflect",
            Self::Error => "error",
            Self::Finish => "finish",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_finish_is_terminal() {
        assert!(MachineState::Finish.is_terminal());
        for state in [
            MachineState::Plan,
            MachineState::Act,
            MachineState::Observe,
            MachineState::Reflect,
            MachineState::Error,
        ] {
            assert!(!state.is_terminal());
        }
    }

    #[test]
    fn serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(MachineState::Observe).unwrap(),
            "observe"
        );
    }
}
