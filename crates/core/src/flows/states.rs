use serde::{Deserialize, Serialize};

/// Phases a single conversational turn moves through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Loaded,
    GuardrailCheck,
    Blocked,
    AgentStep,
    ToolExec,
    Done,
}

impl TurnPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Blocked | Self::Done)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnSignal {
    SessionReady,
    GuardrailsPassed,
    GuardrailTripped,
    HandoffAccepted,
    HandoffRejected,
    ToolCallsRequested,
    ToolResultsRecorded,
    TextProduced,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnAction {
    RunGuardrails,
    InvokeModel,
    ExecuteTools,
    EmitRefusal,
    PersistSession,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: TurnPhase,
    pub to: TurnPhase,
    pub signal: TurnSignal,
    pub actions: Vec<TurnAction>,
}
