use thiserror::Error;

use crate::flows::states::{TransitionOutcome, TurnAction, TurnPhase, TurnSignal};

/// Transition table for one turn:
/// `Loaded -> GuardrailCheck -> {Blocked | AgentStep} -> (ToolExec -> AgentStep)* -> Done`,
/// with accepted handoffs looping back into `GuardrailCheck` for the new agent.
#[derive(Clone, Copy, Debug, Default)]
pub struct TurnFlow;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TurnTransitionError {
    #[error("invalid turn transition from {phase:?} using signal {signal:?}")]
    InvalidTransition { phase: TurnPhase, signal: TurnSignal },
}

impl TurnFlow {
    pub fn initial_phase(&self) -> TurnPhase {
        TurnPhase::Loaded
    }

    pub fn apply(
        &self,
        current: TurnPhase,
        signal: TurnSignal,
    ) -> Result<TransitionOutcome, TurnTransitionError> {
        use TurnAction::{EmitRefusal, ExecuteTools, InvokeModel, PersistSession, RunGuardrails};
        use TurnPhase::{AgentStep, Blocked, Done, GuardrailCheck, Loaded, ToolExec};
        use TurnSignal::{
            GuardrailTripped, GuardrailsPassed, HandoffAccepted, HandoffRejected, SessionReady,
            TextProduced, ToolCallsRequested, ToolResultsRecorded,
        };

        let (to, actions) = match (current, signal) {
            (Loaded, SessionReady) => (GuardrailCheck, vec![RunGuardrails]),
            (GuardrailCheck, GuardrailsPassed) => (AgentStep, vec![InvokeModel]),
            (GuardrailCheck, GuardrailTripped) => (Blocked, vec![EmitRefusal]),
            (AgentStep, HandoffAccepted) => (GuardrailCheck, vec![RunGuardrails]),
            (AgentStep, HandoffRejected) => (AgentStep, vec![InvokeModel]),
            (AgentStep, ToolCallsRequested) => (ToolExec, vec![ExecuteTools]),
            (ToolExec, ToolResultsRecorded) => (AgentStep, vec![InvokeModel]),
            (AgentStep, TextProduced) => (Done, vec![PersistSession]),
            _ => {
                return Err(TurnTransitionError::InvalidTransition { phase: current, signal });
            }
        };

        Ok(TransitionOutcome { from: current, to, signal, actions })
    }
}

#[cfg(test)]
mod tests {
    use crate::flows::engine::{TurnFlow, TurnTransitionError};
    use crate::flows::states::{TurnAction, TurnPhase, TurnSignal};

    fn run(signals: &[TurnSignal]) -> Result<TurnPhase, TurnTransitionError> {
        let flow = TurnFlow;
        let mut phase = flow.initial_phase();
        for signal in signals {
            phase = flow.apply(phase, *signal)?.to;
        }
        Ok(phase)
    }

    #[test]
    fn plain_answer_path_reaches_done_and_persists() {
        let flow = TurnFlow;
        let checked = flow.apply(TurnPhase::Loaded, TurnSignal::SessionReady).expect("loaded");
        let stepping = flow.apply(checked.to, TurnSignal::GuardrailsPassed).expect("passed");
        let done = flow.apply(stepping.to, TurnSignal::TextProduced).expect("text");

        assert_eq!(done.to, TurnPhase::Done);
        assert_eq!(done.actions, vec![TurnAction::PersistSession]);
        assert!(done.to.is_terminal());
    }

    #[test]
    fn tool_loop_and_handoff_path() {
        let phase = run(&[
            TurnSignal::SessionReady,
            TurnSignal::GuardrailsPassed,
            TurnSignal::HandoffAccepted,
            TurnSignal::GuardrailsPassed,
            TurnSignal::ToolCallsRequested,
            TurnSignal::ToolResultsRecorded,
            TurnSignal::ToolCallsRequested,
            TurnSignal::ToolResultsRecorded,
            TurnSignal::TextProduced,
        ])
        .expect("valid sequence");

        assert_eq!(phase, TurnPhase::Done);
    }

    #[test]
    fn guardrail_trip_blocks_without_persisting() {
        let flow = TurnFlow;
        let blocked = flow
            .apply(TurnPhase::GuardrailCheck, TurnSignal::GuardrailTripped)
            .expect("trip is a valid outcome");

        assert_eq!(blocked.to, TurnPhase::Blocked);
        assert!(!blocked.actions.contains(&TurnAction::PersistSession));
    }

    #[test]
    fn tools_cannot_run_before_guardrails() {
        let error = run(&[TurnSignal::SessionReady, TurnSignal::ToolCallsRequested])
            .expect_err("tool calls need an agent step first");

        assert_eq!(
            error,
            TurnTransitionError::InvalidTransition {
                phase: TurnPhase::GuardrailCheck,
                signal: TurnSignal::ToolCallsRequested,
            }
        );
    }

    #[test]
    fn terminal_phases_accept_nothing() {
        let flow = TurnFlow;
        assert!(flow.apply(TurnPhase::Blocked, TurnSignal::GuardrailsPassed).is_err());
        assert!(flow.apply(TurnPhase::Done, TurnSignal::SessionReady).is_err());
    }
}
