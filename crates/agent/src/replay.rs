//! Rebuilds post-turn state from a turn's event log.

use concierge_core::domain::context::ConversationContext;
use concierge_core::domain::event::{Event, EventKind};
use concierge_core::domain::session::{ConversationId, Session};
use serde_json::Value;
use tracing::debug;

use crate::hooks::apply_hooks;
use crate::registry::AgentRegistry;
use crate::router::{apply_turn_handoff, resolve_active_agent, TRANSFER_TOOL_NAME};
use crate::tools::{ToolCapability, ToolRegistry};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplayedState {
    pub context: ConversationContext,
    pub active_agent: String,
}

/// Re-applies the state-changing `tool_call` events of one turn to a copy
/// of the pre-turn context and active agent.
///
/// Handoffs go through the same edge checks and entry hooks as a live turn,
/// and only context-writing tools are re-run, so the result matches what the
/// orchestrator persisted. A blocked turn replays to the unchanged inputs.
pub async fn replay(
    registry: &AgentRegistry,
    tools: &ToolRegistry,
    events: &[Event],
    context: &ConversationContext,
    active_agent: &str,
) -> ReplayedState {
    let mut session =
        Session::start(ConversationId("replay".to_string()), context.clone(), active_agent);
    session.active_agent = resolve_active_agent(registry, &session).name().to_string();

    if events.iter().any(|event| event.kind == EventKind::GuardrailTrip) {
        return ReplayedState { context: context.clone(), active_agent: session.active_agent };
    }

    let origin = resolve_active_agent(registry, &session).kind;
    let empty = Value::Object(Default::default());

    for event in events.iter().filter(|event| event.kind == EventKind::ToolCall) {
        let args = event.tool_args().unwrap_or(&empty);

        if event.content == TRANSFER_TOOL_NAME {
            let Some(target) = args.get("agent_name").and_then(Value::as_str) else {
                continue;
            };
            if let Ok(next) = apply_turn_handoff(registry, &mut session, origin, target) {
                session.context = apply_hooks(registry.get(next).entry_hooks, &session.context);
            }
            continue;
        }

        let permitted =
            registry.by_name(&event.agent).is_some_and(|agent| agent.allows_tool(&event.content));
        if !permitted || tools.capability(&event.content) != Some(ToolCapability::WriteContext) {
            continue;
        }
        // A failed call left the live context untouched, so it is skipped here too.
        if let Err(error) = tools.invoke(&event.content, args, &mut session.context).await {
            debug!(
                event_name = "replay.tool_skipped",
                tool = %event.content,
                error_code = error.code(),
                "tool call failed during replay and was skipped"
            );
        }
    }

    ReplayedState { context: session.context, active_agent: session.active_agent }
}
