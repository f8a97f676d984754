use thiserror::Error;

use concierge_core::domain::session::Session;

use crate::registry::{AgentDescriptor, AgentKind, AgentRegistry};

/// Name of the pseudo tool under which handoffs appear in the event stream.
pub const TRANSFER_TOOL_NAME: &str = "transfer_to_agent";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HandoffError {
    #[error("agent `{from}` is not allowed to hand off to `{to}`")]
    NotAllowed { from: String, to: String },
    #[error("unknown agent `{0}`")]
    UnknownAgent(String),
    #[error("handoff to `{to}` is outside what `{origin}` can reach in one turn")]
    HopLimit { origin: String, to: String },
}

impl HandoffError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAllowed { .. } => "handoff_not_allowed",
            Self::UnknownAgent(_) => "unknown_agent",
            Self::HopLimit { .. } => "handoff_hop_limit",
        }
    }
}

/// Descriptor for the session's active agent. Unknown or corrupt pointers
/// fall back to the entry agent.
pub fn resolve_active_agent(registry: &AgentRegistry, session: &Session) -> &'static AgentDescriptor {
    registry.by_name(&session.active_agent).unwrap_or_else(|| registry.entry())
}

/// Moves the active agent pointer to `target_name` if the current agent has
/// an edge to it. On error the session is untouched.
pub fn apply_handoff(
    registry: &AgentRegistry,
    session: &mut Session,
    target_name: &str,
) -> Result<AgentKind, HandoffError> {
    let target = validate_edge(registry, session, target_name)?;
    session.active_agent = target.name().to_string();
    Ok(target)
}

/// [`apply_handoff`] for a handoff happening inside a turn that started on
/// `origin`. The target must also be `origin` itself or one of its direct
/// handoff targets, so a single turn never moves the pointer further than one
/// edge from where it started.
pub fn apply_turn_handoff(
    registry: &AgentRegistry,
    session: &mut Session,
    origin: AgentKind,
    target_name: &str,
) -> Result<AgentKind, HandoffError> {
    let target = validate_edge(registry, session, target_name)?;

    if target != origin && !registry.get(origin).can_hand_off_to(target) {
        return Err(HandoffError::HopLimit {
            origin: origin.name().to_string(),
            to: target.name().to_string(),
        });
    }

    session.active_agent = target.name().to_string();
    Ok(target)
}

fn validate_edge(
    registry: &AgentRegistry,
    session: &Session,
    target_name: &str,
) -> Result<AgentKind, HandoffError> {
    let current = resolve_active_agent(registry, session);
    let target = AgentKind::from_name(target_name)
        .ok_or_else(|| HandoffError::UnknownAgent(target_name.to_string()))?;

    if !current.can_hand_off_to(target) {
        return Err(HandoffError::NotAllowed {
            from: current.name().to_string(),
            to: target.name().to_string(),
        });
    }

    Ok(target)
}
