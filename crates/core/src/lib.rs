pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;

pub use domain::context::{ContextField, ConversationContext};
pub use domain::event::{AgentMessage, Event, EventKind, GuardrailCheck};
pub use domain::session::{ConversationId, Session, TranscriptItem};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{TransitionOutcome, TurnAction, TurnFlow, TurnPhase, TurnSignal};
