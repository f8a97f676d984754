//! Turn orchestration.
//!
//! A turn loads the session, screens the customer message for the active
//! agent, then alternates model calls and tool executions until the model
//! answers with plain text. Every step is advanced through [`TurnFlow`], and
//! the session is only written once the turn reaches `Done`. Blocked,
//! failed, or cancelled turns leave the stored session exactly as it was.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock, RwLockReadGuard};
use tracing::{info, warn};

use concierge_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use concierge_core::config::AgentConfig;
use concierge_core::domain::context::ConversationContext;
use concierge_core::domain::event::{AgentMessage, Event, GuardrailCheck};
use concierge_core::domain::session::{ConversationId, Session, TranscriptItem};
use concierge_core::errors::{ApplicationError, DomainError};
use concierge_core::flows::{TurnAction, TurnFlow, TurnPhase, TurnSignal, TurnTransitionError};
use concierge_db::{RepositoryError, SessionRepository};

use crate::guardrails::{GuardrailKind, GuardrailPipeline};
use crate::hooks::apply_hooks;
use crate::llm::{HandoffOption, ModelClient, ModelError, ModelRequest, ModelResponse, ToolCallRequest};
use crate::registry::{AgentDescriptor, AgentKind, AgentRegistry, AgentSummary};
use crate::router::{apply_turn_handoff, resolve_active_agent, TRANSFER_TOOL_NAME};
use crate::tools::{ToolError, ToolOutput, ToolRegistry};

const ACTOR: &str = "turn-orchestrator";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRequest {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnResponse {
    pub conversation_id: String,
    pub current_agent: String,
    pub messages: Vec<AgentMessage>,
    pub events: Vec<Event>,
    pub context: ConversationContext,
    pub agents: Vec<AgentSummary>,
    pub guardrails: Vec<GuardrailCheck>,
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("conversation `{0}` does not exist")]
    SessionNotFound(ConversationId),
    #[error("session store failure: {0}")]
    Store(#[from] RepositoryError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("turn exceeded {limit} agent steps without a final answer")]
    StepLimitExceeded { limit: u32 },
    #[error("the engine is shutting down and no longer accepts turns")]
    Closed,
    #[error("message must not be blank")]
    EmptyMessage,
    #[error(transparent)]
    Transition(#[from] TurnTransitionError),
    #[error("turn stalled in phase {0:?}")]
    Stalled(TurnPhase),
}

impl From<TurnError> for ApplicationError {
    fn from(error: TurnError) -> Self {
        match error {
            TurnError::SessionNotFound(id) => Self::Domain(DomainError::SessionNotFound(id)),
            TurnError::Store(error) => Self::Persistence(error.to_string()),
            TurnError::Model(error) => Self::Model(error.to_string()),
            TurnError::Closed => Self::Unavailable(TurnError::Closed.to_string()),
            TurnError::EmptyMessage => Self::Rejected(TurnError::EmptyMessage.to_string()),
            TurnError::Transition(error) => Self::Domain(DomainError::TurnTransition(error)),
            other @ (TurnError::StepLimitExceeded { .. } | TurnError::Stalled(_)) => {
                Self::Domain(DomainError::InvariantViolation(other.to_string()))
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub max_steps_per_turn: u32,
    pub record_passing_guardrails: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self { max_steps_per_turn: 12, record_passing_guardrails: false }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            max_steps_per_turn: config.max_steps_per_turn,
            record_passing_guardrails: config.record_passing_guardrails,
        }
    }
}

/// Collaborators shared by every orchestrator an [`crate::engines::EngineRegistry`]
/// creates.
#[derive(Clone)]
pub struct EngineDeps {
    pub model: Arc<dyn ModelClient>,
    pub sessions: Arc<dyn SessionRepository>,
    pub audit: Arc<dyn AuditSink>,
    pub settings: OrchestratorSettings,
}

pub struct TurnOrchestrator {
    app_name: String,
    registry: AgentRegistry,
    tools: ToolRegistry,
    guardrails: GuardrailPipeline,
    flow: TurnFlow,
    model: Arc<dyn ModelClient>,
    sessions: Arc<dyn SessionRepository>,
    audit: Arc<dyn AuditSink>,
    settings: OrchestratorSettings,
    locks: ConversationLocks,
    gate: RwLock<()>,
    closed: AtomicBool,
}

/// Mutable state accumulated while one turn runs.
#[derive(Default)]
struct TurnLog {
    messages: Vec<AgentMessage>,
    events: Vec<Event>,
    guardrails: Vec<GuardrailCheck>,
}

impl TurnOrchestrator {
    pub fn new(app_name: impl Into<String>, deps: EngineDeps) -> Self {
        Self {
            app_name: app_name.into(),
            registry: AgentRegistry::standard(),
            tools: ToolRegistry::standard(),
            guardrails: GuardrailPipeline::standard(),
            flow: TurnFlow,
            model: deps.model,
            sessions: deps.sessions,
            audit: deps.audit,
            settings: deps.settings,
            locks: ConversationLocks::default(),
            gate: RwLock::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Conversations that currently hold or wait on a turn lock.
    pub fn active_conversations(&self) -> usize {
        self.locks.len()
    }

    /// Runs one turn. A missing or unknown conversation id starts a new
    /// conversation; an empty message on a new conversation only primes it.
    pub async fn handle(
        &self,
        request: TurnRequest,
        correlation_id: &str,
    ) -> Result<TurnResponse, TurnError> {
        let _admission = self.admit().await?;

        let requested = request
            .conversation_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .map(ConversationId);
        let _lease = match &requested {
            Some(id) => Some(self.locks.acquire(id.clone()).await),
            None => None,
        };

        let existing = match &requested {
            Some(id) => self.sessions.find(id).await?,
            None => None,
        };
        let message = request.message.trim();

        match existing {
            Some(_) if message.is_empty() => Err(TurnError::EmptyMessage),
            Some(session) => self.run_turn(session, false, message, correlation_id).await,
            None => {
                let session = Session::start(
                    ConversationId::generate(),
                    ConversationContext::initial_demo(),
                    self.registry.entry().name(),
                );
                if message.is_empty() {
                    return self.prime(session, correlation_id).await;
                }
                self.run_turn(session, true, message, correlation_id).await
            }
        }
    }

    /// Runs one turn on a conversation that must already exist.
    pub async fn resume(
        &self,
        id: &ConversationId,
        message: &str,
        correlation_id: &str,
    ) -> Result<TurnResponse, TurnError> {
        let _admission = self.admit().await?;
        let message = message.trim();
        if message.is_empty() {
            return Err(TurnError::EmptyMessage);
        }

        let _lease = self.locks.acquire(id.clone()).await;
        let session =
            self.sessions.find(id).await?.ok_or_else(|| TurnError::SessionNotFound(id.clone()))?;
        self.run_turn(session, false, message, correlation_id).await
    }

    /// Stops admitting turns and waits for in-flight ones to finish.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _drained = self.gate.write().await;
        info!(
            event_name = "engine.closed",
            correlation_id = "shutdown",
            app_name = %self.app_name,
            "engine drained and closed"
        );
    }

    async fn admit(&self) -> Result<RwLockReadGuard<'_, ()>, TurnError> {
        if self.is_closed() {
            return Err(TurnError::Closed);
        }
        let guard = self.gate.read().await;
        // close() may have won the race while we waited behind its writer.
        if self.is_closed() {
            return Err(TurnError::Closed);
        }
        Ok(guard)
    }

    async fn prime(&self, session: Session, correlation_id: &str) -> Result<TurnResponse, TurnError> {
        self.sessions.create(session.clone()).await?;
        info!(
            event_name = "turn.primed",
            correlation_id,
            conversation_id = %session.id,
            "new conversation primed"
        );
        Ok(self.response(&session, TurnLog::default()))
    }

    async fn run_turn(
        &self,
        session: Session,
        is_new: bool,
        message: &str,
        correlation_id: &str,
    ) -> Result<TurnResponse, TurnError> {
        let audit = AuditContext::new(Some(session.id.clone()), correlation_id, ACTOR);
        let origin = resolve_active_agent(&self.registry, &session).kind;
        info!(
            event_name = "turn.started",
            correlation_id,
            conversation_id = %session.id,
            agent = origin.name(),
            "turn started"
        );

        let mut working = session.clone();
        working.active_agent = origin.name().to_string();
        working.transcript.push(TranscriptItem::User { content: message.to_string() });

        let mut log = TurnLog::default();
        let mut pending: Vec<ToolCallRequest> = Vec::new();
        let mut tripped: Option<GuardrailCheck> = None;
        let mut steps = 0_u32;

        let mut step = self.flow.apply(self.flow.initial_phase(), TurnSignal::SessionReady)?;
        loop {
            let Some(action) = step.actions.first().copied() else {
                return Err(TurnError::Stalled(step.to));
            };

            let signal = match action {
                TurnAction::RunGuardrails => {
                    let agent = resolve_active_agent(&self.registry, &working);
                    let outcome = self.guardrails.evaluate(agent.guardrails, message);
                    if self.settings.record_passing_guardrails {
                        log.guardrails.extend(outcome.passed().cloned());
                    }
                    match outcome.tripped() {
                        Some(check) => {
                            tripped = Some(check.clone());
                            TurnSignal::GuardrailTripped
                        }
                        None => TurnSignal::GuardrailsPassed,
                    }
                }
                TurnAction::InvokeModel => {
                    steps += 1;
                    if steps > self.settings.max_steps_per_turn {
                        warn!(
                            event_name = "turn.step_limit",
                            correlation_id,
                            conversation_id = %working.id,
                            limit = self.settings.max_steps_per_turn,
                            "turn exceeded its step budget"
                        );
                        return Err(TurnError::StepLimitExceeded {
                            limit: self.settings.max_steps_per_turn,
                        });
                    }

                    let agent = resolve_active_agent(&self.registry, &working);
                    let request = self.model_request(agent, &working);
                    match self.model.respond(&request).await? {
                        ModelResponse::Text(text) => {
                            self.record_text(agent, text, &mut working, &mut log);
                            TurnSignal::TextProduced
                        }
                        ModelResponse::ToolCalls(calls) => {
                            pending = calls;
                            TurnSignal::ToolCallsRequested
                        }
                        ModelResponse::Handoff { call_id, target } => self.record_handoff(
                            origin,
                            agent,
                            &call_id,
                            &target,
                            &mut working,
                            &mut log,
                            &audit,
                        ),
                    }
                }
                TurnAction::ExecuteTools => {
                    let agent = resolve_active_agent(&self.registry, &working);
                    for call in pending.drain(..) {
                        self.execute_tool(agent, call, &mut working, &mut log, &audit).await;
                    }
                    TurnSignal::ToolResultsRecorded
                }
                TurnAction::EmitRefusal => {
                    let check = tripped.take().ok_or(TurnError::Stalled(step.to))?;
                    // A blocked first message still opens the conversation, untouched.
                    if is_new {
                        self.sessions.create(session.clone()).await?;
                    }
                    return Ok(self.blocked(session, working.active_agent, check, log, &audit));
                }
                TurnAction::PersistSession => {
                    working.touch();
                    if is_new {
                        self.sessions.create(working.clone()).await?;
                    } else {
                        self.sessions.save(working.clone()).await?;
                    }

                    self.audit.emit(
                        audit
                            .event("turn.completed", AuditCategory::Routing, AuditOutcome::Success)
                            .with_metadata("from_agent", origin.name())
                            .with_metadata("to_agent", working.active_agent.clone())
                            .with_metadata("events", log.events.len().to_string()),
                    );
                    info!(
                        event_name = "turn.completed",
                        correlation_id,
                        conversation_id = %working.id,
                        agent = %working.active_agent,
                        steps,
                        events = log.events.len(),
                        "turn completed"
                    );
                    return Ok(self.response(&working, log));
                }
            };

            step = self.flow.apply(step.to, signal)?;
        }
    }

    fn model_request(&self, agent: &AgentDescriptor, working: &Session) -> ModelRequest {
        ModelRequest {
            agent: agent.kind,
            system_prompt: agent.instructions(&working.context),
            transcript: working.transcript.clone(),
            tools: self.tools.schemas(agent.tools),
            handoffs: agent
                .handoffs
                .iter()
                .map(|kind| {
                    let target = self.registry.get(*kind);
                    HandoffOption {
                        name: target.name().to_string(),
                        description: target.description.to_string(),
                    }
                })
                .collect(),
        }
    }

    fn record_text(
        &self,
        agent: &AgentDescriptor,
        text: String,
        working: &mut Session,
        log: &mut TurnLog,
    ) {
        log.events.push(Event::message(agent.name(), text.clone()));
        log.messages.push(AgentMessage { content: text.clone(), agent: agent.name().to_string() });
        working
            .transcript
            .push(TranscriptItem::Assistant { agent: agent.name().to_string(), content: text });
    }

    #[allow(clippy::too_many_arguments)]
    fn record_handoff(
        &self,
        origin: AgentKind,
        agent: &AgentDescriptor,
        call_id: &str,
        target: &str,
        working: &mut Session,
        log: &mut TurnLog,
        audit: &AuditContext,
    ) -> TurnSignal {
        log.events.push(Event::tool_call(
            agent.name(),
            TRANSFER_TOOL_NAME,
            &json!({ "agent_name": target }),
        ));

        match apply_turn_handoff(&self.registry, working, origin, target) {
            Ok(next) => {
                let entered = self.registry.get(next);
                working.context = apply_hooks(entered.entry_hooks, &working.context);
                log.events.push(Event::tool_output(agent.name(), &json!({ "assistant": next.name() })));
                working.transcript.push(TranscriptItem::Handoff {
                    from: agent.name().to_string(),
                    to: next.name().to_string(),
                });

                self.audit.emit(
                    audit
                        .event("handoff.applied", AuditCategory::Routing, AuditOutcome::Success)
                        .with_metadata("from", agent.name())
                        .with_metadata("to", next.name()),
                );
                info!(
                    event_name = "handoff.applied",
                    correlation_id = %audit.correlation_id,
                    conversation_id = %working.id,
                    from = agent.name(),
                    to = next.name(),
                    "active agent changed"
                );
                TurnSignal::HandoffAccepted
            }
            Err(error) => {
                let output = json!({ "error": error.code(), "message": error.to_string() });
                log.events.push(Event::tool_output(agent.name(), &output));
                working.transcript.push(TranscriptItem::ToolCall {
                    agent: agent.name().to_string(),
                    call_id: call_id.to_string(),
                    name: format!("transfer_to_{target}"),
                    arguments: json!({}),
                });
                working.transcript.push(TranscriptItem::ToolResult {
                    agent: agent.name().to_string(),
                    call_id: call_id.to_string(),
                    name: format!("transfer_to_{target}"),
                    output,
                });

                self.audit.emit(
                    audit
                        .event("handoff.rejected", AuditCategory::Routing, AuditOutcome::Rejected)
                        .with_metadata("from", agent.name())
                        .with_metadata("to", target)
                        .with_metadata("reason", error.code()),
                );
                warn!(
                    event_name = "handoff.rejected",
                    correlation_id = %audit.correlation_id,
                    conversation_id = %working.id,
                    from = agent.name(),
                    to = target,
                    error = %error,
                    "handoff rejected, staying on current agent"
                );
                TurnSignal::HandoffRejected
            }
        }
    }

    async fn execute_tool(
        &self,
        agent: &AgentDescriptor,
        call: ToolCallRequest,
        working: &mut Session,
        log: &mut TurnLog,
        audit: &AuditContext,
    ) {
        log.events.push(Event::tool_call(agent.name(), &call.name, &call.arguments));
        working.transcript.push(TranscriptItem::ToolCall {
            agent: agent.name().to_string(),
            call_id: call.call_id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        });
        info!(
            event_name = "tool.invoked",
            correlation_id = %audit.correlation_id,
            conversation_id = %working.id,
            agent = agent.name(),
            tool = %call.name,
            "tool invoked"
        );

        let result = if agent.allows_tool(&call.name) {
            self.tools.invoke(&call.name, &call.arguments, &mut working.context).await
        } else {
            Err(ToolError::UnknownTool(call.name.clone()))
        };

        let output = match result {
            Ok(output) => {
                if let ToolOutput::Sentinel(token) = &output {
                    log.messages.push(AgentMessage {
                        content: (*token).to_string(),
                        agent: agent.name().to_string(),
                    });
                }
                output.to_value()
            }
            Err(error) => {
                self.audit.emit(
                    audit
                        .event("tool.failed", AuditCategory::Tool, AuditOutcome::Failed)
                        .with_metadata("tool", call.name.clone())
                        .with_metadata("reason", error.code()),
                );
                warn!(
                    event_name = "tool.failed",
                    correlation_id = %audit.correlation_id,
                    conversation_id = %working.id,
                    agent = agent.name(),
                    tool = %call.name,
                    error = %error,
                    "tool failed, result handed back to the agent"
                );
                error.to_value()
            }
        };

        log.events.push(Event::tool_output(agent.name(), &output));
        working.transcript.push(TranscriptItem::ToolResult {
            agent: agent.name().to_string(),
            call_id: call.call_id,
            name: call.name,
            output,
        });
    }

    /// Builds the refusal for a tripped guardrail. Anything the turn did
    /// before the trip is discarded along with the working session.
    fn blocked(
        &self,
        stored: Session,
        blocked_agent: String,
        check: GuardrailCheck,
        log: TurnLog,
        audit: &AuditContext,
    ) -> TurnResponse {
        let refusal = GuardrailKind::from_name(&check.name)
            .map(|kind| kind.refusal_message())
            .unwrap_or("Sorry, I can't help with that request.");

        self.audit.emit(
            audit
                .event("turn.blocked", AuditCategory::Guardrail, AuditOutcome::Rejected)
                .with_metadata("guardrail", check.name.clone())
                .with_metadata("agent", blocked_agent.clone()),
        );
        info!(
            event_name = "guardrail.tripped",
            correlation_id = %audit.correlation_id,
            conversation_id = %stored.id,
            agent = %blocked_agent,
            guardrail = %check.name,
            "guardrail tripped, turn blocked"
        );

        let mut guardrails = log.guardrails;
        guardrails.push(check.clone());
        let blocked_log = TurnLog {
            messages: vec![AgentMessage { content: refusal.to_string(), agent: blocked_agent.clone() }],
            events: vec![
                Event::guardrail_trip(&blocked_agent, &check),
                Event::message(&blocked_agent, refusal),
            ],
            guardrails,
        };

        let mut shown = stored;
        shown.active_agent = resolve_active_agent(&self.registry, &shown).name().to_string();
        self.response(&shown, blocked_log)
    }

    fn response(&self, session: &Session, log: TurnLog) -> TurnResponse {
        TurnResponse {
            conversation_id: session.id.to_string(),
            current_agent: session.active_agent.clone(),
            messages: log.messages,
            events: log.events,
            context: session.context.clone(),
            agents: self.registry.summaries(),
            guardrails: log.guardrails,
        }
    }
}

/// Per-conversation turn locks. Entries exist only while some turn holds or
/// waits on them.
#[derive(Clone, Default)]
struct ConversationLocks {
    table: Arc<Mutex<HashMap<ConversationId, Arc<AsyncMutex<()>>>>>,
}

struct ConversationLease {
    id: ConversationId,
    table: Arc<Mutex<HashMap<ConversationId, Arc<AsyncMutex<()>>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ConversationLocks {
    async fn acquire(&self, id: ConversationId) -> ConversationLease {
        let lock = {
            let mut table = match self.table.lock() {
                Ok(table) => table,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(table.entry(id.clone()).or_default())
        };
        let guard = lock.lock_owned().await;
        ConversationLease { id, table: Arc::clone(&self.table), guard: Some(guard) }
    }

    fn len(&self) -> usize {
        match self.table.lock() {
            Ok(table) => table.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl Drop for ConversationLease {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut table = match self.table.lock() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Only the table itself still references an idle lock.
        if table.get(&self.id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            table.remove(&self.id);
        }
    }
}
