//! Agent runtime for the airline customer-service concierge.
//!
//! This crate decides which specialist answers a customer, screens every
//! message before a model sees it, runs tools against the shared booking
//! context, and turns all of it into an ordered event log.
//!
//! # Architecture
//!
//! One turn is a constrained loop:
//! 1. **Screening** (`guardrails`) - jailbreak and relevance checks for the active agent
//! 2. **Agent step** (`llm`) - the model answers, calls tools, or asks for a handoff
//! 3. **Routing** (`registry`, `router`) - handoffs follow a fixed edge table
//! 4. **Tools** (`tools`, `hooks`) - context reads and writes with declared permissions
//!
//! `runtime::TurnOrchestrator` drives the loop through the core turn state
//! machine and persists the session only when the turn completes.
//! `engines::EngineRegistry` caches orchestrators per app namespace and
//! drains them on shutdown. `replay` rebuilds post-turn state from events.
//!
//! # Safety Principle
//!
//! The model never changes state directly. Every pointer move is checked
//! against the agent graph and every context write against the tool's
//! declared fields.

pub mod engines;
pub mod guardrails;
pub mod hooks;
pub mod llm;
pub mod registry;
pub mod replay;
pub mod router;
pub mod runtime;
pub mod tools;

pub use engines::{EngineRegistry, ShutdownReport};
pub use llm::{client_for, ModelClient, ModelError, ModelRequest, ModelResponse};
pub use registry::{AgentKind, AgentRegistry, AgentSummary};
pub use runtime::{
    EngineDeps, OrchestratorSettings, TurnError, TurnOrchestrator, TurnRequest, TurnResponse,
};
