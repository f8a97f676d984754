use std::sync::Arc;

use concierge_agent::{client_for, EngineDeps, OrchestratorSettings, TurnOrchestrator, TurnRequest};
use concierge_core::audit::NoopAuditSink;
use concierge_core::domain::session::ConversationId;

use crate::commands::{
    current_thread_runtime, load_config, open_session_store, CommandResult, StepFailure,
};

const CORRELATION_ID: &str = "cli-chat";

/// Runs one turn and prints the full turn response as JSON.
///
/// Without `require_existing` an unknown conversation id starts a new
/// conversation, exactly like the HTTP surface does.
pub fn run(message: &str, conversation: Option<&str>, require_existing: bool) -> CommandResult {
    let config = match load_config("chat") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let runtime = match current_thread_runtime("chat") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let model = match client_for(&config.llm) {
        Ok(model) => model,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "runtime_init",
                format!("failed to initialize model client: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let store = open_session_store(&config.database).await?;
        let orchestrator = TurnOrchestrator::new(
            config.agent.app_name.clone(),
            EngineDeps {
                model,
                sessions: Arc::clone(&store.repository),
                audit: Arc::new(NoopAuditSink),
                settings: OrchestratorSettings::from_config(&config.agent),
            },
        );

        let outcome = match conversation {
            Some(id) if require_existing => {
                orchestrator.resume(&ConversationId(id.to_string()), message, CORRELATION_ID).await
            }
            _ => {
                let request = TurnRequest {
                    conversation_id: conversation.map(ToString::to_string),
                    message: message.to_string(),
                };
                orchestrator.handle(request, CORRELATION_ID).await
            }
        };

        orchestrator.close().await;
        store.close().await;
        let response = outcome.map_err(|error| ("turn", error.to_string(), 5u8))?;
        Ok::<_, StepFailure>(response)
    });

    let response = match result {
        Ok(response) => response,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("chat", error_class, message, exit_code);
        }
    };

    match serde_json::to_string_pretty(&response) {
        Ok(output) => CommandResult { exit_code: 0, output },
        Err(error) => CommandResult::failure("chat", "serialization", error.to_string(), 5),
    }
}
