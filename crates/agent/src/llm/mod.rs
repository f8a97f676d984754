use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use concierge_core::config::{LlmConfig, LlmProvider};
use concierge_core::domain::session::TranscriptItem;

use crate::registry::AgentKind;
use crate::tools::ToolSchema;

pub mod offline;
pub mod openai;
pub mod scripted;

pub use offline::OfflineModel;
pub use openai::OpenAiCompatibleClient;
pub use scripted::ScriptedModel;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandoffOption {
    pub name: String,
    pub description: String,
}

/// Everything the model sees for one agent step.
#[derive(Clone, Debug)]
pub struct ModelRequest {
    pub agent: AgentKind,
    pub system_prompt: String,
    pub transcript: Vec<TranscriptItem>,
    pub tools: Vec<ToolSchema>,
    pub handoffs: Vec<HandoffOption>,
}

impl ModelRequest {
    /// Latest customer message in the transcript.
    pub fn latest_user_message(&self) -> Option<&str> {
        self.transcript.iter().rev().find_map(|item| match item {
            TranscriptItem::User { content } => Some(content.as_str()),
            _ => None,
        })
    }

    /// Transcript items recorded after the latest customer message.
    pub fn since_latest_user_message(&self) -> &[TranscriptItem] {
        let start = self
            .transcript
            .iter()
            .rposition(|item| matches!(item, TranscriptItem::User { .. }))
            .map(|index| index + 1)
            .unwrap_or(0);
        &self.transcript[start..]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ModelResponse {
    Text(String),
    ToolCalls(Vec<ToolCallRequest>),
    Handoff { call_id: String, target: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("model transport failed: {0}")]
    Transport(String),
    #[error("model endpoint returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("model response could not be decoded: {0}")]
    Decode(String),
    #[error("model client is misconfigured: {0}")]
    Configuration(String),
    #[error("scripted model has no responses left")]
    Exhausted,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    fn name(&self) -> &str;
    async fn respond(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError>;
}

/// Builds the client selected by `llm.provider`.
pub fn client_for(config: &LlmConfig) -> Result<Arc<dyn ModelClient>, ModelError> {
    match config.provider {
        LlmProvider::Offline => Ok(Arc::new(OfflineModel)),
        LlmProvider::OpenAi | LlmProvider::Ollama => {
            Ok(Arc::new(OpenAiCompatibleClient::from_config(config)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use concierge_core::config::AppConfig;
    use concierge_core::domain::session::TranscriptItem;

    use super::{client_for, ModelRequest};
    use crate::registry::AgentKind;

    #[test]
    fn offline_provider_needs_no_network_settings() {
        let config = AppConfig::default();
        let client = client_for(&config.llm).expect("offline client");
        assert_eq!(client.name(), "offline");
    }

    #[test]
    fn request_splits_on_latest_user_message() {
        let request = ModelRequest {
            agent: AgentKind::Triage,
            system_prompt: String::new(),
            transcript: vec![
                TranscriptItem::User { content: "first".to_string() },
                TranscriptItem::Assistant {
                    agent: "triage_agent".to_string(),
                    content: "hello".to_string(),
                },
                TranscriptItem::User { content: "second".to_string() },
                TranscriptItem::Handoff {
                    from: "triage_agent".to_string(),
                    to: "faq_agent".to_string(),
                },
            ],
            tools: Vec::new(),
            handoffs: Vec::new(),
        };

        assert_eq!(request.latest_user_message(), Some("second"));
        assert_eq!(request.since_latest_user_message().len(), 1);
    }
}
