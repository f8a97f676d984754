use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::context::ConversationContext;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of the model-facing conversation history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum TranscriptItem {
    User { content: String },
    Assistant { agent: String, content: String },
    ToolCall { agent: String, call_id: String, name: String, arguments: Value },
    ToolResult { agent: String, call_id: String, name: String, output: Value },
    Handoff { from: String, to: String },
}

/// Durable per-conversation state. The context and the active agent pointer
/// are always written together.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: ConversationId,
    pub context: ConversationContext,
    pub active_agent: String,
    pub transcript: Vec<TranscriptItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn start(
        id: ConversationId,
        context: ConversationContext,
        entry_agent: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            context,
            active_agent: entry_agent.into(),
            transcript: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ConversationId, Session, TranscriptItem};
    use crate::domain::context::ConversationContext;

    #[test]
    fn generated_ids_are_unique_hex() {
        let first = ConversationId::generate();
        let second = ConversationId::generate();

        assert_ne!(first, second);
        assert_eq!(first.as_str().len(), 32);
        assert!(first.as_str().chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn transcript_items_are_tagged_by_role() {
        let item = TranscriptItem::ToolCall {
            agent: "faq_agent".to_string(),
            call_id: "call-1".to_string(),
            name: "faq_lookup_tool".to_string(),
            arguments: json!({ "question": "wifi?" }),
        };

        let encoded = serde_json::to_value(&item).expect("encode transcript item");
        assert_eq!(encoded["role"], "tool_call");
        assert_eq!(encoded["name"], "faq_lookup_tool");
    }

    #[test]
    fn new_session_starts_with_empty_transcript() {
        let session = Session::start(
            ConversationId("conv-1".to_string()),
            ConversationContext::initial_demo(),
            "triage_agent",
        );

        assert_eq!(session.active_agent, "triage_agent");
        assert!(session.transcript.is_empty());
        assert_eq!(session.created_at, session.updated_at);
    }
}
