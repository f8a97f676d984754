use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ModelClient, ModelError, ModelRequest, ModelResponse};
use crate::registry::AgentKind;

/// Replays a fixed queue of responses and records which agent asked for
/// each one. Lets tests force model behaviour the offline policy never
/// produces, such as a handoff the graph does not allow.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<ModelResponse>>,
    requests: Mutex<Vec<AgentKind>>,
}

impl ScriptedModel {
    pub fn new(responses: impl IntoIterator<Item = ModelResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Agents that invoked the model, in call order.
    pub fn requested_agents(&self) -> Vec<AgentKind> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn remaining(&self) -> usize {
        match self.responses.lock() {
            Ok(responses) => responses.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn respond(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        match self.requests.lock() {
            Ok(mut requests) => requests.push(request.agent),
            Err(poisoned) => poisoned.into_inner().push(request.agent),
        }

        let next = match self.responses.lock() {
            Ok(mut responses) => responses.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        next.ok_or(ModelError::Exhausted)
    }
}
