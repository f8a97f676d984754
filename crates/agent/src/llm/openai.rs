//! Chat-completions client for OpenAI and any endpoint speaking the same
//! wire format (Ollama, LM Studio, vLLM).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use concierge_core::config::LlmConfig;
use concierge_core::domain::session::TranscriptItem;

use super::{HandoffOption, ModelClient, ModelError, ModelRequest, ModelResponse, ToolCallRequest};
use crate::router::TRANSFER_TOOL_NAME;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const TRANSFER_PREFIX: &str = "transfer_to_";

pub struct OpenAiCompatibleClient {
    http: HttpClient,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f32,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, ModelError> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("concierge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| ModelError::Configuration(error.to_string()))?;

        let base = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        Ok(Self {
            http,
            endpoint: completions_endpoint(base),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatibleClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn respond(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        let body = OpenAiRequest {
            model: &self.model,
            messages: wire_messages(request),
            tools: wire_tools(request),
            temperature: self.temperature,
        };

        let mut call = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key.expose_secret());
        }

        let response =
            call.send().await.map_err(|error| ModelError::Transport(error.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let text = response
                    .text()
                    .await
                    .map_err(|error| ModelError::Transport(error.to_string()))?;
                let decoded: OpenAiResponse = serde_json::from_str(&text)
                    .map_err(|error| ModelError::Decode(error.to_string()))?;
                interpret(decoded)
            }
            StatusCode::UNAUTHORIZED => Err(ModelError::Status {
                status: 401,
                message: "authentication failed, check the API key".to_string(),
            }),
            StatusCode::TOO_MANY_REQUESTS => Err(ModelError::Status {
                status: 429,
                message: "rate limit exceeded".to_string(),
            }),
            status => {
                let error_body: Option<Value> = response.json().await.ok();
                let message = error_body
                    .as_ref()
                    .and_then(|body| body.get("error").and_then(|error| error.get("message")))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                Err(ModelError::Status { status: status.as_u16(), message })
            }
        }
    }
}

fn completions_endpoint(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OpenAiTool>,
    temperature: f32,
}

#[derive(Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    type_: &'static str,
    function: OpenAiFunction,
}

#[derive(Serialize)]
struct OpenAiFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize, Serialize)]
struct OpenAiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl OpenAiMessage {
    fn text(role: &str, content: impl Into<String>) -> Self {
        Self { role: role.to_string(), content: Some(content.into()), tool_calls: None, tool_call_id: None }
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    type_: String,
    function: OpenAiToolFunction,
}

#[derive(Debug, Deserialize, Serialize)]
struct OpenAiToolFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

fn function_type() -> String {
    "function".to_string()
}

fn wire_messages(request: &ModelRequest) -> Vec<OpenAiMessage> {
    let mut messages = vec![OpenAiMessage::text("system", request.system_prompt.clone())];

    for item in &request.transcript {
        match item {
            TranscriptItem::User { content } => messages.push(OpenAiMessage::text("user", content.clone())),
            TranscriptItem::Assistant { content, .. } => {
                messages.push(OpenAiMessage::text("assistant", content.clone()));
            }
            TranscriptItem::ToolCall { call_id, name, arguments, .. } => {
                let call = OpenAiToolCall {
                    id: call_id.clone(),
                    type_: function_type(),
                    function: OpenAiToolFunction { name: name.clone(), arguments: arguments.to_string() },
                };
                // Parallel calls from one step share a single assistant message.
                let open_batch = messages
                    .last_mut()
                    .filter(|message| message.role == "assistant" && message.content.is_none())
                    .and_then(|message| message.tool_calls.as_mut());
                if let Some(calls) = open_batch {
                    calls.push(call);
                } else {
                    messages.push(OpenAiMessage {
                        role: "assistant".to_string(),
                        content: None,
                        tool_calls: Some(vec![call]),
                        tool_call_id: None,
                    });
                }
            }
            TranscriptItem::ToolResult { call_id, output, .. } => messages.push(OpenAiMessage {
                role: "tool".to_string(),
                content: Some(match output {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                }),
                tool_calls: None,
                tool_call_id: Some(call_id.clone()),
            }),
            TranscriptItem::Handoff { from, to } => messages.push(OpenAiMessage::text(
                "system",
                format!("The conversation was transferred from {from} to {to}."),
            )),
        }
    }

    messages
}

fn wire_tools(request: &ModelRequest) -> Vec<OpenAiTool> {
    let tools = request.tools.iter().map(|tool| OpenAiTool {
        type_: "function",
        function: OpenAiFunction {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        },
    });
    tools.chain(request.handoffs.iter().map(transfer_tool)).collect()
}

fn transfer_tool(option: &HandoffOption) -> OpenAiTool {
    OpenAiTool {
        type_: "function",
        function: OpenAiFunction {
            name: format!("{TRANSFER_PREFIX}{}", option.name),
            description: format!(
                "Handoff to the {} agent to handle the request. {}",
                option.name, option.description
            ),
            parameters: json!({ "type": "object", "properties": {}, "required": [] }),
        },
    }
}

fn interpret(response: OpenAiResponse) -> Result<ModelResponse, ModelError> {
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| ModelError::Decode("response contained no choices".to_string()))?;

    let calls = message.tool_calls.unwrap_or_default();
    if calls.is_empty() {
        return Ok(ModelResponse::Text(message.content.unwrap_or_default()));
    }

    if let Some(transfer) = calls.iter().find(|call| is_transfer(&call.function.name)) {
        let target = transfer
            .function
            .name
            .strip_prefix(TRANSFER_PREFIX)
            .unwrap_or(&transfer.function.name)
            .to_string();
        return Ok(ModelResponse::Handoff { call_id: transfer.id.clone(), target });
    }

    calls
        .into_iter()
        .map(|call| {
            let arguments = if call.function.arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&call.function.arguments).map_err(|error| {
                    ModelError::Decode(format!(
                        "arguments for `{}` are not JSON: {error}",
                        call.function.name
                    ))
                })?
            };
            Ok(ToolCallRequest { call_id: call.id, name: call.function.name, arguments })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(ModelResponse::ToolCalls)
}

fn is_transfer(name: &str) -> bool {
    name == TRANSFER_TOOL_NAME || name.starts_with(TRANSFER_PREFIX)
}
