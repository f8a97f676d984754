use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use concierge_agent::{EngineRegistry, TurnError, TurnRequest, TurnResponse};
use concierge_core::errors::{ApplicationError, InterfaceError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct ChatState {
    engines: Arc<EngineRegistry>,
    app_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatError {
    pub error: String,
    pub correlation_id: String,
}

pub fn router(engines: Arc<EngineRegistry>, app_name: impl Into<String>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .with_state(ChatState { engines, app_name: app_name.into() })
}

pub async fn chat(
    State(state): State<ChatState>,
    Json(request): Json<TurnRequest>,
) -> Result<Json<TurnResponse>, (StatusCode, Json<ChatError>)> {
    let correlation_id = format!("req-{}", Uuid::new_v4());
    info!(
        event_name = "chat.request.received",
        correlation_id = %correlation_id,
        conversation_id = request.conversation_id.as_deref().unwrap_or("new"),
        "chat request received"
    );

    let engine =
        state.engines.get_or_create(&state.app_name).await.map_err(|e| reject(e, &correlation_id))?;
    let response =
        engine.handle(request, &correlation_id).await.map_err(|e| reject(e, &correlation_id))?;

    Ok(Json(response))
}

fn reject(error: TurnError, correlation_id: &str) -> (StatusCode, Json<ChatError>) {
    let detail = error.to_string();
    let interface = ApplicationError::from(error).into_interface(correlation_id);
    let status = match &interface {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(
        event_name = "chat.request.failed",
        correlation_id,
        status = status.as_u16(),
        error = %detail,
        "chat request failed"
    );

    (
        status,
        Json(ChatError {
            error: interface.user_message().to_string(),
            correlation_id: interface.correlation_id().to_string(),
        }),
    )
}
