use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use concierge_db::SessionRepository;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    sessions: Arc<dyn SessionRepository>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub session_store: HealthCheck,
    pub checked_at: String,
}

pub fn router(sessions: Arc<dyn SessionRepository>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { sessions })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let session_store = session_store_check(state.sessions.as_ref()).await;
    let ready = session_store.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "concierge-server runtime initialized".to_string(),
        },
        session_store,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn session_store_check(sessions: &dyn SessionRepository) -> HealthCheck {
    match sessions.count().await {
        Ok(count) => HealthCheck {
            status: "ready",
            detail: format!("session store reachable ({count} sessions)"),
        },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("session store probe failed: {error}") }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, Json};
    use concierge_db::{
        connect_with_settings, migrations, InMemorySessionRepository, SqlSessionRepository,
    };

    use crate::health::{health, HealthState};

    #[tokio::test]
    async fn health_returns_ready_for_the_in_memory_store() {
        let state = HealthState { sessions: Arc::new(InMemorySessionRepository::default()) };

        let (status, Json(payload)) = health(State(state)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.session_store.status, "ready");
        assert_eq!(payload.service.status, "ready");
    }

    #[tokio::test]
    async fn health_returns_ready_when_database_is_reachable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let state = HealthState { sessions: Arc::new(SqlSessionRepository::new(pool.clone())) };
        let (status, Json(payload)) = health(State(state)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.session_store.status, "ready");

        pool.close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool.close().await;

        let state = HealthState { sessions: Arc::new(SqlSessionRepository::new(pool)) };
        let (status, Json(payload)) = health(State(state)).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.session_store.status, "degraded");
        assert_eq!(payload.service.status, "ready");
    }
}
