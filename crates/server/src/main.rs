mod audit;
mod bootstrap;
mod chat;
mod health;

use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, Method};
use axum::Router;
use concierge_core::config::{AppConfig, LoadOptions, ServerConfig};
use tower_http::cors::{AllowOrigin, CorsLayer};

fn init_logging(config: &AppConfig) {
    use concierge_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

fn cors(server: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = server
        .allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let routes = Router::new()
        .merge(chat::router(app.engines.clone(), app.config.agent.app_name.clone()))
        .merge(health::router(app.sessions.clone()))
        .layer(cors(&app.config.server));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("could not bind {address}"))?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        conversation_id = "unknown",
        bind_address = %address,
        app_name = %app.config.agent.app_name,
        "concierge-server listening"
    );
    axum::serve(listener, routes).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        conversation_id = "unknown",
        "concierge-server draining engines"
    );
    let report =
        app.engines.shutdown(Duration::from_secs(app.config.server.graceful_shutdown_secs)).await;
    if let Some(pool) = app.db_pool {
        pool.close().await;
    }
    tracing::info!(
        event_name = "system.server.stopped",
        correlation_id = "shutdown",
        conversation_id = "unknown",
        closed = report.closed.len(),
        abandoned = report.abandoned.len(),
        "concierge-server stopped"
    );

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            conversation_id = "unknown",
            error = %error,
            "could not listen for ctrl-c; shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        Router,
    };
    use concierge_core::config::AppConfig;
    use concierge_db::InMemorySessionRepository;
    use std::sync::Arc;
    use tower::ServiceExt;

    use super::cors;
    use crate::health;

    #[tokio::test]
    async fn cors_echoes_allowed_origins_only() {
        let config = AppConfig::default();
        let app = Router::new()
            .merge(health::router(Arc::new(InMemorySessionRepository::default())))
            .layer(cors(&config.server));

        let allowed = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(header::ORIGIN, "http://localhost:3000")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(allowed.status(), StatusCode::OK);
        assert_eq!(
            allowed.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).map(|v| v.as_bytes()),
            Some(&b"http://localhost:3000"[..])
        );

        let foreign = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(header::ORIGIN, "http://evil.example")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert!(foreign.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }
}
