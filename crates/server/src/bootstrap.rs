use std::sync::Arc;

use concierge_agent::{client_for, EngineDeps, EngineRegistry, ModelError, OrchestratorSettings};
use concierge_core::config::{AppConfig, ConfigError};
use concierge_db::{
    connect_with_settings, migrations, DbPool, InMemorySessionRepository, SessionRepository,
    SqlSessionRepository,
};
use thiserror::Error;
use tracing::info;

use crate::audit::TracingAuditSink;

pub struct Application {
    pub config: AppConfig,
    pub sessions: Arc<dyn SessionRepository>,
    pub engines: Arc<EngineRegistry>,
    /// `None` when the in-process session store is configured.
    pub db_pool: Option<DbPool>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("model client initialization failed: {0}")]
    Model(#[source] ModelError),
}

#[cfg(test)]
pub async fn bootstrap(
    options: concierge_core::config::LoadOptions,
) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        conversation_id = "unknown",
        "starting application bootstrap"
    );

    let (sessions, db_pool): (Arc<dyn SessionRepository>, Option<DbPool>) =
        if config.database.is_in_memory_store() {
            info!(
                event_name = "system.bootstrap.session_store",
                correlation_id = "bootstrap",
                conversation_id = "unknown",
                store = "memory",
                "using in-process session store"
            );
            (Arc::new(InMemorySessionRepository::default()), None)
        } else {
            let pool = connect_with_settings(
                &config.database.url,
                config.database.max_connections,
                config.database.timeout_secs,
            )
            .await
            .map_err(BootstrapError::DatabaseConnect)?;
            info!(
                event_name = "system.bootstrap.database_connected",
                correlation_id = "bootstrap",
                conversation_id = "unknown",
                "database connection established"
            );

            migrations::run_pending(&pool).await.map_err(BootstrapError::Migration)?;
            info!(
                event_name = "system.bootstrap.migrations_applied",
                correlation_id = "bootstrap",
                conversation_id = "unknown",
                "database migrations applied"
            );
            (Arc::new(SqlSessionRepository::new(pool.clone())), Some(pool))
        };

    let model = client_for(&config.llm).map_err(BootstrapError::Model)?;
    info!(
        event_name = "system.bootstrap.model_ready",
        correlation_id = "bootstrap",
        conversation_id = "unknown",
        model = model.name(),
        "model client initialized"
    );

    let engines = Arc::new(EngineRegistry::new(EngineDeps {
        model,
        sessions: Arc::clone(&sessions),
        audit: Arc::new(TracingAuditSink),
        settings: OrchestratorSettings::from_config(&config.agent),
    }));

    Ok(Application { config, sessions, engines, db_pool })
}
