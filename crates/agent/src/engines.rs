use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::runtime::{EngineDeps, TurnError, TurnOrchestrator};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub closed: Vec<String>,
    pub abandoned: Vec<String>,
}

/// Process-wide cache of turn orchestrators keyed by app namespace.
///
/// Engines are created on first lookup and live until [`EngineRegistry::shutdown`],
/// after which lookups fail with [`TurnError::Closed`].
pub struct EngineRegistry {
    deps: EngineDeps,
    engines: RwLock<HashMap<String, Arc<TurnOrchestrator>>>,
    shut_down: AtomicBool,
}

impl EngineRegistry {
    pub fn new(deps: EngineDeps) -> Self {
        Self { deps, engines: RwLock::new(HashMap::new()), shut_down: AtomicBool::new(false) }
    }

    pub async fn get_or_create(&self, app_name: &str) -> Result<Arc<TurnOrchestrator>, TurnError> {
        if let Some(engine) = self.engines.read().await.get(app_name) {
            return Ok(Arc::clone(engine));
        }

        let mut engines = self.engines.write().await;
        if self.shut_down.load(Ordering::Acquire) {
            return Err(TurnError::Closed);
        }
        let engine = engines.entry(app_name.to_string()).or_insert_with(|| {
            info!(
                event_name = "engine.created",
                correlation_id = "engine-registry",
                app_name,
                model = self.deps.model.name(),
                "turn engine created"
            );
            Arc::new(TurnOrchestrator::new(app_name, self.deps.clone()))
        });
        Ok(Arc::clone(engine))
    }

    pub async fn len(&self) -> usize {
        self.engines.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.engines.read().await.is_empty()
    }

    /// Closes every engine concurrently. Engines still draining when `grace`
    /// elapses are abandoned and left to the runtime teardown.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        let engines: Vec<Arc<TurnOrchestrator>> = {
            let mut engines = self.engines.write().await;
            self.shut_down.store(true, Ordering::Release);
            engines.drain().map(|(_, engine)| engine).collect()
        };
        let mut pending: Vec<String> =
            engines.iter().map(|engine| engine.app_name().to_string()).collect();

        let mut closing = JoinSet::new();
        for engine in engines {
            closing.spawn(async move {
                engine.close().await;
                engine.app_name().to_string()
            });
        }

        let mut report = ShutdownReport::default();
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = closing.join_next().await {
                if let Ok(name) = joined {
                    pending.retain(|candidate| candidate != &name);
                    report.closed.push(name);
                }
            }
        })
        .await;

        if drained.is_err() {
            for name in &pending {
                warn!(
                    event_name = "engine.release_abandoned",
                    correlation_id = "shutdown",
                    app_name = %name,
                    grace_secs = grace.as_secs(),
                    "engine did not drain within the grace period"
                );
            }
            closing.abort_all();
        }
        report.abandoned = pending;

        info!(
            event_name = "engine.shutdown_complete",
            correlation_id = "shutdown",
            closed = report.closed.len(),
            abandoned = report.abandoned.len(),
            "engine registry shut down"
        );
        report
    }
}
