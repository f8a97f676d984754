use async_trait::async_trait;
use thiserror::Error;

use concierge_core::domain::session::{ConversationId, Session};

pub mod memory;
pub mod session;

pub use memory::InMemorySessionRepository;
pub use session::SqlSessionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("session `{0}` already exists")]
    Conflict(ConversationId),
}

/// Durable storage for conversation sessions.
///
/// `save` replaces the whole record, so context and active agent are always
/// written together.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find(&self, id: &ConversationId) -> Result<Option<Session>, RepositoryError>;

    /// Inserts a brand new session; fails with [`RepositoryError::Conflict`]
    /// if the id is already taken.
    async fn create(&self, session: Session) -> Result<(), RepositoryError>;

    async fn save(&self, session: Session) -> Result<(), RepositoryError>;

    async fn count(&self) -> Result<u64, RepositoryError>;
}
