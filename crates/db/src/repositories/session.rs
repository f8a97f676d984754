use chrono::{DateTime, Utc};
use sqlx::Row;

use concierge_core::domain::context::ConversationContext;
use concierge_core::domain::session::{ConversationId, Session, TranscriptItem};

use super::{RepositoryError, SessionRepository};
use crate::DbPool;

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<Session, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let active_agent: String =
        row.try_get("active_agent").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let context_json: String =
        row.try_get("context_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let transcript_json: String =
        row.try_get("transcript_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at_str: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at_str: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let context: ConversationContext = serde_json::from_str(&context_json)
        .map_err(|e| RepositoryError::Decode(format!("context_json: {e}")))?;
    let transcript: Vec<TranscriptItem> = serde_json::from_str(&transcript_json)
        .map_err(|e| RepositoryError::Decode(format!("transcript_json: {e}")))?;

    Ok(Session {
        id: ConversationId(id),
        context,
        active_agent,
        transcript,
        created_at: parse_timestamp(&created_at_str, "created_at")?,
        updated_at: parse_timestamp(&updated_at_str, "updated_at")?,
    })
}

fn encode(session: &Session) -> Result<(String, String), RepositoryError> {
    let context_json = serde_json::to_string(&session.context)
        .map_err(|e| RepositoryError::Decode(format!("context_json: {e}")))?;
    let transcript_json = serde_json::to_string(&session.transcript)
        .map_err(|e| RepositoryError::Decode(format!("transcript_json: {e}")))?;
    Ok((context_json, transcript_json))
}

#[async_trait::async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn find(&self, id: &ConversationId) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, active_agent, context_json, transcript_json, created_at, updated_at
             FROM conversation_session WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_session(r)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, session: Session) -> Result<(), RepositoryError> {
        let (context_json, transcript_json) = encode(&session)?;

        let result = sqlx::query(
            "INSERT INTO conversation_session
                 (id, active_agent, context_json, transcript_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id.0)
        .bind(&session.active_agent)
        .bind(&context_json)
        .bind(&transcript_json)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(RepositoryError::Conflict(session.id))
            }
            Err(other) => Err(other.into()),
        }
    }

    async fn save(&self, session: Session) -> Result<(), RepositoryError> {
        let (context_json, transcript_json) = encode(&session)?;

        sqlx::query(
            "INSERT INTO conversation_session
                 (id, active_agent, context_json, transcript_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 active_agent = excluded.active_agent,
                 context_json = excluded.context_json,
                 transcript_json = excluded.transcript_json,
                 updated_at = excluded.updated_at",
        )
        .bind(&session.id.0)
        .bind(&session.active_agent)
        .bind(&context_json)
        .bind(&transcript_json)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversation_session")
            .fetch_one(&self.pool)
            .await?;
        u64::try_from(count).map_err(|e| RepositoryError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use concierge_core::domain::context::{ContextField, ConversationContext};
    use concierge_core::domain::session::{ConversationId, Session, TranscriptItem};

    use super::SqlSessionRepository;
    use crate::repositories::{RepositoryError, SessionRepository};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> SqlSessionRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlSessionRepository::new(pool)
    }

    #[tokio::test]
    async fn session_round_trips_context_and_transcript() {
        let repo = setup().await;
        let mut session = Session::start(
            ConversationId("conv-sql-1".to_string()),
            ConversationContext::initial_demo(),
            "triage_agent",
        );
        repo.create(session.clone()).await.expect("create");

        session.active_agent = "seat_booking_agent".to_string();
        session.context.set(ContextField::SeatNumber, "23C");
        session.transcript.push(TranscriptItem::User { content: "change my seat".to_string() });
        session.transcript.push(TranscriptItem::ToolCall {
            agent: "seat_booking_agent".to_string(),
            call_id: "call-1".to_string(),
            name: "update_seat".to_string(),
            arguments: json!({ "new_seat": "23C" }),
        });
        session.touch();
        repo.save(session.clone()).await.expect("save");

        let found = repo.find(&session.id).await.expect("find").expect("session exists");
        assert_eq!(found.active_agent, "seat_booking_agent");
        assert_eq!(found.context, session.context);
        assert_eq!(found.transcript, session.transcript);
        assert_eq!(repo.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn duplicate_create_is_a_conflict() {
        let repo = setup().await;
        let session = Session::start(
            ConversationId("conv-sql-2".to_string()),
            ConversationContext::default(),
            "triage_agent",
        );
        repo.create(session.clone()).await.expect("create");

        let error = repo.create(session).await.expect_err("second create conflicts");
        assert!(matches!(error, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn missing_session_is_none() {
        let repo = setup().await;
        let found = repo.find(&ConversationId("nope".to_string())).await.expect("find");
        assert!(found.is_none());
    }
}
