//! PostgreSQL implementation of [`MessageStore`].
//!
//! The terminal transition in [`finalize`](MessageStore::finalize) is a
//! compare-and-set: `UPDATE … WHERE id = $1 AND status = 'streaming'`, so a
//! replayed completion or a late error after cancellation affects zero rows.
//! Ordering relies on the `(session_id, created_at ASC)` index.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::domain::foundation::{CoreError, MessageId, SessionId, Timestamp, UserId};
use crate::domain::message::{Message, MessageError, MessageMetadata, MessageRole, MessageStatus};
use crate::ports::MessageStore;

/// PostgreSQL message store.
#[derive(Clone)]
pub struct PostgresMessageStore {
    pool: PgPool,
}

impl PostgresMessageStore {
    /// Creates a new PostgresMessageStore.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn storage_error(context: &str, e: impl std::fmt::Display) -> CoreError {
    CoreError::storage(format!("{}: {}", context, e))
}

fn role_to_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::System => "system",
        MessageRole::Summary => "summary",
    }
}

fn role_from_str(s: &str) -> Result<MessageRole, CoreError> {
    match s {
        "user" => Ok(MessageRole::User),
        "assistant" => Ok(MessageRole::Assistant),
        "system" => Ok(MessageRole::System),
        "summary" => Ok(MessageRole::Summary),
        other => Err(CoreError::storage(format!("Unknown message role: {}", other))),
    }
}

fn status_to_str(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Pending => "pending",
        MessageStatus::Streaming => "streaming",
        MessageStatus::Completed => "completed",
        MessageStatus::Error => "error",
        MessageStatus::Cancelled => "cancelled",
    }
}

fn status_from_str(s: &str) -> Result<MessageStatus, CoreError> {
    match s {
        "pending" => Ok(MessageStatus::Pending),
        "streaming" => Ok(MessageStatus::Streaming),
        "completed" => Ok(MessageStatus::Completed),
        "error" => Ok(MessageStatus::Error),
        "cancelled" => Ok(MessageStatus::Cancelled),
        other => Err(CoreError::storage(format!(
            "Unknown message status: {}",
            other
        ))),
    }
}

fn row_to_message(row: sqlx::postgres::PgRow) -> Result<Message, CoreError> {
    let id: uuid::Uuid = row.get("id");
    let session_id: uuid::Uuid = row.get("session_id");
    let user_id: String = row.get("user_id");
    let role: String = row.get("role");
    let content: String = row.get("content");
    let metadata: serde_json::Value = row.get("metadata");
    let status: String = row.get("status");
    let error: Option<serde_json::Value> = row.get("error");
    let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");

    let metadata: MessageMetadata = serde_json::from_value(metadata)
        .map_err(|e| storage_error("Corrupt message metadata", e))?;
    let error: Option<MessageError> = error
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| storage_error("Corrupt message error", e))?;

    Ok(Message::reconstitute(
        MessageId::from_uuid(id),
        SessionId::from_uuid(session_id),
        UserId::new(user_id).map_err(|e| storage_error("Corrupt message owner", e))?,
        role_from_str(&role)?,
        content,
        metadata,
        status_from_str(&status)?,
        error,
        Timestamp::from_datetime(created_at),
    ))
}

#[async_trait]
impl MessageStore for PostgresMessageStore {
    async fn insert(&self, message: &Message) -> Result<(), CoreError> {
        let metadata = serde_json::to_value(message.metadata())
            .map_err(|e| storage_error("Failed to encode metadata", e))?;
        let error = message
            .error()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| storage_error("Failed to encode error", e))?;

        sqlx::query(
            r#"
            INSERT INTO messages (
                id, session_id, user_id, role, content, metadata, status,
                error, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(message.id().as_uuid())
        .bind(message.session_id().as_uuid())
        .bind(message.user_id().as_str())
        .bind(role_to_str(message.role()))
        .bind(message.content())
        .bind(metadata)
        .bind(status_to_str(message.status()))
        .bind(error)
        .bind(message.created_at().as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to insert message", e))?;

        Ok(())
    }

    async fn find_by_session(
        &self,
        session_id: &SessionId,
        limit: Option<u32>,
    ) -> Result<Vec<Message>, CoreError> {
        // With a limit, keep the newest N but return them ascending.
        let rows = match limit {
            Some(limit) => sqlx::query(
                r#"
                SELECT * FROM (
                    SELECT id, session_id, user_id, role, content, metadata,
                           status, error, created_at
                    FROM messages
                    WHERE session_id = $1
                    ORDER BY created_at DESC
                    LIMIT $2
                ) newest
                ORDER BY created_at ASC
                "#,
            )
            .bind(session_id.as_uuid())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await,
            None => sqlx::query(
                r#"
                SELECT id, session_id, user_id, role, content, metadata,
                       status, error, created_at
                FROM messages
                WHERE session_id = $1
                ORDER BY created_at ASC
                "#,
            )
            .bind(session_id.as_uuid())
            .fetch_all(&self.pool)
            .await,
        }
        .map_err(|e| storage_error("Failed to fetch messages", e))?;

        rows.into_iter().map(row_to_message).collect()
    }

    async fn find(&self, id: &MessageId) -> Result<Option<Message>, CoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, session_id, user_id, role, content, metadata, status,
                   error, created_at
            FROM messages
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to fetch message", e))?;

        row.map(row_to_message).transpose()
    }

    async fn finalize(&self, message: &Message) -> Result<bool, CoreError> {
        let metadata = serde_json::to_value(message.metadata())
            .map_err(|e| storage_error("Failed to encode metadata", e))?;
        let error = message
            .error()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| storage_error("Failed to encode error", e))?;

        let result = sqlx::query(
            r#"
            UPDATE messages SET
                content = $2,
                metadata = $3,
                status = $4,
                error = $5
            WHERE id = $1 AND status = 'streaming'
            "#,
        )
        .bind(message.id().as_uuid())
        .bind(message.content())
        .bind(metadata)
        .bind(status_to_str(message.status()))
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to finalize message", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, ids: &[MessageId]) -> Result<u64, CoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let uuids: Vec<uuid::Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();

        let result = sqlx::query("DELETE FROM messages WHERE id = ANY($1)")
            .bind(&uuids)
            .execute(&self.pool)
            .await
            .map_err(|e| storage_error("Failed to delete messages", e))?;

        Ok(result.rows_affected())
    }

    async fn delete_by_session(
        &self,
        session_id: &SessionId,
        keep_system: bool,
    ) -> Result<u64, CoreError> {
        let result = if keep_system {
            sqlx::query("DELETE FROM messages WHERE session_id = $1 AND role <> 'system'")
                .bind(session_id.as_uuid())
                .execute(&self.pool)
                .await
        } else {
            sqlx::query("DELETE FROM messages WHERE session_id = $1")
                .bind(session_id.as_uuid())
                .execute(&self.pool)
                .await
        }
        .map_err(|e| storage_error("Failed to clear session messages", e))?;

        Ok(result.rows_affected())
    }

    async fn count_by_role(
        &self,
        session_id: &SessionId,
        role: MessageRole,
    ) -> Result<u64, CoreError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM messages WHERE session_id = $1 AND role = $2",
        )
        .bind(session_id.as_uuid())
        .bind(role_to_str(role))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to count messages", e))?;

        Ok(count.0 as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_and_status_mappings_round_trip() {
        for role in [
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::System,
            MessageRole::Summary,
        ] {
            assert_eq!(role_from_str(role_to_str(role)).unwrap(), role);
        }
        for status in [
            MessageStatus::Pending,
            MessageStatus::Streaming,
            MessageStatus::Completed,
            MessageStatus::Error,
            MessageStatus::Cancelled,
        ] {
            assert_eq!(status_from_str(status_to_str(status)).unwrap(), status);
        }
    }

    #[test]
    fn unknown_labels_are_storage_errors() {
        assert!(role_from_str("moderator").is_err());
        assert!(status_from_str("queued").is_err());
    }
}
