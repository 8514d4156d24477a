//! PostgreSQL implementation of [`SessionStore`].
//!
//! Required indices: `sessions.session_id` unique (primary key),
//! `(user_id, last_activity_at DESC)` for listings, and the TTL sweep runs
//! over `last_activity_at`.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::domain::foundation::{CoreError, SessionId, Timestamp, UserId};
use crate::domain::session::{Session, SessionContext, SessionSettings};
use crate::ports::SessionStore;

/// PostgreSQL session store.
#[derive(Clone)]
pub struct PostgresSessionStore {
    pool: PgPool,
}

impl PostgresSessionStore {
    /// Creates a new PostgresSessionStore.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn storage_error(context: &str, e: impl std::fmt::Display) -> CoreError {
    CoreError::storage(format!("{}: {}", context, e))
}

fn row_to_session(row: sqlx::postgres::PgRow) -> Result<Session, CoreError> {
    let session_id: uuid::Uuid = row.get("session_id");
    let user_id: String = row.get("user_id");
    let title: String = row.get("title");
    let provider: String = row.get("provider");
    let model: Option<String> = row.get("model");
    let system_prompt: Option<String> = row.get("system_prompt");
    let settings: serde_json::Value = row.get("settings");
    let context: serde_json::Value = row.get("context");
    let is_active: bool = row.get("is_active");
    let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");
    let last_activity_at: chrono::DateTime<chrono::Utc> = row.get("last_activity_at");

    let settings: SessionSettings = serde_json::from_value(settings)
        .map_err(|e| storage_error("Corrupt session settings", e))?;
    let context: SessionContext =
        serde_json::from_value(context).map_err(|e| storage_error("Corrupt session context", e))?;

    Ok(Session::reconstitute(
        SessionId::from_uuid(session_id),
        UserId::new(user_id).map_err(|e| storage_error("Corrupt session owner", e))?,
        title,
        provider,
        model,
        system_prompt,
        settings,
        context,
        is_active,
        Timestamp::from_datetime(created_at),
        Timestamp::from_datetime(last_activity_at),
    ))
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn create(&self, session: &Session) -> Result<(), CoreError> {
        let settings = serde_json::to_value(session.settings())
            .map_err(|e| storage_error("Failed to encode settings", e))?;
        let context = serde_json::to_value(session.context())
            .map_err(|e| storage_error("Failed to encode context", e))?;

        sqlx::query(
            r#"
            INSERT INTO sessions (
                session_id, user_id, title, provider, model, system_prompt,
                settings, context, is_active, created_at, last_activity_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(session.id().as_uuid())
        .bind(session.user_id().as_str())
        .bind(session.title())
        .bind(session.provider())
        .bind(session.model())
        .bind(session.system_prompt())
        .bind(settings)
        .bind(context)
        .bind(session.is_active())
        .bind(session.created_at().as_datetime())
        .bind(session.last_activity_at().as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to insert session", e))?;

        Ok(())
    }

    async fn update(&self, session: &Session) -> Result<(), CoreError> {
        let settings = serde_json::to_value(session.settings())
            .map_err(|e| storage_error("Failed to encode settings", e))?;
        let context = serde_json::to_value(session.context())
            .map_err(|e| storage_error("Failed to encode context", e))?;

        let result = sqlx::query(
            r#"
            UPDATE sessions SET
                title = $2,
                provider = $3,
                model = $4,
                system_prompt = $5,
                settings = $6,
                context = $7,
                is_active = $8,
                last_activity_at = $9
            WHERE session_id = $1
            "#,
        )
        .bind(session.id().as_uuid())
        .bind(session.title())
        .bind(session.provider())
        .bind(session.model())
        .bind(session.system_prompt())
        .bind(settings)
        .bind(context)
        .bind(session.is_active())
        .bind(session.last_activity_at().as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to update session", e))?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found(format!(
                "Session not found: {}",
                session.id()
            )));
        }

        Ok(())
    }

    async fn find(&self, id: &SessionId) -> Result<Option<Session>, CoreError> {
        let row = sqlx::query(
            r#"
            SELECT session_id, user_id, title, provider, model, system_prompt,
                   settings, context, is_active, created_at, last_activity_at
            FROM sessions
            WHERE session_id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to fetch session", e))?;

        row.map(row_to_session).transpose()
    }

    async fn find_by_user(
        &self,
        user_id: &UserId,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Session>, u64), CoreError> {
        let total: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sessions WHERE user_id = $1")
                .bind(user_id.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| storage_error("Failed to count sessions", e))?;

        let rows = sqlx::query(
            r#"
            SELECT session_id, user_id, title, provider, model, system_prompt,
                   settings, context, is_active, created_at, last_activity_at
            FROM sessions
            WHERE user_id = $1
            ORDER BY last_activity_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id.as_str())
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to list sessions", e))?;

        let sessions = rows
            .into_iter()
            .map(row_to_session)
            .collect::<Result<Vec<_>, _>>()?;

        Ok((sessions, total.0 as u64))
    }

    async fn deactivate_expired(&self, ttl_days: u32, now: Timestamp) -> Result<u64, CoreError> {
        let horizon = now.minus_days(ttl_days as i64);

        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET is_active = FALSE
            WHERE is_active = TRUE AND last_activity_at < $1
            "#,
        )
        .bind(horizon.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to expire sessions", e))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    // Postgres integration tests require a running database and are run
    // separately; the behavioural contract is exercised against the
    // in-memory adapter in `adapters::memory`.
}
