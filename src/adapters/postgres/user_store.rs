//! PostgreSQL implementation of [`UserStore`].
//!
//! Preferences, usage, and quotas are stored as JSONB documents; the daily
//! counters are updated through a read-modify-write inside a transaction with
//! `FOR UPDATE`, giving the compare-and-increment the orchestrator relies on.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::domain::foundation::{CoreError, Role, Timestamp, UserId};
use crate::domain::user::{User, UserPreferences, UserQuotas, UserUsage};
use crate::ports::UserStore;

/// PostgreSQL user store.
#[derive(Clone)]
pub struct PostgresUserStore {
    pool: PgPool,
}

impl PostgresUserStore {
    /// Creates a new PostgresUserStore.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn storage_error(context: &str, e: impl std::fmt::Display) -> CoreError {
    CoreError::storage(format!("{}: {}", context, e))
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Admin => "admin",
    }
}

fn role_from_str(s: &str) -> Role {
    match s {
        "admin" => Role::Admin,
        _ => Role::User,
    }
}

fn row_to_user(row: sqlx::postgres::PgRow) -> Result<User, CoreError> {
    let id: String = row.get("id");
    let role: String = row.get("role");
    let preferences: serde_json::Value = row.get("preferences");
    let usage: serde_json::Value = row.get("usage");
    let quotas: serde_json::Value = row.get("quotas");

    let preferences: UserPreferences = serde_json::from_value(preferences)
        .map_err(|e| storage_error("Corrupt user preferences", e))?;
    let usage: UserUsage =
        serde_json::from_value(usage).map_err(|e| storage_error("Corrupt user usage", e))?;
    let quotas: UserQuotas =
        serde_json::from_value(quotas).map_err(|e| storage_error("Corrupt user quotas", e))?;

    Ok(User::reconstitute(
        UserId::new(id).map_err(|e| storage_error("Corrupt user id", e))?,
        role_from_str(&role),
        preferences,
        usage,
        quotas,
    ))
}

#[async_trait]
impl UserStore for PostgresUserStore {
    async fn find(&self, id: &UserId) -> Result<Option<User>, CoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, role, preferences, usage, quotas
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to fetch user", e))?;

        row.map(row_to_user).transpose()
    }

    async fn upsert(&self, user: &User) -> Result<(), CoreError> {
        let preferences = serde_json::to_value(user.preferences())
            .map_err(|e| storage_error("Failed to encode preferences", e))?;
        let usage = serde_json::to_value(user.usage())
            .map_err(|e| storage_error("Failed to encode usage", e))?;
        let quotas = serde_json::to_value(user.quotas())
            .map_err(|e| storage_error("Failed to encode quotas", e))?;

        sqlx::query(
            r#"
            INSERT INTO users (id, role, preferences, usage, quotas)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                role = EXCLUDED.role,
                preferences = EXCLUDED.preferences,
                usage = EXCLUDED.usage,
                quotas = EXCLUDED.quotas
            "#,
        )
        .bind(user.id().as_str())
        .bind(role_to_str(user.role()))
        .bind(preferences)
        .bind(usage)
        .bind(quotas)
        .execute(&self.pool)
        .await
        .map_err(|e| storage_error("Failed to upsert user", e))?;

        Ok(())
    }

    async fn record_turn(
        &self,
        id: &UserId,
        tokens: u64,
        now: Timestamp,
    ) -> Result<(), CoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage_error("Failed to begin transaction", e))?;

        let row = sqlx::query(
            r#"
            SELECT id, role, preferences, usage, quotas
            FROM users
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| storage_error("Failed to lock user row", e))?;

        let mut user = row
            .map(row_to_user)
            .transpose()?
            .ok_or_else(|| CoreError::not_found(format!("User not found: {}", id)))?;

        user.record_turn(tokens, now);

        let usage = serde_json::to_value(user.usage())
            .map_err(|e| storage_error("Failed to encode usage", e))?;
        let quotas = serde_json::to_value(user.quotas())
            .map_err(|e| storage_error("Failed to encode quotas", e))?;

        sqlx::query(r#"UPDATE users SET usage = $2, quotas = $3 WHERE id = $1"#)
            .bind(id.as_str())
            .bind(usage)
            .bind(quotas)
            .execute(&mut *tx)
            .await
            .map_err(|e| storage_error("Failed to update usage counters", e))?;

        tx.commit()
            .await
            .map_err(|e| storage_error("Failed to commit usage update", e))?;

        Ok(())
    }
}
