//! Persistence ports for the three core collections: users, sessions,
//! messages.
//!
//! The orchestrator only mutates messages it created; terminal transitions go
//! through [`MessageStore::finalize`], a compare-and-set on status, so
//! duplicate completion paths are no-ops.

use async_trait::async_trait;

use crate::domain::foundation::{CoreError, MessageId, SessionId, Timestamp, UserId};
use crate::domain::message::{Message, MessageRole};
use crate::domain::session::Session;
use crate::domain::user::User;

/// Store for user records and their usage counters.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Finds a user by id.
    async fn find(&self, id: &UserId) -> Result<Option<User>, CoreError>;

    /// Inserts or replaces a user record.
    async fn upsert(&self, user: &User) -> Result<(), CoreError>;

    /// Atomically records one terminal assistant turn against the user's
    /// usage counters (compare-and-increment on the user record).
    async fn record_turn(
        &self,
        id: &UserId,
        tokens: u64,
        now: Timestamp,
    ) -> Result<(), CoreError>;
}

/// Store for session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists a new session.
    async fn create(&self, session: &Session) -> Result<(), CoreError>;

    /// Updates an existing session.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the session does not exist.
    async fn update(&self, session: &Session) -> Result<(), CoreError>;

    /// Finds a session by id.
    async fn find(&self, id: &SessionId) -> Result<Option<Session>, CoreError>;

    /// Lists a user's sessions, most recently active first.
    ///
    /// Returns the page and the total count.
    async fn find_by_user(
        &self,
        user_id: &UserId,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Session>, u64), CoreError>;

    /// Deactivates sessions whose inactivity exceeds the TTL.
    ///
    /// Returns the number of sessions deactivated.
    async fn deactivate_expired(&self, ttl_days: u32, now: Timestamp) -> Result<u64, CoreError>;
}

/// Store for message records.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists a new message.
    async fn insert(&self, message: &Message) -> Result<(), CoreError>;

    /// Returns a session's messages in ascending `created_at`.
    async fn find_by_session(
        &self,
        session_id: &SessionId,
        limit: Option<u32>,
    ) -> Result<Vec<Message>, CoreError>;

    /// Finds one message by id.
    async fn find(&self, id: &MessageId) -> Result<Option<Message>, CoreError>;

    /// Writes a terminal transition, guarded by a compare-and-set on status:
    /// the row is updated only while still `Streaming`.
    ///
    /// Returns true if this call performed the transition, false if the
    /// message had already reached a terminal status (replay no-op).
    async fn finalize(&self, message: &Message) -> Result<bool, CoreError>;

    /// Deletes the given messages (summarisation replacement).
    ///
    /// Returns the number deleted.
    async fn delete(&self, ids: &[MessageId]) -> Result<u64, CoreError>;

    /// Deletes a session's messages, optionally retaining `System` messages.
    ///
    /// Returns the number deleted.
    async fn delete_by_session(
        &self,
        session_id: &SessionId,
        keep_system: bool,
    ) -> Result<u64, CoreError>;

    /// Counts a session's messages by role.
    async fn count_by_role(
        &self,
        session_id: &SessionId,
        role: MessageRole,
    ) -> Result<u64, CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_traits_are_object_safe() {
        fn _users(_: &dyn UserStore) {}
        fn _sessions(_: &dyn SessionStore) {}
        fn _messages(_: &dyn MessageStore) {}
    }
}
