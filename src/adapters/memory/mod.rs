//! In-memory store adapters for tests and single-process development.
//!
//! Semantics mirror the Postgres adapters, including the compare-and-set on
//! message status in [`InMemoryMessageStore::finalize`].

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::foundation::{CoreError, MessageId, SessionId, Timestamp, UserId};
use crate::domain::message::{Message, MessageRole, MessageStatus};
use crate::domain::session::Session;
use crate::domain::user::User;
use crate::ports::{MessageStore, SessionStore, UserStore};

/// In-memory user store.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<UserId, User>>,
}

impl InMemoryUserStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a user, returning the store for chaining in tests.
    pub async fn seed(self, user: User) -> Self {
        self.users.write().await.insert(user.id().clone(), user);
        self
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find(&self, id: &UserId) -> Result<Option<User>, CoreError> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn upsert(&self, user: &User) -> Result<(), CoreError> {
        self.users
            .write()
            .await
            .insert(user.id().clone(), user.clone());
        Ok(())
    }

    async fn record_turn(
        &self,
        id: &UserId,
        tokens: u64,
        now: Timestamp,
    ) -> Result<(), CoreError> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found(format!("User not found: {}", id)))?;
        user.record_turn(tokens, now);
        Ok(())
    }
}

/// In-memory session store.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl InMemorySessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: &Session) -> Result<(), CoreError> {
        self.sessions
            .write()
            .await
            .insert(*session.id(), session.clone());
        Ok(())
    }

    async fn update(&self, session: &Session) -> Result<(), CoreError> {
        let mut sessions = self.sessions.write().await;
        if !sessions.contains_key(session.id()) {
            return Err(CoreError::not_found(format!(
                "Session not found: {}",
                session.id()
            )));
        }
        sessions.insert(*session.id(), session.clone());
        Ok(())
    }

    async fn find(&self, id: &SessionId) -> Result<Option<Session>, CoreError> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn find_by_user(
        &self,
        user_id: &UserId,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Session>, u64), CoreError> {
        let sessions = self.sessions.read().await;
        let mut owned: Vec<Session> = sessions
            .values()
            .filter(|s| s.user_id() == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.last_activity_at().cmp(&a.last_activity_at()));

        let total = owned.len() as u64;
        let page = owned
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn deactivate_expired(&self, ttl_days: u32, now: Timestamp) -> Result<u64, CoreError> {
        let mut sessions = self.sessions.write().await;
        let mut count = 0;
        for session in sessions.values_mut() {
            if session.is_active() && session.is_expired(ttl_days, now) {
                session.deactivate();
                count += 1;
            }
        }
        Ok(count)
    }
}

/// In-memory message store.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    messages: RwLock<HashMap<MessageId, Message>>,
}

impl InMemoryMessageStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn insert(&self, message: &Message) -> Result<(), CoreError> {
        self.messages
            .write()
            .await
            .insert(*message.id(), message.clone());
        Ok(())
    }

    async fn find_by_session(
        &self,
        session_id: &SessionId,
        limit: Option<u32>,
    ) -> Result<Vec<Message>, CoreError> {
        let messages = self.messages.read().await;
        let mut found: Vec<Message> = messages
            .values()
            .filter(|m| m.session_id() == session_id)
            .cloned()
            .collect();
        found.sort_by_key(|m| m.created_at());

        if let Some(limit) = limit {
            let skip = found.len().saturating_sub(limit as usize);
            found.drain(..skip);
        }
        Ok(found)
    }

    async fn find(&self, id: &MessageId) -> Result<Option<Message>, CoreError> {
        Ok(self.messages.read().await.get(id).cloned())
    }

    async fn finalize(&self, message: &Message) -> Result<bool, CoreError> {
        let mut messages = self.messages.write().await;
        let stored = messages
            .get_mut(message.id())
            .ok_or_else(|| CoreError::not_found(format!("Message not found: {}", message.id())))?;

        // CAS: only a still-streaming row accepts the terminal write.
        if stored.status() != MessageStatus::Streaming {
            return Ok(false);
        }
        *stored = message.clone();
        Ok(true)
    }

    async fn delete(&self, ids: &[MessageId]) -> Result<u64, CoreError> {
        let mut messages = self.messages.write().await;
        let mut count = 0;
        for id in ids {
            if messages.remove(id).is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete_by_session(
        &self,
        session_id: &SessionId,
        keep_system: bool,
    ) -> Result<u64, CoreError> {
        let mut messages = self.messages.write().await;
        let before = messages.len();
        messages.retain(|_, m| {
            m.session_id() != session_id || (keep_system && m.role() == MessageRole::System)
        });
        Ok((before - messages.len()) as u64)
    }

    async fn count_by_role(
        &self,
        session_id: &SessionId,
        role: MessageRole,
    ) -> Result<u64, CoreError> {
        let messages = self.messages.read().await;
        Ok(messages
            .values()
            .filter(|m| m.session_id() == session_id && m.role() == role)
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::{CorrelationId, Role};
    use crate::domain::message::TokenUsage;
    use crate::domain::session::SessionSettings;

    fn session(user: &str) -> Session {
        Session::new(
            UserId::new(user).unwrap(),
            "mock",
            None,
            None,
            SessionSettings::default(),
            Timestamp::now(),
        )
    }

    #[tokio::test]
    async fn user_store_round_trips() {
        let store = InMemoryUserStore::new();
        let user = User::new(UserId::new("u1").unwrap(), Role::User);

        store.upsert(&user).await.unwrap();
        let found = store.find(user.id()).await.unwrap().unwrap();
        assert_eq!(found.id(), user.id());
    }

    #[tokio::test]
    async fn record_turn_requires_existing_user() {
        let store = InMemoryUserStore::new();
        let missing = UserId::new("ghost").unwrap();
        assert!(store.record_turn(&missing, 10, Timestamp::now()).await.is_err());
    }

    #[tokio::test]
    async fn session_listing_orders_by_recent_activity() {
        let store = InMemorySessionStore::new();
        let user = UserId::new("u1").unwrap();

        let mut older = session("u1");
        older.record_appended(1, Timestamp::now().minus_days(1));
        let newer = session("u1");

        store.create(&older).await.unwrap();
        store.create(&newer).await.unwrap();
        store.create(&session("u2")).await.unwrap();

        let (page, total) = store.find_by_user(&user, 10, 0).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(page[0].id(), newer.id());
        assert_eq!(page[1].id(), older.id());
    }

    #[tokio::test]
    async fn session_listing_paginates() {
        let store = InMemorySessionStore::new();
        let user = UserId::new("u1").unwrap();
        for _ in 0..5 {
            store.create(&session("u1")).await.unwrap();
        }

        let (page, total) = store.find_by_user(&user, 2, 4).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn expired_sessions_are_deactivated() {
        let store = InMemorySessionStore::new();
        let mut stale = session("u1");
        stale.record_appended(1, Timestamp::now().minus_days(40));
        store.create(&stale).await.unwrap();
        store.create(&session("u1")).await.unwrap();

        let count = store.deactivate_expired(30, Timestamp::now()).await.unwrap();
        assert_eq!(count, 1);
        assert!(!store.find(stale.id()).await.unwrap().unwrap().is_active());
    }

    #[tokio::test]
    async fn messages_sort_ascending_and_limit_keeps_newest() {
        let store = InMemoryMessageStore::new();
        let sid = SessionId::new();
        let uid = UserId::new("u1").unwrap();
        let base = Timestamp::now();

        for i in 0..4 {
            let msg = Message::user(
                sid,
                uid.clone(),
                format!("m{}", i),
                CorrelationId::new(),
                base.plus_millis(i),
            );
            store.insert(&msg).await.unwrap();
        }

        let all = store.find_by_session(&sid, None).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].content(), "m0");
        assert_eq!(all[3].content(), "m3");

        let last_two = store.find_by_session(&sid, Some(2)).await.unwrap();
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].content(), "m2");
    }

    #[tokio::test]
    async fn finalize_cas_rejects_replays() {
        let store = InMemoryMessageStore::new();
        let sid = SessionId::new();
        let uid = UserId::new("u1").unwrap();

        let mut msg = Message::streaming_assistant(
            sid,
            uid,
            "mock",
            None,
            CorrelationId::new(),
            Timestamp::now(),
        );
        store.insert(&msg).await.unwrap();

        msg.complete("done".to_string(), Some(TokenUsage::new(1, 2)), 10)
            .unwrap();

        assert!(store.finalize(&msg).await.unwrap());
        // Replayed terminal transition is a no-op.
        assert!(!store.finalize(&msg).await.unwrap());

        let stored = store.find(msg.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), MessageStatus::Completed);
        assert_eq!(stored.content(), "done");
    }

    #[tokio::test]
    async fn clear_can_retain_system_messages() {
        let store = InMemoryMessageStore::new();
        let sid = SessionId::new();
        let uid = UserId::new("u1").unwrap();
        let now = Timestamp::now();

        store
            .insert(&Message::system(sid, uid.clone(), "be kind", now))
            .await
            .unwrap();
        store
            .insert(&Message::user(
                sid,
                uid.clone(),
                "hi",
                CorrelationId::new(),
                now.plus_millis(1),
            ))
            .await
            .unwrap();

        let deleted = store.delete_by_session(&sid, true).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(
            store.count_by_role(&sid, MessageRole::System).await.unwrap(),
            1
        );
    }
}
