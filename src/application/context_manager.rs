//! Context manager - assembles what the adapter sees, persists what the
//! session owes, and keeps the session's token total bounded.
//!
//! Summarisation is scheduled fire-and-forget when an append pushes the
//! running total over the threshold; its failure never blocks the caller.
//! At most one summarisation runs per session at a time (a session-scoped
//! lock); turns arriving meanwhile proceed against the pre-summary message
//! set and may observe token-count skew bounded by one turn.

use md5::{Digest, Md5};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::domain::foundation::{Clock, CoreError, CorrelationId, SessionId, Timestamp};
use crate::domain::message::{Message, MessageRole, MessageStatus};
use crate::ports::{
    counters, AiProvider, CompletionRequest, MessageStore, MetricsSink, PromptMessage, PromptRole,
    RequestMetadata, SessionStore,
};

/// Fixed system prompt handed to the summarisation provider.
const SUMMARY_SYSTEM_PROMPT: &str = "You summarise conversations. Produce a compact third-person \
summary of the dialogue below, preserving facts, decisions, names, and open questions. Output \
only the summary text.";

/// Context manager configuration.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Token total above which summarisation triggers.
    pub summarisation_threshold: u64,
    /// Messages newer than this many minutes are never summarised.
    pub recency_window_minutes: i64,
    /// Advisory prompt ceiling; informs adapters, not enforced as a hard cut.
    pub max_context_tokens: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            summarisation_threshold: 6_000,
            recency_window_minutes: 10,
            max_context_tokens: 8_000,
        }
    }
}

/// What the adapter sees for one turn.
#[derive(Debug, Clone)]
pub struct PromptContext {
    /// Conversation messages in ascending order.
    pub messages: Vec<PromptMessage>,
    /// The session's system prompt.
    pub system_prompt: Option<String>,
    /// Running token total of the session.
    pub total_tokens: u64,
    /// Persisted message count.
    pub message_count: u64,
}

/// Result of a committed summarisation pass.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummariseReport {
    /// Messages replaced by the summary.
    pub messages_summarised: u64,
    /// Net token reduction (removed minus summary).
    pub tokens_saved: i64,
    /// Token count of the summary message itself.
    pub summary_tokens: u64,
}

/// Session context statistics.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextStats {
    pub total_tokens: u64,
    pub message_count: u64,
    pub user_messages: u64,
    pub assistant_messages: u64,
    pub needs_summarisation: bool,
    pub last_summarised_at: Option<Timestamp>,
}

/// Context manager. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct ContextManager {
    sessions: Arc<dyn SessionStore>,
    messages: Arc<dyn MessageStore>,
    summariser: Arc<dyn AiProvider>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    config: ContextConfig,
    summary_locks: Arc<Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ContextManager {
    /// Creates a context manager.
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        messages: Arc<dyn MessageStore>,
        summariser: Arc<dyn AiProvider>,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink>,
        config: ContextConfig,
    ) -> Self {
        Self {
            sessions,
            messages,
            summariser,
            clock,
            metrics,
            config,
            summary_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    fn summary_lock(&self, session_id: &SessionId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.summary_locks.lock().unwrap();
        locks
            .entry(*session_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn load_session(&self, session_id: &SessionId) -> Result<crate::domain::session::Session, CoreError> {
        self.sessions
            .find(session_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("Session not found: {}", session_id)))
    }

    /// Loads the prompt context for a turn: completed messages in ascending
    /// order, summary messages folded in as system context.
    pub async fn load(&self, session_id: &SessionId) -> Result<PromptContext, CoreError> {
        let session = self.load_session(session_id).await?;
        let stored = self.messages.find_by_session(session_id, None).await?;

        let messages = stored
            .iter()
            .filter(|m| m.status() == MessageStatus::Completed)
            .filter_map(|m| match m.role() {
                MessageRole::User => Some(PromptMessage::user(m.content())),
                MessageRole::Assistant => Some(PromptMessage::assistant(m.content())),
                MessageRole::System => Some(PromptMessage::system(m.content())),
                MessageRole::Summary => Some(PromptMessage::system(format!(
                    "Summary of earlier conversation: {}",
                    m.content()
                ))),
            })
            .collect();

        Ok(PromptContext {
            messages,
            system_prompt: session.system_prompt().map(String::from),
            total_tokens: session.context().total_tokens,
            message_count: session.context().message_count,
        })
    }

    /// Appends a user message: persists it, bumps the session counters, and
    /// schedules summarisation when the new total crosses the threshold.
    pub async fn append_user(
        &self,
        session_id: &SessionId,
        content: &str,
        correlation_id: CorrelationId,
    ) -> Result<Message, CoreError> {
        let mut session = self.load_session(session_id).await?;
        let now = self.clock.now();

        let message = Message::user(
            *session_id,
            session.user_id().clone(),
            content,
            correlation_id,
            now,
        );
        self.messages.insert(&message).await?;

        session.record_appended(message.metadata().token_count as u64, now);
        self.sessions.update(&session).await?;

        if session.needs_summarisation(self.config.summarisation_threshold) {
            self.schedule_summarise(*session_id);
        }

        Ok(message)
    }

    /// Folds a finalized assistant message into the session counters and
    /// schedules summarisation when the new total crosses the threshold.
    pub async fn record_assistant(
        &self,
        session_id: &SessionId,
        token_count: u64,
    ) -> Result<(), CoreError> {
        let mut session = self.load_session(session_id).await?;
        let now = self.clock.now();

        session.record_appended(token_count, now);
        self.sessions.update(&session).await?;

        if session.needs_summarisation(self.config.summarisation_threshold) {
            self.schedule_summarise(*session_id);
        }
        Ok(())
    }

    /// Schedules a summarisation pass, fire-and-forget.
    pub fn schedule_summarise(&self, session_id: SessionId) {
        let manager = self.clone();
        tokio::spawn(async move {
            manager.summarise(&session_id).await;
        });
    }

    /// Summarises the session's older messages into a single summary
    /// message. Returns `None` when there is nothing to do or on any
    /// internal error (logged, never propagated).
    pub async fn summarise(&self, session_id: &SessionId) -> Option<SummariseReport> {
        let lock = self.summary_lock(session_id);
        // At most one pass per session; a pass already in flight covers us.
        let Ok(_guard) = lock.try_lock() else {
            return None;
        };

        match self.summarise_locked(session_id).await {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(
                    session_id = %session_id,
                    error = %err,
                    "summarisation failed"
                );
                None
            }
        }
    }

    async fn summarise_locked(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<SummariseReport>, CoreError> {
        let session = self.load_session(session_id).await?;
        let now = self.clock.now();
        let horizon = now.minus_minutes(self.config.recency_window_minutes);

        let stored = self.messages.find_by_session(session_id, None).await?;
        let candidates: Vec<&Message> = stored
            .iter()
            .filter(|m| {
                matches!(m.role(), MessageRole::User | MessageRole::Assistant)
                    && m.status() == MessageStatus::Completed
                    && m.created_at().is_before(&horizon)
            })
            .collect();

        if candidates.len() < 2 {
            return Ok(None);
        }

        let transcript = candidates
            .iter()
            .map(|m| {
                let speaker = match m.role() {
                    MessageRole::Assistant => "Assistant",
                    _ => "User",
                };
                format!("{}: {}", speaker, m.content())
            })
            .collect::<Vec<_>>()
            .join("\n");

        let request = CompletionRequest::new(RequestMetadata::new(
            session.user_id().clone(),
            *session_id,
            CorrelationId::new(),
        ))
        .with_system_prompt(SUMMARY_SYSTEM_PROMPT)
        .with_message(PromptRole::User, transcript.clone());

        let completion = self
            .summariser
            .complete(request)
            .await
            .map_err(|e| CoreError::provider(e.to_string()))?;

        let summary = Message::summary(
            *session_id,
            session.user_id().clone(),
            completion.text,
            self.summariser.name(),
            now,
        );
        self.messages.insert(&summary).await?;

        let removed_ids: Vec<_> = candidates.iter().map(|m| *m.id()).collect();
        let removed_tokens: u64 = candidates
            .iter()
            .map(|m| m.metadata().token_count as u64)
            .sum();
        let removed = self.messages.delete(&removed_ids).await?;

        let summary_tokens = summary.metadata().token_count as u64;
        let summary_hash = md5_hex(transcript.as_bytes());

        // Re-read: a turn may have committed while the summariser ran.
        let mut session = self.load_session(session_id).await?;
        session.record_summary_commit(removed, removed_tokens, summary_tokens, summary_hash, now);
        self.sessions.update(&session).await?;

        self.metrics.increment(counters::SUMMARISATION_RUN);
        tracing::info!(
            session_id = %session_id,
            messages_summarised = removed,
            tokens_saved = removed_tokens as i64 - summary_tokens as i64,
            "summarisation committed"
        );

        Ok(Some(SummariseReport {
            messages_summarised: removed,
            tokens_saved: removed_tokens as i64 - summary_tokens as i64,
            summary_tokens,
        }))
    }

    /// Deletes the session's messages and zeroes the counters, optionally
    /// retaining system messages. Returns the number deleted.
    pub async fn clear(&self, session_id: &SessionId, keep_system: bool) -> Result<u64, CoreError> {
        let mut session = self.load_session(session_id).await?;

        let deleted = self.messages.delete_by_session(session_id, keep_system).await?;

        let remaining = self.messages.find_by_session(session_id, None).await?;
        session.record_cleared(remaining.len() as u64);
        self.sessions.update(&session).await?;

        Ok(deleted)
    }

    /// Returns the session's context statistics.
    pub async fn stats(&self, session_id: &SessionId) -> Result<ContextStats, CoreError> {
        let session = self.load_session(session_id).await?;
        let user_messages = self
            .messages
            .count_by_role(session_id, MessageRole::User)
            .await?;
        let assistant_messages = self
            .messages
            .count_by_role(session_id, MessageRole::Assistant)
            .await?;

        Ok(ContextStats {
            total_tokens: session.context().total_tokens,
            message_count: session.context().message_count,
            user_messages,
            assistant_messages,
            needs_summarisation: session
                .needs_summarisation(self.config.summarisation_threshold),
            last_summarised_at: session.context().last_summarised_at,
        })
    }
}

/// Lowercase hex MD5 digest.
fn md5_hex(bytes: &[u8]) -> String {
    let digest = Md5::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ai::MockProvider;
    use crate::adapters::memory::{InMemoryMessageStore, InMemorySessionStore};
    use crate::domain::foundation::{FixedClock, UserId};
    use crate::domain::session::{Session, SessionSettings};
    use crate::ports::NoOpMetrics;

    struct Fixture {
        manager: ContextManager,
        sessions: Arc<InMemorySessionStore>,
        messages: Arc<InMemoryMessageStore>,
        clock: Arc<FixedClock>,
        session_id: SessionId,
    }

    async fn fixture(config: ContextConfig) -> Fixture {
        let sessions = Arc::new(InMemorySessionStore::new());
        let messages = Arc::new(InMemoryMessageStore::new());
        let clock = FixedClock::at(Timestamp::from_unix_secs(1_700_000_000));

        let session = Session::new(
            UserId::new("u1").unwrap(),
            "mock",
            None,
            Some("Be helpful.".to_string()),
            SessionSettings::default(),
            clock.now(),
        );
        let session_id = *session.id();
        sessions.create(&session).await.unwrap();

        let manager = ContextManager::new(
            sessions.clone(),
            messages.clone(),
            Arc::new(MockProvider::new().with_response("A compact summary of the chat.")),
            clock.clone(),
            Arc::new(NoOpMetrics),
            config,
        );

        Fixture {
            manager,
            sessions,
            messages,
            clock,
            session_id,
        }
    }

    fn high_threshold() -> ContextConfig {
        ContextConfig {
            summarisation_threshold: 1_000_000,
            recency_window_minutes: 10,
            max_context_tokens: 8_000,
        }
    }

    #[tokio::test]
    async fn append_user_persists_and_counts() {
        let f = fixture(high_threshold()).await;

        let msg = f
            .manager
            .append_user(&f.session_id, "Hello there", CorrelationId::new())
            .await
            .unwrap();

        let session = f.sessions.find(&f.session_id).await.unwrap().unwrap();
        assert_eq!(session.context().message_count, 1);
        assert_eq!(
            session.context().total_tokens,
            msg.metadata().token_count as u64
        );
    }

    #[tokio::test]
    async fn load_returns_messages_in_order_with_system_prompt() {
        let f = fixture(high_threshold()).await;

        f.manager
            .append_user(&f.session_id, "first", CorrelationId::new())
            .await
            .unwrap();
        f.clock.advance_secs(1);
        f.manager
            .append_user(&f.session_id, "second", CorrelationId::new())
            .await
            .unwrap();

        let ctx = f.manager.load(&f.session_id).await.unwrap();
        assert_eq!(ctx.system_prompt.as_deref(), Some("Be helpful."));
        assert_eq!(ctx.messages.len(), 2);
        assert_eq!(ctx.messages[0].content, "first");
        assert_eq!(ctx.messages[1].content, "second");
    }

    #[tokio::test]
    async fn load_excludes_streaming_messages() {
        let f = fixture(high_threshold()).await;
        f.manager
            .append_user(&f.session_id, "hello", CorrelationId::new())
            .await
            .unwrap();

        let streaming = Message::streaming_assistant(
            f.session_id,
            UserId::new("u1").unwrap(),
            "mock",
            None,
            CorrelationId::new(),
            f.clock.now(),
        );
        f.messages.insert(&streaming).await.unwrap();

        let ctx = f.manager.load(&f.session_id).await.unwrap();
        assert_eq!(ctx.messages.len(), 1);
    }

    #[tokio::test]
    async fn summarise_replaces_old_messages_and_updates_session() {
        let mut config = high_threshold();
        config.recency_window_minutes = 10;
        let f = fixture(config).await;

        // Four old messages, well outside the recency window.
        for content in ["q1", "a1", "q2", "a2"] {
            f.manager
                .append_user(&f.session_id, content, CorrelationId::new())
                .await
                .unwrap();
            f.clock.advance_secs(1);
        }
        f.clock.advance_secs(60 * 60);

        // One fresh message that must survive.
        f.manager
            .append_user(&f.session_id, "fresh question", CorrelationId::new())
            .await
            .unwrap();

        let report = f.manager.summarise(&f.session_id).await.unwrap();
        assert_eq!(report.messages_summarised, 4);
        assert!(report.summary_tokens > 0);

        let remaining = f.messages.find_by_session(&f.session_id, None).await.unwrap();
        let roles: Vec<_> = remaining.iter().map(|m| m.role()).collect();
        assert!(roles.contains(&MessageRole::Summary));
        assert_eq!(
            remaining
                .iter()
                .filter(|m| m.content() == "fresh question")
                .count(),
            1
        );
        assert_eq!(remaining.len(), 2);

        let session = f.sessions.find(&f.session_id).await.unwrap().unwrap();
        assert!(session.context().last_summarised_at.is_some());
        assert!(session.context().summary_hash.is_some());
        // Invariant: counters equal the surviving message set.
        let sum: u64 = remaining
            .iter()
            .map(|m| m.metadata().token_count as u64)
            .sum();
        assert_eq!(session.context().total_tokens, sum);
        assert_eq!(session.context().message_count, remaining.len() as u64);
    }

    #[tokio::test]
    async fn summarise_is_idempotent_below_two_candidates() {
        let f = fixture(high_threshold()).await;
        f.manager
            .append_user(&f.session_id, "only one", CorrelationId::new())
            .await
            .unwrap();
        f.clock.advance_secs(60 * 60);

        assert!(f.manager.summarise(&f.session_id).await.is_none());
        // Back-to-back call yields the same final message set.
        assert!(f.manager.summarise(&f.session_id).await.is_none());
        let remaining = f.messages.find_by_session(&f.session_id, None).await.unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn summarise_skips_recent_messages() {
        let f = fixture(high_threshold()).await;
        f.manager
            .append_user(&f.session_id, "recent 1", CorrelationId::new())
            .await
            .unwrap();
        f.manager
            .append_user(&f.session_id, "recent 2", CorrelationId::new())
            .await
            .unwrap();

        // Everything is inside the recency window: nothing to summarise.
        assert!(f.manager.summarise(&f.session_id).await.is_none());
    }

    #[tokio::test]
    async fn summarise_swallows_provider_errors() {
        let sessions = Arc::new(InMemorySessionStore::new());
        let messages = Arc::new(InMemoryMessageStore::new());
        let clock = FixedClock::at(Timestamp::from_unix_secs(1_700_000_000));

        let session = Session::new(
            UserId::new("u1").unwrap(),
            "mock",
            None,
            None,
            SessionSettings::default(),
            clock.now(),
        );
        let session_id = *session.id();
        sessions.create(&session).await.unwrap();

        let failing = MockProvider::new()
            .with_error(crate::adapters::ai::MockFailure::Unavailable {
                message: "summariser down".to_string(),
            });
        let manager = ContextManager::new(
            sessions,
            messages,
            Arc::new(failing),
            clock.clone(),
            Arc::new(NoOpMetrics),
            high_threshold(),
        );

        manager
            .append_user(&session_id, "one", CorrelationId::new())
            .await
            .unwrap();
        manager
            .append_user(&session_id, "two", CorrelationId::new())
            .await
            .unwrap();
        clock.advance_secs(60 * 60);

        // Provider failure is absorbed, not propagated.
        assert!(manager.summarise(&session_id).await.is_none());
    }

    #[tokio::test]
    async fn clear_keep_system_retains_system_messages() {
        let f = fixture(high_threshold()).await;
        let uid = UserId::new("u1").unwrap();

        f.messages
            .insert(&Message::system(f.session_id, uid, "rules", f.clock.now()))
            .await
            .unwrap();
        f.clock.advance_secs(1);
        f.manager
            .append_user(&f.session_id, "hello", CorrelationId::new())
            .await
            .unwrap();

        let deleted = f.manager.clear(&f.session_id, true).await.unwrap();
        assert_eq!(deleted, 1);

        let stats = f.manager.stats(&f.session_id).await.unwrap();
        assert_eq!(stats.total_tokens, 0);
        assert_eq!(stats.message_count, 1);
        assert_eq!(stats.user_messages, 0);
    }

    #[tokio::test]
    async fn stats_reports_counts_and_threshold() {
        let config = ContextConfig {
            summarisation_threshold: 1,
            recency_window_minutes: 10,
            max_context_tokens: 8_000,
        };
        let f = fixture(config).await;

        f.manager
            .append_user(&f.session_id, "a fairly long message", CorrelationId::new())
            .await
            .unwrap();

        let stats = f.manager.stats(&f.session_id).await.unwrap();
        assert_eq!(stats.user_messages, 1);
        assert_eq!(stats.assistant_messages, 0);
        assert!(stats.needs_summarisation);
    }

    #[test]
    fn md5_hex_matches_known_vector() {
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }
}
