//! Session entity - the conversation container.
//!
//! Each session is owned by exactly one user. Messages reference the session
//! by id; sessions never hold message references in memory. The context
//! counters mirror the persisted message set and are mutated only under the
//! orchestrator's per-session lock.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{CoreError, SessionId, Timestamp, UserId};

/// Maximum length for a session title.
pub const MAX_TITLE_LENGTH: usize = 200;

/// Number of characters of the first user message used to derive a title.
pub const TITLE_PREFIX_CHARS: usize = 50;

/// Sampling settings passed to the provider on every turn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Sampling temperature, 0.0..=2.0.
    pub temperature: f32,
    /// Maximum completion tokens per turn.
    pub max_tokens: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

/// Running token accounting for the session's message set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    /// Sum of token counts across the session's messages.
    pub total_tokens: u64,
    /// Number of persisted messages.
    pub message_count: u64,
    /// When the last summarisation committed.
    pub last_summarised_at: Option<Timestamp>,
    /// MD5 hex digest of the last summarised content.
    pub summary_hash: Option<String>,
}

/// Session entity.
///
/// # Invariants
///
/// - `context.total_tokens` equals the sum of the persisted messages'
///   token counts (after summary replacements).
/// - Inactive sessions accept no further turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    session_id: SessionId,
    user_id: UserId,
    title: String,
    provider: String,
    model: Option<String>,
    system_prompt: Option<String>,
    settings: SessionSettings,
    context: SessionContext,
    is_active: bool,
    created_at: Timestamp,
    last_activity_at: Timestamp,
}

impl Session {
    /// Creates a new active session.
    pub fn new(
        user_id: UserId,
        provider: impl Into<String>,
        model: Option<String>,
        system_prompt: Option<String>,
        settings: SessionSettings,
        now: Timestamp,
    ) -> Self {
        Self {
            session_id: SessionId::new(),
            user_id,
            title: "New conversation".to_string(),
            provider: provider.into(),
            model,
            system_prompt,
            settings,
            context: SessionContext::default(),
            is_active: true,
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Reconstitutes a session from persistence (no validation).
    #[allow(clippy::too_many_arguments)]
    pub fn reconstitute(
        session_id: SessionId,
        user_id: UserId,
        title: String,
        provider: String,
        model: Option<String>,
        system_prompt: Option<String>,
        settings: SessionSettings,
        context: SessionContext,
        is_active: bool,
        created_at: Timestamp,
        last_activity_at: Timestamp,
    ) -> Self {
        Self {
            session_id,
            user_id,
            title,
            provider,
            model,
            system_prompt,
            settings,
            context,
            is_active,
            created_at,
            last_activity_at,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────

    /// Returns the session id.
    pub fn id(&self) -> &SessionId {
        &self.session_id
    }

    /// Returns the owner's user id.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Returns the session title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Returns the provider name for this session.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Returns the model override, if any.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Returns the system prompt, if any.
    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Returns the sampling settings.
    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    /// Returns the context counters.
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Returns true while the session accepts turns.
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Returns when the session was created.
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Returns the last activity time.
    pub fn last_activity_at(&self) -> Timestamp {
        self.last_activity_at
    }

    // ─────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────

    /// Verifies the session is active and owned by `user_id`.
    ///
    /// Ownership failures surface as not-found so callers cannot probe for
    /// other users' session ids.
    pub fn ensure_owned_active(&self, user_id: &UserId) -> Result<(), CoreError> {
        if &self.user_id != user_id || !self.is_active {
            return Err(CoreError::not_found(format!(
                "Session not found: {}",
                self.session_id
            )));
        }
        Ok(())
    }

    /// Derives the title from the first user message of the session.
    pub fn derive_title(&mut self, first_message: &str) {
        let trimmed = first_message.trim();
        let title: String = trimmed.chars().take(TITLE_PREFIX_CHARS).collect();
        if !title.is_empty() {
            self.title = if trimmed.chars().count() > TITLE_PREFIX_CHARS {
                format!("{}…", title)
            } else {
                title
            };
        }
    }

    /// Renames the session, truncating to the title limit.
    pub fn rename(&mut self, title: impl Into<String>) {
        let title = title.into();
        self.title = title.chars().take(MAX_TITLE_LENGTH).collect();
    }

    /// Records a newly appended message.
    pub fn record_appended(&mut self, token_count: u64, now: Timestamp) {
        self.context.total_tokens += token_count;
        self.context.message_count += 1;
        self.last_activity_at = now;
    }

    /// Commits a summarisation: `removed` messages carrying `removed_tokens`
    /// were replaced by one summary message of `summary_tokens`.
    pub fn record_summary_commit(
        &mut self,
        removed: u64,
        removed_tokens: u64,
        summary_tokens: u64,
        summary_hash: String,
        now: Timestamp,
    ) {
        self.context.total_tokens = self
            .context
            .total_tokens
            .saturating_sub(removed_tokens)
            .saturating_add(summary_tokens);
        self.context.message_count = self
            .context
            .message_count
            .saturating_sub(removed)
            .saturating_add(1);
        self.context.last_summarised_at = Some(now);
        self.context.summary_hash = Some(summary_hash);
    }

    /// Zeroes the context counters after a message purge. Retained system
    /// messages keep their rows but carry no context weight.
    pub fn record_cleared(&mut self, remaining_messages: u64) {
        self.context.total_tokens = 0;
        self.context.message_count = remaining_messages;
        self.context.last_summarised_at = None;
        self.context.summary_hash = None;
    }

    /// Returns true when the running total crosses the summarisation threshold.
    pub fn needs_summarisation(&self, threshold: u64) -> bool {
        self.context.total_tokens > threshold
    }

    /// Deactivates the session; no further turns are accepted.
    pub fn deactivate(&mut self) {
        self.is_active = false;
    }

    /// Returns true if the session's inactivity exceeds the TTL.
    pub fn is_expired(&self, ttl_days: u32, now: Timestamp) -> bool {
        now >= self.last_activity_at.add_days(ttl_days as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> Session {
        Session::new(
            UserId::new("u1").unwrap(),
            "mock",
            None,
            None,
            SessionSettings::default(),
            Timestamp::now(),
        )
    }

    #[test]
    fn new_session_is_active_with_empty_context() {
        let session = test_session();
        assert!(session.is_active());
        assert_eq!(session.context().total_tokens, 0);
        assert_eq!(session.context().message_count, 0);
    }

    #[test]
    fn ownership_check_hides_foreign_sessions_as_not_found() {
        let session = test_session();
        let other = UserId::new("u2").unwrap();

        let err = session.ensure_owned_active(&other).unwrap_err();
        assert_eq!(err.kind(), crate::domain::foundation::ErrorKind::NotFound);
    }

    #[test]
    fn inactive_session_rejects_turns() {
        let mut session = test_session();
        let owner = session.user_id().clone();
        session.deactivate();

        assert!(session.ensure_owned_active(&owner).is_err());
    }

    #[test]
    fn derive_title_takes_prefix_of_first_message() {
        let mut session = test_session();
        session.derive_title("Tell me about the history of container shipping in Europe");

        assert!(session.title().chars().count() <= TITLE_PREFIX_CHARS + 1);
        assert!(session.title().starts_with("Tell me about"));
        assert!(session.title().ends_with('…'));
    }

    #[test]
    fn derive_title_keeps_short_messages_verbatim() {
        let mut session = test_session();
        session.derive_title("Hello");
        assert_eq!(session.title(), "Hello");
    }

    #[test]
    fn record_appended_tracks_counters() {
        let mut session = test_session();
        let now = Timestamp::now();

        session.record_appended(40, now);
        session.record_appended(60, now);

        assert_eq!(session.context().total_tokens, 100);
        assert_eq!(session.context().message_count, 2);
        assert_eq!(session.last_activity_at(), now);
    }

    #[test]
    fn summary_commit_replaces_removed_tokens() {
        let mut session = test_session();
        let now = Timestamp::now();
        for _ in 0..6 {
            session.record_appended(100, now);
        }

        session.record_summary_commit(4, 400, 80, "abc123".to_string(), now);

        assert_eq!(session.context().total_tokens, 600 - 400 + 80);
        assert_eq!(session.context().message_count, 6 - 4 + 1);
        assert_eq!(session.context().summary_hash.as_deref(), Some("abc123"));
        assert!(session.context().last_summarised_at.is_some());
    }

    #[test]
    fn needs_summarisation_is_strictly_above_threshold() {
        let mut session = test_session();
        let now = Timestamp::now();
        session.record_appended(1_000, now);

        assert!(!session.needs_summarisation(1_000));
        assert!(session.needs_summarisation(999));
    }

    #[test]
    fn expiry_follows_last_activity() {
        let now = Timestamp::now();
        let session = test_session();

        assert!(!session.is_expired(30, now));
        assert!(session.is_expired(30, now.add_days(31)));
    }
}
