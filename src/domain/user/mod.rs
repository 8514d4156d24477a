//! User entity - the principal with quota.
//!
//! Users are created externally (by the identity layer); the core reads them
//! on every turn and updates their usage counters when an assistant turn
//! reaches a terminal status.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{Role, Timestamp, UserId};

/// Per-user provider preferences applied to new sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    /// Preferred provider name (e.g. "anthropic", "openai", "mock").
    pub provider: Option<String>,
    /// Preferred model identifier.
    pub model: Option<String>,
    /// Preferred sampling temperature.
    pub temperature: Option<f32>,
    /// Preferred system prompt.
    pub system_prompt: Option<String>,
}

/// Lifetime usage counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserUsage {
    /// Total tokens consumed across all turns.
    pub total_tokens: u64,
    /// Total turns that reached a terminal status.
    pub total_requests: u64,
    /// When the last turn terminated.
    pub last_request_at: Option<Timestamp>,
    /// Tokens consumed since the current reset date.
    pub daily_tokens: u64,
    /// Turns since the current reset date.
    pub daily_requests: u64,
}

/// Daily caps; `reset_date` marks the start of the current accounting day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserQuotas {
    /// Maximum tokens per day.
    pub daily_token_limit: u64,
    /// Maximum turns per day.
    pub daily_request_limit: u64,
    /// Start of the current accounting day.
    pub reset_date: Timestamp,
}

impl UserQuotas {
    /// Creates quotas with the given caps, resetting at the start of today.
    pub fn new(daily_token_limit: u64, daily_request_limit: u64) -> Self {
        Self {
            daily_token_limit,
            daily_request_limit,
            reset_date: Timestamp::start_of_today(),
        }
    }
}

impl Default for UserQuotas {
    fn default() -> Self {
        Self::new(100_000, 200)
    }
}

/// User entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    id: UserId,
    role: Role,
    preferences: UserPreferences,
    usage: UserUsage,
    quotas: UserQuotas,
}

impl User {
    /// Creates a new user with default preferences and quotas.
    pub fn new(id: UserId, role: Role) -> Self {
        Self {
            id,
            role,
            preferences: UserPreferences::default(),
            usage: UserUsage::default(),
            quotas: UserQuotas::default(),
        }
    }

    /// Reconstitutes a user from persistence.
    pub fn reconstitute(
        id: UserId,
        role: Role,
        preferences: UserPreferences,
        usage: UserUsage,
        quotas: UserQuotas,
    ) -> Self {
        Self {
            id,
            role,
            preferences,
            usage,
            quotas,
        }
    }

    /// Returns the user's id.
    pub fn id(&self) -> &UserId {
        &self.id
    }

    /// Returns the user's role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the user's preferences.
    pub fn preferences(&self) -> &UserPreferences {
        &self.preferences
    }

    /// Returns the usage counters.
    pub fn usage(&self) -> &UserUsage {
        &self.usage
    }

    /// Returns the quota configuration.
    pub fn quotas(&self) -> &UserQuotas {
        &self.quotas
    }

    /// Replaces the user's preferences.
    pub fn set_preferences(&mut self, preferences: UserPreferences) {
        self.preferences = preferences;
    }

    /// Replaces the user's quotas (admin operation).
    pub fn set_quotas(&mut self, quotas: UserQuotas) {
        self.quotas = quotas;
    }

    /// Rolls the daily counters forward if the accounting day has passed.
    ///
    /// Must be called with the current time before reading or mutating the
    /// daily counters.
    pub fn roll_quota_window(&mut self, now: Timestamp) {
        let next_reset = self.quotas.reset_date.add_days(1);
        if now >= next_reset {
            self.usage.daily_tokens = 0;
            self.usage.daily_requests = 0;
            self.quotas.reset_date = Timestamp::from_datetime(
                now.as_datetime()
                    .date_naive()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
                    .and_utc(),
            );
        }
    }

    /// Returns true if either daily cap is already exhausted.
    pub fn has_exceeded_quotas(&mut self, now: Timestamp) -> bool {
        self.roll_quota_window(now);
        self.usage.daily_tokens >= self.quotas.daily_token_limit
            || self.usage.daily_requests >= self.quotas.daily_request_limit
    }

    /// Records one terminal assistant turn.
    ///
    /// Invoked exactly once per turn, whether the turn completed or errored.
    pub fn record_turn(&mut self, tokens: u64, now: Timestamp) {
        self.roll_quota_window(now);
        self.usage.total_tokens += tokens;
        self.usage.total_requests += 1;
        self.usage.daily_tokens += tokens;
        self.usage.daily_requests += 1;
        self.usage.last_request_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user() -> User {
        User::new(UserId::new("u1").unwrap(), Role::User)
    }

    #[test]
    fn new_user_has_zero_usage() {
        let user = test_user();
        assert_eq!(user.usage().total_tokens, 0);
        assert_eq!(user.usage().total_requests, 0);
        assert!(user.usage().last_request_at.is_none());
    }

    #[test]
    fn record_turn_updates_all_counters() {
        let mut user = test_user();
        let now = Timestamp::now();

        user.record_turn(150, now);

        assert_eq!(user.usage().total_tokens, 150);
        assert_eq!(user.usage().total_requests, 1);
        assert_eq!(user.usage().daily_tokens, 150);
        assert_eq!(user.usage().daily_requests, 1);
        assert_eq!(user.usage().last_request_at, Some(now));
    }

    #[test]
    fn quota_check_respects_request_limit() {
        let mut user = test_user();
        user.set_quotas(UserQuotas::new(1_000_000, 2));
        let now = Timestamp::now();

        assert!(!user.has_exceeded_quotas(now));
        user.record_turn(10, now);
        user.record_turn(10, now);
        assert!(user.has_exceeded_quotas(now));
    }

    #[test]
    fn quota_check_respects_token_limit() {
        let mut user = test_user();
        user.set_quotas(UserQuotas::new(100, 1_000));
        let now = Timestamp::now();

        user.record_turn(100, now);
        assert!(user.has_exceeded_quotas(now));
    }

    #[test]
    fn daily_counters_roll_at_reset_date() {
        let mut user = test_user();
        user.set_quotas(UserQuotas {
            daily_token_limit: 100,
            daily_request_limit: 1,
            reset_date: Timestamp::from_unix_secs(1_700_000_000),
        });

        let same_day = Timestamp::from_unix_secs(1_700_000_000).plus_secs(3_600);
        user.record_turn(100, same_day);
        assert!(user.has_exceeded_quotas(same_day));

        // Two days later the window has rolled and the user is admitted again.
        let later = Timestamp::from_unix_secs(1_700_000_000).add_days(2);
        assert!(!user.has_exceeded_quotas(later));
        assert_eq!(user.usage().daily_tokens, 0);
        // Lifetime counters are untouched by the roll.
        assert_eq!(user.usage().total_tokens, 100);
    }
}
