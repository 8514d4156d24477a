//! Safety gate - schema validation and content screens.
//!
//! Guards the orchestrator's inbound and outbound text at a coarse
//! granularity. Patterns are explicit and minimal, compiled once; content is
//! flagged, never rewritten. Short inbound messages bypass the screen
//! entirely, a deliberate false-negative bias that keeps latency low.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::domain::foundation::{CoreError, ErrorKind};

/// Maximum user message length in characters.
pub const MAX_MESSAGE_LENGTH: usize = 4_000;

/// Maximum system prompt length in characters.
pub const MAX_SYSTEM_PROMPT_LENGTH: usize = 2_000;

/// Inbound messages shorter than this with no suspicious tokens skip the
/// screen.
pub const SCREEN_BYPASS_LENGTH: usize = 500;

fn pattern(p: &str) -> Regex {
    RegexBuilder::new(p)
        .case_insensitive(true)
        .build()
        .expect("invalid safety pattern")
}

static PROFANITY: Lazy<Vec<Regex>> = Lazy::new(|| {
    ["\\bfuck\\w*\\b", "\\bshit\\w*\\b", "\\bbitch\\b", "\\basshole\\b", "\\bbastard\\b"]
        .iter()
        .map(|p| pattern(p))
        .collect()
});

static PROMPT_INJECTION: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        "ignore\\s+(?:all\\s+)?(?:previous|prior|above)\\s+instructions",
        "disregard\\s+(?:all\\s+)?(?:previous|prior|your)\\s+instructions",
        "override\\s+(?:all\\s+)?safety",
        "you\\s+are\\s+now\\s+(?:a|an|in)\\b",
        "reveal\\s+(?:your\\s+)?system\\s+prompt",
        "\\bjailbreak\\b",
        "\\bdan\\s+mode\\b",
    ]
    .iter()
    .map(|p| pattern(p))
    .collect()
});

static SENSITIVE_DATA: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        ("credit-card", pattern("\\b(?:\\d[ -]?){13,16}\\b")),
        ("ssn", pattern("\\b\\d{3}-\\d{2}-\\d{4}\\b")),
        ("email", pattern("\\b[a-z0-9._%+-]+@[a-z0-9.-]+\\.[a-z]{2,}\\b")),
        ("phone", pattern("\\b\\d{3}[-.]\\d{3}[-.]\\d{4}\\b")),
    ]
});

static HARMFUL_CONTENT: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        "how\\s+to\\s+(?:make|build)\\s+(?:a\\s+)?(?:bomb|explosive)",
        "synthesi[sz]e\\s+(?:meth|ricin|sarin)",
    ]
    .iter()
    .map(|p| pattern(p))
    .collect()
});

/// Result of the inbound content screen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboundScreen {
    /// True if any pattern matched.
    pub flagged: bool,
    /// Which pattern families matched.
    pub flags: Vec<String>,
    /// Confidence that the content should be blocked, 0.0..=1.0.
    pub confidence: f64,
}

impl InboundScreen {
    fn clean() -> Self {
        Self {
            flagged: false,
            flags: Vec::new(),
            confidence: 0.0,
        }
    }
}

/// Result of the outbound content screen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundScreen {
    /// True if any pattern matched.
    pub flagged: bool,
    /// Which pattern families matched.
    pub flags: Vec<String>,
}

/// Canonical error family for canned responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SafeResponseKind {
    Profanity,
    PromptInjection,
    RateLimit,
    Validation,
    ProviderError,
    QuotaExceeded,
    Default,
}

/// Canned assistant response substituted when a turn cannot be answered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafeResponse {
    /// Short canned message shown to the user.
    pub message: String,
    /// Error family the response was generated for.
    pub error_type: SafeResponseKind,
    /// Whether the client may usefully re-send the turn.
    pub retryable: bool,
}

/// Inbound message fields subject to schema validation.
#[derive(Debug, Clone)]
pub struct MessageInput<'a> {
    pub content: &'a str,
    pub role: &'a str,
    pub session_id: &'a str,
}

/// Session-creation fields subject to schema validation.
#[derive(Debug, Clone, Default)]
pub struct SessionCreateInput<'a> {
    pub provider: &'a str,
    pub model: Option<&'a str>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<&'a str>,
}

/// The safety gate. Holds the block threshold; patterns are process-wide.
#[derive(Debug, Clone)]
pub struct SafetyGate {
    /// Inbound screens block only above this confidence. Conservative by
    /// default; a tunable knob.
    block_threshold: f64,
}

impl Default for SafetyGate {
    fn default() -> Self {
        Self::new(0.95)
    }
}

impl SafetyGate {
    /// Creates a gate with the given inbound block threshold.
    pub fn new(block_threshold: f64) -> Self {
        Self { block_threshold }
    }

    /// Returns the configured block threshold.
    pub fn block_threshold(&self) -> f64 {
        self.block_threshold
    }

    /// Validates an inbound message envelope.
    pub fn validate_message(&self, input: &MessageInput<'_>) -> Result<(), CoreError> {
        let len = input.content.chars().count();
        if len == 0 {
            return Err(CoreError::validation("content", "Message content is required"));
        }
        if len > MAX_MESSAGE_LENGTH {
            return Err(CoreError::validation(
                "content",
                format!("Message content exceeds {} characters", MAX_MESSAGE_LENGTH),
            )
            .with_detail("max", MAX_MESSAGE_LENGTH.to_string()));
        }
        if !matches!(input.role, "user" | "assistant" | "system") {
            return Err(CoreError::validation(
                "role",
                format!("Unknown message role '{}'", input.role),
            ));
        }
        if uuid::Uuid::parse_str(input.session_id).is_err() {
            return Err(CoreError::validation(
                "sessionId",
                "Session id must be a UUID",
            ));
        }
        Ok(())
    }

    /// Validates session-creation parameters against `known_providers`.
    pub fn validate_session_create(
        &self,
        input: &SessionCreateInput<'_>,
        known_providers: &[&str],
    ) -> Result<(), CoreError> {
        if !known_providers.contains(&input.provider) {
            return Err(CoreError::validation(
                "provider",
                format!("Unknown provider '{}'", input.provider),
            ));
        }
        if let Some(t) = input.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(CoreError::validation(
                    "temperature",
                    "Temperature must be between 0 and 2",
                ));
            }
        }
        if let Some(m) = input.max_tokens {
            if !(1..=4_000).contains(&m) {
                return Err(CoreError::validation(
                    "maxTokens",
                    "maxTokens must be between 1 and 4000",
                ));
            }
        }
        if let Some(p) = input.system_prompt {
            if p.chars().count() > MAX_SYSTEM_PROMPT_LENGTH {
                return Err(CoreError::validation(
                    "systemPrompt",
                    format!(
                        "System prompt exceeds {} characters",
                        MAX_SYSTEM_PROMPT_LENGTH
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Screens inbound user content for profanity and prompt injection.
    ///
    /// Confidence grows with the number of matches: `1 - 0.6^n`. One match
    /// stays well under the default block threshold; blocking requires a
    /// message saturated with suspicious patterns.
    pub fn screen_inbound(&self, text: &str) -> InboundScreen {
        if text.len() < SCREEN_BYPASS_LENGTH && !has_suspicious_tokens(text) {
            return InboundScreen::clean();
        }

        let mut flags = Vec::new();
        let mut matches = 0usize;

        for re in PROFANITY.iter() {
            let n = re.find_iter(text).count();
            if n > 0 {
                matches += n;
                if !flags.iter().any(|f| f == "profanity") {
                    flags.push("profanity".to_string());
                }
            }
        }
        for re in PROMPT_INJECTION.iter() {
            let n = re.find_iter(text).count();
            if n > 0 {
                matches += n;
                if !flags.iter().any(|f| f == "prompt-injection") {
                    flags.push("prompt-injection".to_string());
                }
            }
        }

        if matches == 0 {
            return InboundScreen::clean();
        }

        let confidence = 1.0 - 0.6f64.powi(matches as i32);
        InboundScreen {
            flagged: true,
            flags,
            confidence,
        }
    }

    /// Returns true when an inbound screen result should block the turn.
    pub fn should_block(&self, screen: &InboundScreen) -> bool {
        screen.flagged && screen.confidence > self.block_threshold
    }

    /// Screens outbound provider text for sensitive data and harmful content.
    pub fn screen_outbound(&self, text: &str) -> OutboundScreen {
        let mut flags = Vec::new();

        if SENSITIVE_DATA.iter().any(|(_, re)| re.is_match(text)) {
            flags.push("sensitive-data".to_string());
        }
        if HARMFUL_CONTENT.iter().any(|re| re.is_match(text)) {
            flags.push("harmful-content".to_string());
        }

        OutboundScreen {
            flagged: !flags.is_empty(),
            flags,
        }
    }

    /// Produces the canned response for a failed or refused turn.
    pub fn safe_response(&self, err: &CoreError) -> SafeResponse {
        let (kind, message, retryable) = match err.kind() {
            ErrorKind::SafetyBlock => {
                if err.details.get("flag").map(String::as_str) == Some("profanity") {
                    (
                        SafeResponseKind::Profanity,
                        "I can't help with that phrasing. Could you rephrase your message?",
                        false,
                    )
                } else {
                    (
                        SafeResponseKind::PromptInjection,
                        "I can't follow those instructions. Let's get back to your question.",
                        false,
                    )
                }
            }
            ErrorKind::RateLimited => (
                SafeResponseKind::RateLimit,
                "You're sending messages a little too quickly. Please wait a moment and try again.",
                true,
            ),
            ErrorKind::Validation => (
                SafeResponseKind::Validation,
                "That message couldn't be processed. Please check it and try again.",
                false,
            ),
            ErrorKind::ProviderError => (
                SafeResponseKind::ProviderError,
                "I'm having trouble reaching the model right now. Please try again shortly.",
                true,
            ),
            ErrorKind::QuotaExceeded => (
                SafeResponseKind::QuotaExceeded,
                "You've reached your daily usage limit. Your quota resets tomorrow.",
                false,
            ),
            _ => (
                SafeResponseKind::Default,
                "Something went wrong on our side. Please try again.",
                true,
            ),
        };

        SafeResponse {
            message: message.to_string(),
            error_type: kind,
            retryable,
        }
    }
}

/// Tokens that disqualify a short message from the screen bypass.
fn has_suspicious_tokens(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("system") || lower.contains("ignore")
}
