//! Notification prompt gating.

use chrono::{DateTime, Duration, Utc};

use crate::storage::PersistedAppState;

/// Seconds between two prompts (three days).
pub const DEFAULT_PROMPT_COOLDOWN_SECS: i64 = 259_200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptPolicy {
    cooldown: Duration,
}

impl Default for PromptPolicy {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_PROMPT_COOLDOWN_SECS))
    }
}

impl PromptPolicy {
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// A prompt is allowed only if the user never accepted, was never
    /// system-denied, and the last prompt is strictly older than the cooldown.
    pub fn should_prompt(&self, state: &PersistedAppState, now: DateTime<Utc>) -> bool {
        if state.notifications_accepted || state.notifications_system_denied {
            return false;
        }
        match state.last_notification_prompt_at {
            Some(last) => now - last > self.cooldown,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_prompted_at(at: DateTime<Utc>) -> PersistedAppState {
        PersistedAppState {
            last_notification_prompt_at: Some(at),
            ..Default::default()
        }
    }

    #[test]
    fn never_prompted_allows() {
        assert!(PromptPolicy::default().should_prompt(&PersistedAppState::default(), Utc::now()));
    }

    #[test]
    fn accepted_or_denied_blocks() {
        let policy = PromptPolicy::default();
        let accepted = PersistedAppState {
            notifications_accepted: true,
            ..Default::default()
        };
        let denied = PersistedAppState {
            notifications_system_denied: true,
            ..Default::default()
        };
        assert!(!policy.should_prompt(&accepted, Utc::now()));
        assert!(!policy.should_prompt(&denied, Utc::now()));
    }

    #[test]
    fn cooldown_boundary_is_exclusive() {
        let policy = PromptPolicy::default();
        let last = Utc::now();
        let state = state_prompted_at(last);

        assert!(!policy.should_prompt(&state, last + Duration::seconds(259_199)));
        assert!(!policy.should_prompt(&state, last + Duration::seconds(259_200)));
        assert!(policy.should_prompt(&state, last + Duration::seconds(259_201)));
    }

    #[test]
    fn custom_cooldown() {
        let policy = PromptPolicy::new(Duration::seconds(60));
        let last = Utc::now();
        assert!(policy.should_prompt(&state_prompted_at(last), last + Duration::seconds(61)));
    }
}
