use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::policy::NO_UPCOMING_ACCESS;

/// Enforcement phase published to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementPhase {
    /// No enforcement running
    Inactive,
    /// Kiosk lock-in engaged
    Active,
    /// App entry disallowed until the next access window
    Blocked,
}

/// Immutable state snapshot published by the enforcement loop.
///
/// Subscribers always observe a complete value; the loop swaps whole
/// snapshots, never fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnforcementState {
    pub phase: EnforcementPhase,

    /// Seconds until countdown auto-release (active countdown) or until
    /// the next access window opens (blocked); zero otherwise. Never
    /// negative.
    pub remaining_seconds: i64,

    /// Enforcement is running without every capability its protection
    /// level asks for.
    pub degraded: bool,

    /// The granted activation this snapshot belongs to; `None` exactly
    /// while enforcement is disarmed.
    pub session: Option<Uuid>,

    /// Countdown release instant; bookkeeping behind `remaining_seconds`.
    #[serde(skip)]
    pub(crate) countdown_deadline: Option<DateTime<Utc>>,
}

impl EnforcementState {
    /// Disarmed initial state.
    pub fn inactive() -> Self {
        Self {
            phase: EnforcementPhase::Inactive,
            remaining_seconds: 0,
            degraded: false,
            session: None,
            countdown_deadline: None,
        }
    }

    pub fn is_enforcing(&self) -> bool {
        self.phase != EnforcementPhase::Inactive
    }

    pub fn armed(&self) -> bool {
        self.session.is_some()
    }

    /// Blocked with no window ever opening.
    pub fn blocked_indefinitely(&self) -> bool {
        self.phase == EnforcementPhase::Blocked
            && self.remaining_seconds >= NO_UPCOMING_ACCESS.num_seconds()
    }
}

impl Default for EnforcementState {
    fn default() -> Self {
        Self::inactive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_disarmed() {
        let state = EnforcementState::inactive();
        assert_eq!(state.phase, EnforcementPhase::Inactive);
        assert_eq!(state.remaining_seconds, 0);
        assert!(!state.degraded);
        assert!(!state.armed());
        assert!(!state.is_enforcing());
    }

    #[test]
    fn test_blocked_indefinitely_needs_sentinel() {
        let mut state = EnforcementState::inactive();
        state.phase = EnforcementPhase::Blocked;
        state.remaining_seconds = 3600;
        assert!(!state.blocked_indefinitely());

        state.remaining_seconds = NO_UPCOMING_ACCESS.num_seconds();
        assert!(state.blocked_indefinitely());
    }

    #[test]
    fn test_serializes_without_bookkeeping() {
        let state = EnforcementState::inactive();
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["phase"], "inactive");
        assert!(json.get("countdown_deadline").is_none());
    }
}
