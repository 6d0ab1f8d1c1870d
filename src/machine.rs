use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::{ForcedRunConfig, ForcedRunMode};
use crate::permissions::PermissionStatus;
use crate::policy;
use crate::state::{EnforcementPhase, EnforcementState};

/// Input driving a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementEvent {
    /// Periodic re-evaluation from the loop timer
    Tick,
    /// The host authenticated the user and asked to engage
    ActivationGranted { session: Uuid },
    /// The session is no longer authenticated
    ActivationRevoked,
    /// The host swapped in a new config
    ConfigChanged,
    /// Password-verified emergency override
    EmergencyExitAccepted,
}

/// Pure transition function: equal inputs give equal outputs, no side
/// effects beyond the returned snapshot.
///
/// Enforcement only engages for a granted activation; every path into
/// `Inactive` disarms, so a later `Tick` cannot re-engage on its own.
/// `degraded` is recomputed on every transition and never forces a phase
/// change.
pub fn transition(
    prev: &EnforcementState,
    config: &ForcedRunConfig,
    now: DateTime<Utc>,
    permissions: &PermissionStatus,
    event: &EnforcementEvent,
) -> EnforcementState {
    let degraded = !permissions.fully_granted;

    match event {
        // the sole paths out of ACTIVE/BLOCKED before the natural
        // schedule/countdown condition
        EnforcementEvent::EmergencyExitAccepted | EnforcementEvent::ActivationRevoked => {
            released(degraded)
        }

        EnforcementEvent::ActivationGranted { session } => {
            if !config.enabled {
                return released(degraded);
            }
            // re-granting while armed keeps the original session and
            // countdown; starting twice equals starting once
            let (session, deadline) = match prev.session {
                Some(existing) => (existing, prev.countdown_deadline),
                None => (*session, None),
            };
            evaluate(prev, config, now, degraded, session, deadline)
        }

        EnforcementEvent::Tick | EnforcementEvent::ConfigChanged => {
            let Some(session) = prev.session else {
                return released(degraded);
            };
            if !config.enabled {
                return released(degraded);
            }
            evaluate(prev, config, now, degraded, session, prev.countdown_deadline)
        }
    }
}

fn released(degraded: bool) -> EnforcementState {
    EnforcementState {
        phase: EnforcementPhase::Inactive,
        remaining_seconds: 0,
        degraded,
        session: None,
        countdown_deadline: None,
    }
}

fn evaluate(
    prev: &EnforcementState,
    config: &ForcedRunConfig,
    now: DateTime<Utc>,
    degraded: bool,
    session: Uuid,
    deadline: Option<DateTime<Utc>>,
) -> EnforcementState {
    if !policy::can_enter_app(config, now) {
        // schedule mode outside every window; countdown mode never lands here
        let remaining = policy::time_until_next_access(config, now)
            .num_seconds()
            .max(0);
        return EnforcementState {
            phase: EnforcementPhase::Blocked,
            remaining_seconds: remaining,
            degraded,
            session: Some(session),
            countdown_deadline: None,
        };
    }

    if !policy::is_in_forced_run_period(config, now) {
        return released(degraded);
    }

    match config.mode {
        ForcedRunMode::Schedule => EnforcementState {
            phase: EnforcementPhase::Active,
            remaining_seconds: 0,
            degraded,
            session: Some(session),
            countdown_deadline: None,
        },
        ForcedRunMode::Countdown => {
            // derive remaining from a fixed deadline: equal `now` gives an
            // equal result, and missed ticks cannot stretch the countdown.
            // A shrunk countdown_seconds clamps the deadline; a grown one
            // does not extend an in-flight session.
            let bound = now + Duration::seconds(config.countdown_seconds);
            let deadline = deadline.unwrap_or(bound).min(bound);
            let remaining = (deadline - now).num_seconds().max(0);

            if remaining == 0
                && prev.phase == EnforcementPhase::Active
                && prev.remaining_seconds == 0
            {
                // the exhausted countdown was already published once;
                // natural release
                return released(degraded);
            }

            EnforcementState {
                phase: EnforcementPhase::Active,
                remaining_seconds: remaining,
                degraded,
                session: Some(session),
                countdown_deadline: Some(deadline),
            }
        }
    }
}
