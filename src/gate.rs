use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::clock::Clock;
use crate::config::{self, SharedConfig};
use crate::state::EnforcementState;

/// Hardware keys the shell's dispatch hooks report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareKey {
    VolumeUp,
    VolumeDown,
    Mute,
    Power,
    Back,
    Home,
    AppSwitch,
}

impl HardwareKey {
    fn is_exit_gesture(&self) -> bool {
        matches!(self, Self::Back | Self::Home | Self::AppSwitch)
    }
}

/// A raw key event as seen at a dispatch hook.
///
/// `event_time_ms` is the platform event timestamp; together with the key
/// it identifies the physical press across redundant dispatch hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: HardwareKey,
    pub event_time_ms: i64,
}

/// An exit gesture swallowed by the gate, forwarded so the host can show
/// "cannot exit" feedback instead of a silently dead button.
#[derive(Debug, Clone)]
pub struct ExitAttempt {
    pub key: HardwareKey,
    pub at: DateTime<Utc>,
    pub total: u64,
}

/// Decides per raw input event whether to consume it while enforcement is
/// active.
///
/// Reads the published state snapshot; it never mutates enforcement state
/// itself. The emergency-exit dialog's own input is not routed through
/// here - password validation reaches the engine directly.
pub struct HardwareGate {
    state: watch::Receiver<EnforcementState>,
    config: SharedConfig,
    clock: Arc<dyn Clock>,
    last_decision: Mutex<Option<(KeyEvent, bool)>>,
    exit_attempts: AtomicU64,
    exit_listener: Option<mpsc::UnboundedSender<ExitAttempt>>,
}

impl HardwareGate {
    pub fn new(
        state: watch::Receiver<EnforcementState>,
        config: SharedConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state,
            config,
            clock,
            last_decision: Mutex::new(None),
            exit_attempts: AtomicU64::new(0),
            exit_listener: None,
        }
    }

    /// Forward swallowed exit gestures to the host.
    pub fn with_exit_listener(mut self, listener: mpsc::UnboundedSender<ExitAttempt>) -> Self {
        self.exit_listener = Some(listener);
        self
    }

    /// Exit gestures swallowed so far.
    pub fn exit_attempts(&self) -> u64 {
        self.exit_attempts.load(Ordering::Relaxed)
    }

    /// Decide whether to consume a raw key event.
    ///
    /// Safe to call from more than one dispatch hook for the same physical
    /// event: a repeated `(event_time_ms, key)` pair returns the first
    /// decision without recounting exit attempts.
    pub fn handle_key_event(&self, event: KeyEvent) -> bool {
        let mut last = self
            .last_decision
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        if let Some((seen, decision)) = *last {
            if seen == event {
                return decision;
            }
        }

        let decision = self.decide(event);
        *last = Some((event, decision));
        decision
    }

    /// Decide whether to consume a raw touch event.
    pub fn handle_touch_event(&self) -> bool {
        if !self.state.borrow().is_enforcing() {
            return false;
        }
        config::read_shared(&self.config).blocking.block_touch
    }

    fn decide(&self, event: KeyEvent) -> bool {
        if !self.state.borrow().is_enforcing() {
            return false;
        }

        let blocking = config::read_shared(&self.config).blocking;
        match event.key {
            HardwareKey::VolumeUp | HardwareKey::VolumeDown | HardwareKey::Mute => {
                blocking.block_volume_keys
            }
            // best effort: the platform may act on the power key upstream
            HardwareKey::Power => blocking.block_power_key,
            HardwareKey::Back | HardwareKey::Home | HardwareKey::AppSwitch => {
                self.record_exit_attempt(event.key);
                true
            }
        }
    }

    fn record_exit_attempt(&self, key: HardwareKey) {
        debug_assert!(key.is_exit_gesture());
        let total = self.exit_attempts.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Blocked exit attempt #{} via {:?}", total, key);

        if let Some(listener) = &self.exit_listener {
            let _ = listener.send(ExitAttempt {
                key,
                at: self.clock.now(),
                total,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::{BlockingConfig, ForcedRunConfig};
    use crate::state::EnforcementPhase;
    use std::sync::RwLock;
    use uuid::Uuid;

    fn test_config(blocking: BlockingConfig) -> SharedConfig {
        let config: ForcedRunConfig = serde_yaml::from_str("enabled: true").unwrap();
        Arc::new(RwLock::new(ForcedRunConfig { blocking, ..config }))
    }

    fn active_state() -> EnforcementState {
        EnforcementState {
            phase: EnforcementPhase::Active,
            remaining_seconds: 0,
            degraded: false,
            session: Some(Uuid::new_v4()),
            countdown_deadline: None,
        }
    }

    fn gate_with(
        state: EnforcementState,
        blocking: BlockingConfig,
    ) -> (HardwareGate, watch::Sender<EnforcementState>) {
        let (tx, rx) = watch::channel(state);
        let gate = HardwareGate::new(rx, test_config(blocking), Arc::new(SystemClock));
        (gate, tx)
    }

    fn key(key: HardwareKey, event_time_ms: i64) -> KeyEvent {
        KeyEvent { key, event_time_ms }
    }

    #[test]
    fn test_inactive_passes_everything_through() {
        let (gate, _tx) = gate_with(EnforcementState::inactive(), BlockingConfig::default());

        assert!(!gate.handle_key_event(key(HardwareKey::Back, 1)));
        assert!(!gate.handle_key_event(key(HardwareKey::VolumeUp, 2)));
        assert!(!gate.handle_touch_event());
        assert_eq!(gate.exit_attempts(), 0);
    }

    #[test]
    fn test_exit_gestures_always_consumed_while_enforcing() {
        let (gate, _tx) = gate_with(active_state(), BlockingConfig::default());

        assert!(gate.handle_key_event(key(HardwareKey::Back, 1)));
        assert!(gate.handle_key_event(key(HardwareKey::Home, 2)));
        assert!(gate.handle_key_event(key(HardwareKey::AppSwitch, 3)));
        assert_eq!(gate.exit_attempts(), 3);
    }

    #[test]
    fn test_volume_keys_follow_flag() {
        let blocking = BlockingConfig {
            block_volume_keys: false,
            ..Default::default()
        };
        let (gate, _tx) = gate_with(active_state(), blocking);
        assert!(!gate.handle_key_event(key(HardwareKey::VolumeDown, 1)));

        let (gate, _tx) = gate_with(active_state(), BlockingConfig::default());
        assert!(gate.handle_key_event(key(HardwareKey::VolumeDown, 1)));
    }

    #[test]
    fn test_power_key_follows_flag() {
        let (gate, _tx) = gate_with(active_state(), BlockingConfig::default());
        assert!(!gate.handle_key_event(key(HardwareKey::Power, 1)));

        let blocking = BlockingConfig {
            block_power_key: true,
            ..Default::default()
        };
        let (gate, _tx) = gate_with(active_state(), blocking);
        assert!(gate.handle_key_event(key(HardwareKey::Power, 1)));
    }

    #[test]
    fn test_touch_follows_flag() {
        let blocking = BlockingConfig {
            block_touch: true,
            ..Default::default()
        };
        let (gate, _tx) = gate_with(active_state(), blocking);
        assert!(gate.handle_touch_event());
    }

    #[test]
    fn test_duplicate_dispatch_does_not_double_count() {
        let (gate, _tx) = gate_with(active_state(), BlockingConfig::default());

        let press = key(HardwareKey::Back, 42);
        assert!(gate.handle_key_event(press));
        // the second hook sees the same physical event
        assert!(gate.handle_key_event(press));
        assert_eq!(gate.exit_attempts(), 1);

        // a new timestamp is a new physical press
        assert!(gate.handle_key_event(key(HardwareKey::Back, 43)));
        assert_eq!(gate.exit_attempts(), 2);
    }

    #[test]
    fn test_blocked_phase_also_gates() {
        let mut state = active_state();
        state.phase = EnforcementPhase::Blocked;
        let (gate, _tx) = gate_with(state, BlockingConfig::default());

        assert!(gate.handle_key_event(key(HardwareKey::Back, 1)));
    }

    #[test]
    fn test_exit_listener_receives_attempts() {
        let (listener_tx, mut listener_rx) = mpsc::unbounded_channel();
        let (tx, rx) = watch::channel(active_state());
        let gate = HardwareGate::new(
            rx,
            test_config(BlockingConfig::default()),
            Arc::new(SystemClock),
        )
        .with_exit_listener(listener_tx);
        let _tx = tx;

        gate.handle_key_event(key(HardwareKey::Home, 7));

        let attempt = listener_rx.try_recv().unwrap();
        assert_eq!(attempt.key, HardwareKey::Home);
        assert_eq!(attempt.total, 1);
    }

    #[test]
    fn test_state_updates_are_observed() {
        let (gate, tx) = gate_with(EnforcementState::inactive(), BlockingConfig::default());
        assert!(!gate.handle_key_event(key(HardwareKey::Back, 1)));

        tx.send_replace(active_state());
        assert!(gate.handle_key_event(key(HardwareKey::Back, 2)));
    }
}
