use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::{self, ExitAttemptLimiter};
use crate::clock::{Clock, SystemClock};
use crate::config::{self, ForcedRunConfig, ProtectionLevel, SharedConfig};
use crate::gate::HardwareGate;
use crate::machine::{self, EnforcementEvent};
use crate::permissions::{self, CapabilityProvider, PermissionStatus};
use crate::platform::{self, PlatformCommands};
use crate::policy;
use crate::state::{EnforcementPhase, EnforcementState};

/// Tick interval of the enforcement loop.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

enum Command {
    Start { config: ForcedRunConfig, session: Uuid },
    Stop,
    ConfigChanged { config: ForcedRunConfig },
    EmergencyExit,
    Shutdown,
}

/// The enforcement loop: the only long-lived actor in the engine.
///
/// One engine is constructed per shell session and handed to the UI and
/// hardware-gate layers; there is no process-wide instance. All state
/// transitions execute on the single loop task: external events are
/// enqueued and evaluated in arrival order, never applied from the
/// caller's thread, and each resulting snapshot is published whole.
pub struct ForcedRunEngine {
    config: SharedConfig,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<EnforcementState>,
    clock: Arc<dyn Clock>,
    platform: Arc<dyn PlatformCommands>,
    capabilities: Arc<dyn CapabilityProvider>,
    tick_interval: Duration,
    exit_limiter: Option<Mutex<ExitAttemptLimiter>>,
    parts: Mutex<Option<LoopParts>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Loop ends moved into the task at `start`.
struct LoopParts {
    commands: mpsc::UnboundedReceiver<Command>,
    publisher: watch::Sender<EnforcementState>,
}

impl ForcedRunEngine {
    pub fn new(
        config: ForcedRunConfig,
        platform: Arc<dyn PlatformCommands>,
        capabilities: Arc<dyn CapabilityProvider>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(EnforcementState::inactive());

        Self {
            config: Arc::new(RwLock::new(config)),
            commands: command_tx,
            state: state_rx,
            clock: Arc::new(SystemClock),
            platform,
            capabilities,
            tick_interval: DEFAULT_TICK_INTERVAL,
            exit_limiter: None,
            parts: Mutex::new(Some(LoopParts {
                commands: command_rx,
                publisher: state_tx,
            })),
            task: Mutex::new(None),
        }
    }

    /// Replace the wall clock, for tests driving a fabricated timeline.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Install an emergency-exit attempt limit; retries are unlimited
    /// without one.
    pub fn with_exit_attempt_limit(mut self, max_attempts: usize, window: Duration) -> Self {
        self.exit_limiter = Some(Mutex::new(ExitAttemptLimiter::new(max_attempts, window)));
        self
    }

    /// Spawn the enforcement loop. Must be called once, from within a
    /// tokio runtime.
    pub fn start(&self) -> Result<()> {
        let parts = self
            .parts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| anyhow!("enforcement loop is already running"))?;

        let enforcement_loop = EnforcementLoop {
            config: self.config.clone(),
            clock: self.clock.clone(),
            platform: self.platform.clone(),
            capabilities: self.capabilities.clone(),
            publisher: parts.publisher,
        };

        let handle = tokio::spawn(enforcement_loop.run(parts.commands, self.tick_interval));
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        info!("Enforcement loop started");
        Ok(())
    }

    /// Engage enforcement for an authenticated session. Idempotent:
    /// starting an already-started session leaves its state unchanged.
    pub fn start_forced_run_mode(&self, config: ForcedRunConfig, session: Uuid) -> Result<()> {
        self.send(Command::Start { config, session })
    }

    /// Release enforcement for the current session. A no-op while
    /// already inactive.
    pub fn stop_forced_run_mode(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    /// Swap in a new config; re-evaluated immediately, not on the next
    /// tick.
    pub fn update_config(&self, config: ForcedRunConfig) -> Result<()> {
        self.send(Command::ConfigChanged { config })
    }

    /// Validate an emergency-exit password attempt.
    ///
    /// A correct password is the only input that releases enforcement
    /// before its natural schedule/countdown condition; a wrong one
    /// leaves the state untouched and returns false.
    pub fn emergency_exit(&self, password: &str) -> Result<bool> {
        let emergency = config::read_shared(&self.config).emergency_exit;

        if !emergency.allow {
            debug!("Emergency exit attempted but not allowed by config");
            return Ok(false);
        }
        let Some(configured) = emergency.password else {
            return Ok(false);
        };

        if let Some(limiter) = &self.exit_limiter {
            let mut limiter = limiter.lock().unwrap_or_else(|e| e.into_inner());
            if !limiter.try_attempt() {
                info!("Emergency exit attempt rejected: rate limited");
                return Ok(false);
            }
        }

        if auth::verify_password(password, &configured) {
            info!("Emergency exit accepted");
            self.send(Command::EmergencyExit)?;
            Ok(true)
        } else {
            info!("Emergency exit rejected: wrong password");
            Ok(false)
        }
    }

    /// Capability verdict for a protection level, from the host's current
    /// snapshot. Queried by the activation flow to drive the permission
    /// prompt.
    pub fn check_protection_permissions(&self, level: ProtectionLevel) -> PermissionStatus {
        permissions::evaluate(level, &self.capabilities.snapshot())
    }

    /// Subscribe to published state snapshots.
    pub fn subscribe(&self) -> watch::Receiver<EnforcementState> {
        self.state.clone()
    }

    /// The most recently published snapshot.
    pub fn state(&self) -> EnforcementState {
        self.state.borrow().clone()
    }

    /// Build a hardware gate wired to this engine's state and config.
    pub fn hardware_gate(&self) -> HardwareGate {
        HardwareGate::new(self.subscribe(), self.config.clone(), self.clock.clone())
    }

    pub fn config(&self) -> ForcedRunConfig {
        config::read_shared(&self.config)
    }

    /// Whether "now" is an allowed entry time under the current config.
    pub fn can_enter_app(&self) -> bool {
        policy::can_enter_app(&self.config(), self.clock.now())
    }

    /// Time until the next allowed entry instant under the current config.
    pub fn time_until_next_access(&self) -> chrono::Duration {
        policy::time_until_next_access(&self.config(), self.clock.now())
    }

    /// Whether kiosk lock-in applies right now under the current config.
    pub fn is_in_forced_run_period(&self) -> bool {
        policy::is_in_forced_run_period(&self.config(), self.clock.now())
    }

    /// Stop the loop and wait for its teardown: any held wake-lock and
    /// lock-task state is released, without requiring password validation,
    /// since the session itself is ending.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow!("enforcement loop is not running"))
    }
}

struct EnforcementLoop {
    config: SharedConfig,
    clock: Arc<dyn Clock>,
    platform: Arc<dyn PlatformCommands>,
    capabilities: Arc<dyn CapabilityProvider>,
    publisher: watch::Sender<EnforcementState>,
}

impl EnforcementLoop {
    async fn run(self, mut commands: mpsc::UnboundedReceiver<Command>, tick: Duration) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.apply(&EnforcementEvent::Tick);
                }
                command = commands.recv() => match command {
                    Some(Command::Start { config, session }) => {
                        self.replace_config(config);
                        self.apply(&EnforcementEvent::ActivationGranted { session });
                    }
                    Some(Command::Stop) => {
                        self.apply(&EnforcementEvent::ActivationRevoked);
                    }
                    Some(Command::ConfigChanged { config }) => {
                        self.replace_config(config);
                        self.apply(&EnforcementEvent::ConfigChanged);
                    }
                    Some(Command::EmergencyExit) => {
                        self.apply(&EnforcementEvent::EmergencyExitAccepted);
                    }
                    Some(Command::Shutdown) | None => break,
                },
            }
        }

        self.teardown();
    }

    fn replace_config(&self, config: ForcedRunConfig) {
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
    }

    fn apply(&self, event: &EnforcementEvent) {
        let config = config::read_shared(&self.config);
        let status = permissions::evaluate(config.protection_level, &self.capabilities.snapshot());
        let now = self.clock.now();

        let prev = self.publisher.borrow().clone();
        let next = machine::transition(&prev, &config, now, &status, event);

        self.run_edge_effects(&prev, &next, &config);

        if next != prev {
            self.publisher.send_replace(next);
        }
    }

    fn run_edge_effects(&self, prev: &EnforcementState, next: &EnforcementState, config: &ForcedRunConfig) {
        if next.phase == EnforcementPhase::Active && prev.phase != EnforcementPhase::Active {
            info!(
                "Enforcement engaged (mode {:?}, degraded {})",
                config.mode, next.degraded
            );
            platform::best_effort("acquire wake lock", self.platform.acquire_wake_lock());
            platform::best_effort("start lock task", self.platform.start_lock_task());
        }

        if next.phase == EnforcementPhase::Blocked && prev.phase != EnforcementPhase::Blocked {
            if next.blocked_indefinitely() {
                info!("App entry blocked; no upcoming access window");
            } else {
                info!("App entry blocked for {}s", next.remaining_seconds);
            }
        }

        if next.phase == EnforcementPhase::Inactive && prev.phase != EnforcementPhase::Inactive {
            info!("Enforcement released");
            platform::best_effort("release wake lock", self.platform.release_wake_lock());
            platform::best_effort("stop lock task", self.platform.stop_lock_task());
        }

        // countdown exhaustion is published once before the natural release
        if config.mode == crate::config::ForcedRunMode::Countdown
            && next.phase == EnforcementPhase::Active
            && next.remaining_seconds == 0
            && (prev.phase != EnforcementPhase::Active || prev.remaining_seconds > 0)
        {
            info!("Countdown finished; releasing on next evaluation");
        }
    }

    fn teardown(&self) {
        let last = self.publisher.borrow().clone();
        if last.is_enforcing() {
            platform::best_effort("release wake lock", self.platform.release_wake_lock());
            platform::best_effort("stop lock task", self.platform.stop_lock_task());
        }
        self.publisher.send_replace(EnforcementState::inactive());
        info!("Enforcement loop stopped");
    }
}
