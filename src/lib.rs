//! Forced-run ("kiosk") enforcement engine for app shells
//!
//! This crate provides the core that locks a shell into an unexitable,
//! app-only mode:
//! - Evaluate weekly access windows and countdowns
//! - Drive an explicit enforcement state machine from a periodic loop
//! - Publish immutable state snapshots to the host UI and hardware gate
//! - Swallow hardware input while enforcement is active
//! - Gate early release on an emergency password
//! - Degrade gracefully when the OS denies a protection level's
//!   capabilities
//!
//! The host supplies a validated [`ForcedRunConfig`] and capability
//! snapshots; rendering, permission dialogs and the real OS calls live
//! outside, behind the [`PlatformCommands`] boundary.

pub mod auth;
pub mod clock;
pub mod config;
pub mod engine;
pub mod gate;
pub mod machine;
pub mod permissions;
pub mod platform;
pub mod policy;
pub mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BlockingConfig, EmergencyExitConfig, ForcedRunConfig, ForcedRunMode, ProtectionLevel,
    SharedConfig, TimeWindow, EXAMPLE_CONFIG, load_config, validate_config,
};
pub use engine::{DEFAULT_TICK_INTERVAL, ForcedRunEngine};
pub use gate::{ExitAttempt, HardwareGate, HardwareKey, KeyEvent};
pub use machine::{EnforcementEvent, transition};
pub use permissions::{
    Capability, CapabilityProvider, CapabilitySnapshot, PermissionStatus, evaluate,
    required_capabilities,
};
pub use platform::{NoopPlatform, PlatformCommands};
pub use policy::{NO_UPCOMING_ACCESS, can_enter_app, is_in_forced_run_period, time_until_next_access};
pub use state::{EnforcementPhase, EnforcementState};
