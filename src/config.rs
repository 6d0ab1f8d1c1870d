use anyhow::{Context, Result};
use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Forced-run configuration supplied by the host shell.
///
/// Loaded from YAML and validated before it reaches the engine; the core
/// transition logic assumes a validated config.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ForcedRunConfig {
    /// Master switch; a disabled config never engages enforcement
    #[serde(default)]
    pub enabled: bool,

    /// Enforcement mode
    #[serde(default)]
    pub mode: ForcedRunMode,

    /// Protection tier mapping to the OS capabilities enforcement wants
    #[serde(default)]
    pub protection_level: ProtectionLevel,

    /// Countdown mode: seconds until automatic release
    #[serde(default)]
    pub countdown_seconds: i64,

    /// Schedule mode: weekly access windows; empty means the app never opens
    #[serde(default)]
    pub windows: Vec<TimeWindow>,

    /// Hardware events swallowed while enforcement is active
    #[serde(default)]
    pub blocking: BlockingConfig,

    /// Password-gated override that releases enforcement early
    #[serde(default)]
    pub emergency_exit: EmergencyExitConfig,

    /// Whether the host should render the countdown overlay
    #[serde(default = "default_true")]
    pub show_countdown: bool,
}

/// Config handle shared between the engine loop and its readers.
pub type SharedConfig = Arc<RwLock<ForcedRunConfig>>;

pub(crate) fn read_shared(config: &SharedConfig) -> ForcedRunConfig {
    config.read().unwrap_or_else(|e| e.into_inner()).clone()
}

fn default_true() -> bool {
    true
}

/// Enforcement mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ForcedRunMode {
    /// Lock in for a fixed duration after activation
    Countdown,
    /// Lock in during weekly access windows, block outside them
    Schedule,
}

impl Default for ForcedRunMode {
    fn default() -> Self {
        Self::Countdown
    }
}

/// Protection tier; stronger tiers require more OS capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtectionLevel {
    Basic,
    Standard,
    Strict,
}

impl Default for ProtectionLevel {
    fn default() -> Self {
        Self::Basic
    }
}

/// A weekly access window.
///
/// `start > end` wraps past midnight: `{days: [friday], start: "22:00",
/// end: "06:00"}` also covers Saturday 00:00-05:59.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TimeWindow {
    /// Days the window opens on (lowercase: monday, tuesday, ...)
    pub days: Vec<String>,

    /// Opening time of day, "HH:MM"
    pub start: String,

    /// Closing time of day, "HH:MM", exclusive
    pub end: String,
}

impl TimeWindow {
    pub fn weekdays(&self) -> Result<Vec<Weekday>> {
        self.days.iter().map(|d| parse_day_name(d)).collect()
    }

    /// Opening minute of day
    pub fn start_minute(&self) -> Result<u32> {
        parse_time_of_day(&self.start)
    }

    /// Closing minute of day, exclusive
    pub fn end_minute(&self) -> Result<u32> {
        parse_time_of_day(&self.end)
    }
}

/// Hardware blocking switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct BlockingConfig {
    /// Suppress the system bars/overlays (consumed by the host OS layer)
    #[serde(default = "default_true")]
    pub block_system_ui: bool,

    /// Swallow volume and mute keys
    #[serde(default = "default_true")]
    pub block_volume_keys: bool,

    /// Swallow the power key (best effort; the platform may act first)
    #[serde(default)]
    pub block_power_key: bool,

    /// Swallow touch events
    #[serde(default)]
    pub block_touch: bool,
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self {
            block_system_ui: true,
            block_volume_keys: true,
            block_power_key: false,
            block_touch: false,
        }
    }
}

/// Emergency-exit settings. A password is required exactly when the
/// override is allowed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct EmergencyExitConfig {
    #[serde(default)]
    pub allow: bool,

    #[serde(default)]
    pub password: Option<String>,
}

/// Parse a lowercase day name into a `Weekday`
pub(crate) fn parse_day_name(name: &str) -> Result<Weekday> {
    match name.to_lowercase().as_str() {
        "monday" => Ok(Weekday::Mon),
        "tuesday" => Ok(Weekday::Tue),
        "wednesday" => Ok(Weekday::Wed),
        "thursday" => Ok(Weekday::Thu),
        "friday" => Ok(Weekday::Fri),
        "saturday" => Ok(Weekday::Sat),
        "sunday" => Ok(Weekday::Sun),
        other => anyhow::bail!("Invalid day name: {}", other),
    }
}

/// Parse "HH:MM" into minutes since midnight
pub(crate) fn parse_time_of_day(value: &str) -> Result<u32> {
    let (hours, minutes) = value
        .split_once(':')
        .with_context(|| format!("Invalid time of day '{}', expected HH:MM", value))?;

    let hours: u32 = hours
        .parse()
        .with_context(|| format!("Invalid hour in '{}'", value))?;
    let minutes: u32 = minutes
        .parse()
        .with_context(|| format!("Invalid minute in '{}'", value))?;

    if hours > 23 || minutes > 59 {
        anyhow::bail!("Time of day '{}' out of range", value);
    }

    Ok(hours * 60 + minutes)
}

/// Load configuration from a YAML file
pub fn load_config(path: &Path) -> Result<ForcedRunConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: ForcedRunConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse YAML config file: {}", path.display()))?;

    validate_config(&config)?;

    Ok(config)
}

/// Validate configuration
pub fn validate_config(config: &ForcedRunConfig) -> Result<()> {
    if config.countdown_seconds < 0 {
        anyhow::bail!("countdown_seconds cannot be negative");
    }

    if config.mode == ForcedRunMode::Schedule {
        for (i, window) in config.windows.iter().enumerate() {
            validate_window(window).with_context(|| format!("Invalid window #{}", i + 1))?;
        }
    }

    if config.emergency_exit.allow {
        match &config.emergency_exit.password {
            Some(password) if !password.is_empty() => {}
            _ => anyhow::bail!("emergency_exit.allow requires a non-empty password"),
        }
    } else if config.emergency_exit.password.is_some() {
        anyhow::bail!("emergency_exit.password is set but emergency_exit.allow is false");
    }

    Ok(())
}

fn validate_window(window: &TimeWindow) -> Result<()> {
    if window.days.is_empty() {
        anyhow::bail!("Window must specify at least one day");
    }

    for day in &window.days {
        parse_day_name(day)?;
    }

    let start = parse_time_of_day(&window.start)?;
    let end = parse_time_of_day(&window.end)?;
    if start == end {
        anyhow::bail!("Window start and end must differ (both {})", window.start);
    }

    Ok(())
}

/// Example configuration file content
pub const EXAMPLE_CONFIG: &str = include_str!("../example-kiosk-config.yaml");
