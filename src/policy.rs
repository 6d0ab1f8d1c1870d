use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use crate::config::{ForcedRunConfig, ForcedRunMode};

/// Sentinel returned by [`time_until_next_access`] when no window ever
/// opens; the host treats the app as permanently blocked.
pub const NO_UPCOMING_ACCESS: Duration = Duration::MAX;

/// Forward-scan bound: one full weekly cycle at minute granularity.
const SCAN_LIMIT_MINUTES: i64 = 7 * 24 * 60;

/// Whether `now` is an allowed entry time.
///
/// Countdown mode has no schedule gate, only an activation gate, so entry
/// is always allowed. Schedule mode requires `now` to fall inside at least
/// one window, with overnight wraparound handled.
pub fn can_enter_app(config: &ForcedRunConfig, now: DateTime<Utc>) -> bool {
    match config.mode {
        ForcedRunMode::Countdown => true,
        ForcedRunMode::Schedule => matches_any(&resolve_windows(config), now),
    }
}

/// Time until the next allowed entry instant.
///
/// Zero when entry is already allowed. Otherwise scans forward at minute
/// granularity, bounded by one weekly cycle; returns [`NO_UPCOMING_ACCESS`]
/// when the scan finds nothing (an empty window list included).
pub fn time_until_next_access(config: &ForcedRunConfig, now: DateTime<Utc>) -> Duration {
    if can_enter_app(config, now) {
        return Duration::zero();
    }

    let windows = resolve_windows(config);
    if windows.is_empty() {
        return NO_UPCOMING_ACCESS;
    }

    // walk forward from the top of the current minute
    let base = now
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);

    for step in 1..=SCAN_LIMIT_MINUTES {
        let candidate = base + Duration::minutes(step);
        if matches_any(&windows, candidate) {
            return candidate - now;
        }
    }

    NO_UPCOMING_ACCESS
}

/// Whether kiosk lock-in should be engaged right now.
///
/// Identical to [`can_enter_app`] for schedule mode; always true for
/// countdown mode (the armed gate lives in the state machine).
pub fn is_in_forced_run_period(config: &ForcedRunConfig, now: DateTime<Utc>) -> bool {
    match config.mode {
        ForcedRunMode::Countdown => true,
        ForcedRunMode::Schedule => can_enter_app(config, now),
    }
}

/// A window with day names and clock strings resolved to indices.
/// Days index from Monday = 0.
struct ResolvedWindow {
    days: [bool; 7],
    start: u32,
    end: u32,
}

impl ResolvedWindow {
    fn contains(&self, day: usize, minute: u32) -> bool {
        if self.start < self.end {
            self.days[day] && minute >= self.start && minute < self.end
        } else {
            // wraps past midnight: tail on the listed day, head on the next
            (self.days[day] && minute >= self.start)
                || (self.days[(day + 6) % 7] && minute < self.end)
        }
    }
}

fn resolve_windows(config: &ForcedRunConfig) -> Vec<ResolvedWindow> {
    config
        .windows
        .iter()
        .filter_map(|window| {
            let weekdays = window.weekdays().ok()?;
            let start = window.start_minute().ok()?;
            let end = window.end_minute().ok()?;
            if start == end {
                return None;
            }
            let mut days = [false; 7];
            for day in weekdays {
                days[day.num_days_from_monday() as usize] = true;
            }
            Some(ResolvedWindow { days, start, end })
        })
        .collect()
}

fn matches_any(windows: &[ResolvedWindow], at: DateTime<Utc>) -> bool {
    let day = at.weekday().num_days_from_monday() as usize;
    let minute = at.hour() * 60 + at.minute();
    windows.iter().any(|w| w.contains(day, minute))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ForcedRunMode, TimeWindow};
    use chrono::TimeZone;

    fn schedule_config(windows: Vec<TimeWindow>) -> ForcedRunConfig {
        ForcedRunConfig {
            enabled: true,
            mode: ForcedRunMode::Schedule,
            windows,
            ..countdown_config()
        }
    }

    fn countdown_config() -> ForcedRunConfig {
        ForcedRunConfig {
            enabled: true,
            mode: ForcedRunMode::Countdown,
            protection_level: Default::default(),
            countdown_seconds: 120,
            windows: vec![],
            blocking: Default::default(),
            emergency_exit: Default::default(),
            show_countdown: true,
        }
    }

    fn window(days: &[&str], start: &str, end: &str) -> TimeWindow {
        TimeWindow {
            days: days.iter().map(|d| d.to_string()).collect(),
            start: start.to_string(),
            end: end.to_string(),
        }
    }

    // 2026-01-02 is a Friday, 2026-01-03 a Saturday
    fn friday_night_config() -> ForcedRunConfig {
        schedule_config(vec![window(&["friday"], "22:00", "06:00")])
    }

    #[test]
    fn test_countdown_mode_always_enterable() {
        let config = countdown_config();
        let now = Utc.with_ymd_and_hms(2026, 1, 3, 12, 0, 0).unwrap();
        assert!(can_enter_app(&config, now));
        assert!(is_in_forced_run_period(&config, now));
        assert_eq!(time_until_next_access(&config, now), Duration::zero());
    }

    #[test]
    fn test_wraparound_matches_early_saturday() {
        let config = friday_night_config();
        let saturday_3am = Utc.with_ymd_and_hms(2026, 1, 3, 3, 0, 0).unwrap();
        assert!(can_enter_app(&config, saturday_3am));
    }

    #[test]
    fn test_saturday_noon_is_outside() {
        let config = friday_night_config();
        let saturday_noon = Utc.with_ymd_and_hms(2026, 1, 3, 12, 0, 0).unwrap();
        assert!(!can_enter_app(&config, saturday_noon));
    }

    #[test]
    fn test_next_access_spans_to_next_friday() {
        let config = friday_night_config();
        let saturday_noon = Utc.with_ymd_and_hms(2026, 1, 3, 12, 0, 0).unwrap();
        let next_friday_10pm = Utc.with_ymd_and_hms(2026, 1, 9, 22, 0, 0).unwrap();

        let until = time_until_next_access(&config, saturday_noon);
        assert_eq!(until, next_friday_10pm - saturday_noon);
        assert_eq!(until.num_seconds(), 554_400);
    }

    #[test]
    fn test_window_start_is_inclusive() {
        let config = friday_night_config();
        let friday_10pm = Utc.with_ymd_and_hms(2026, 1, 2, 22, 0, 0).unwrap();
        let friday_2159 = Utc.with_ymd_and_hms(2026, 1, 2, 21, 59, 0).unwrap();
        assert!(can_enter_app(&config, friday_10pm));
        assert!(!can_enter_app(&config, friday_2159));
    }

    #[test]
    fn test_window_end_is_exclusive() {
        let config = friday_night_config();
        let saturday_6am = Utc.with_ymd_and_hms(2026, 1, 3, 6, 0, 0).unwrap();
        let saturday_0559 = Utc.with_ymd_and_hms(2026, 1, 3, 5, 59, 0).unwrap();
        assert!(!can_enter_app(&config, saturday_6am));
        assert!(can_enter_app(&config, saturday_0559));
    }

    #[test]
    fn test_inside_window_next_access_is_zero() {
        let config = friday_night_config();
        let saturday_3am = Utc.with_ymd_and_hms(2026, 1, 3, 3, 0, 0).unwrap();
        assert_eq!(time_until_next_access(&config, saturday_3am), Duration::zero());
    }

    #[test]
    fn test_sub_minute_offsets_are_exact() {
        let config = friday_night_config();
        let almost = Utc.with_ymd_and_hms(2026, 1, 2, 21, 59, 30).unwrap();
        assert_eq!(time_until_next_access(&config, almost), Duration::seconds(30));
    }

    #[test]
    fn test_empty_schedule_is_permanently_blocked() {
        let config = schedule_config(vec![]);
        let now = Utc.with_ymd_and_hms(2026, 1, 3, 12, 0, 0).unwrap();
        assert!(!can_enter_app(&config, now));
        assert_eq!(time_until_next_access(&config, now), NO_UPCOMING_ACCESS);
    }

    #[test]
    fn test_earliest_of_multiple_windows_wins() {
        let config = schedule_config(vec![
            window(&["sunday"], "09:00", "10:00"),
            window(&["saturday"], "15:00", "16:00"),
        ]);
        let saturday_noon = Utc.with_ymd_and_hms(2026, 1, 3, 12, 0, 0).unwrap();
        assert_eq!(
            time_until_next_access(&config, saturday_noon),
            Duration::hours(3)
        );
    }

    #[test]
    fn test_forced_run_period_mirrors_schedule() {
        let config = friday_night_config();
        let inside = Utc.with_ymd_and_hms(2026, 1, 3, 3, 0, 0).unwrap();
        let outside = Utc.with_ymd_and_hms(2026, 1, 3, 12, 0, 0).unwrap();
        assert!(is_in_forced_run_period(&config, inside));
        assert!(!is_in_forced_run_period(&config, outside));
    }

    #[test]
    fn test_plain_window_does_not_leak_into_next_day() {
        let config = schedule_config(vec![window(&["friday"], "09:00", "17:00")]);
        let saturday_10am = Utc.with_ymd_and_hms(2026, 1, 3, 10, 0, 0).unwrap();
        assert!(!can_enter_app(&config, saturday_10am));

        let friday_10am = Utc.with_ymd_and_hms(2026, 1, 2, 10, 0, 0).unwrap();
        assert!(can_enter_app(&config, friday_10am));
    }
}
