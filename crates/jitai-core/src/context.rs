use crate::clock::{is_weekend, to_millis};
use crate::types::FrictionLevel;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Immutable snapshot of everything the host knows when a monitored app opens.
///
/// One context is built per evaluation; nothing in the engine mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterventionContext {
    pub timestamp_ms: i64,
    /// Local hour of day, 0..=23.
    pub hour: u8,
    /// ISO weekday, 1 = Monday .. 7 = Sunday.
    pub weekday: u8,
    pub is_weekend: bool,
    pub target_app: String,

    pub session_count_today: u32,
    pub session_duration_ms: i64,
    pub time_since_last_session_ms: Option<i64>,

    pub usage_today_ms: i64,
    pub usage_yesterday_ms: i64,
    pub weekly_average_ms: i64,
    pub goal_minutes: Option<u32>,
    pub is_over_goal: bool,
    pub streak_days: u32,

    pub friction_level: FrictionLevel,
    pub overlay_permission_granted: bool,

    pub quick_reopen_attempt: bool,
    pub rapid_app_switching: bool,
    pub extended_session: bool,
    pub first_open_of_day: bool,
}

impl Default for InterventionContext {
    fn default() -> Self {
        Self {
            timestamp_ms: 0,
            hour: 12,
            weekday: 1,
            is_weekend: false,
            target_app: String::new(),
            session_count_today: 0,
            session_duration_ms: 0,
            time_since_last_session_ms: None,
            usage_today_ms: 0,
            usage_yesterday_ms: 0,
            weekly_average_ms: 0,
            goal_minutes: None,
            is_over_goal: false,
            streak_days: 0,
            friction_level: FrictionLevel::Gentle,
            overlay_permission_granted: true,
            quick_reopen_attempt: false,
            rapid_app_switching: false,
            extended_session: false,
            first_open_of_day: false,
        }
    }
}

impl InterventionContext {
    /// Starts a context for `target_app` with calendar fields derived from `now`.
    #[must_use]
    pub fn new(now: OffsetDateTime, target_app: impl Into<String>) -> Self {
        Self {
            timestamp_ms: to_millis(now),
            hour: now.hour(),
            weekday: now.weekday().number_from_monday(),
            is_weekend: is_weekend(now),
            target_app: target_app.into(),
            ..Self::default()
        }
    }

    /// Share of the daily goal already used, if a goal is set.
    #[must_use]
    pub fn goal_progress(&self) -> Option<f64> {
        let goal = self.goal_minutes.filter(|g| *g > 0)?;
        #[allow(clippy::cast_precision_loss)]
        let used_minutes = self.usage_today_ms as f64 / 60_000.0;
        Some(used_minutes / f64::from(goal))
    }

    #[must_use]
    pub fn is_late_night(&self) -> bool {
        self.hour >= 22 || self.hour < 5
    }

    #[must_use]
    pub fn is_early_morning(&self) -> bool {
        (5..9).contains(&self.hour)
    }
}
