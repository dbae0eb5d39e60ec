//! Opportunity scoring: is now a good moment to intervene?
//!
//! Six independently bounded factors are summed into a score that maps onto
//! an [`OpportunityLevel`] and a suggested [`InterventionAction`]. Results are
//! cached per target app for a short TTL.
//!
//! [`InterventionAction`]: jitai_core::InterventionAction

use crate::timing::TimingLearner;
use jitai_core::clock::{hour_distance, DAY_MS, MINUTE_MS};
use jitai_core::config::OpportunityConfig;
use jitai_core::{
    InterventionContext, InterventionRecord, OpportunityDetection, OpportunityFactor,
    OpportunityLevel, RecordQuery, Store,
};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Historical points when there is too little history to judge.
const NEUTRAL_HISTORY_POINTS: u32 = 10;
/// Answered records needed before history is judged at all.
const MIN_HISTORY_RECORDS: usize = 5;
const OVER_GOAL_TIME_BONUS: u32 = 5;

/// Population-level receptiveness for an hour, as (weekday, weekend) points.
#[must_use]
pub fn population_time_points(hour: u8) -> (u32, u32) {
    match hour % 24 {
        22 | 23 | 0..=4 => (20, 18),
        5..=8 => (12, 10),
        9..=11 => (10, 14),
        12..=17 => (14, 16),
        _ => (18, 20),
    }
}

/// Converts a go-back rate into historical-success points.
#[must_use]
pub fn history_points(rate: f64) -> u32 {
    match rate {
        r if r >= 0.70 => 20,
        r if r >= 0.50 => 15,
        r if r >= 0.30 => 10,
        r if r >= 0.15 => 5,
        _ => 2,
    }
}

#[derive(Debug)]
pub struct OpportunityScorer {
    config: OpportunityConfig,
    cache: HashMap<String, OpportunityDetection>,
}

impl Default for OpportunityScorer {
    fn default() -> Self {
        Self::new(OpportunityConfig::default())
    }
}

impl OpportunityScorer {
    #[must_use]
    pub fn new(config: OpportunityConfig) -> Self {
        Self {
            config,
            cache: HashMap::new(),
        }
    }

    fn ttl_ms(&self) -> i64 {
        i64::try_from(self.config.cache_ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
    }

    /// Drops the cached detection for one app.
    pub fn invalidate(&mut self, target_app: &str) {
        self.cache.remove(target_app);
    }

    pub fn invalidate_all(&mut self) {
        self.cache.clear();
    }

    /// Cached detection for `target_app`, if still fresh at `now_ms`.
    #[must_use]
    pub fn cached(&self, target_app: &str, now_ms: i64) -> Option<&OpportunityDetection> {
        self.cache
            .get(target_app)
            .filter(|d| now_ms - d.computed_at_ms < self.ttl_ms())
    }

    /// Scores the context, reading recent history from `store`.
    pub fn detect(
        &mut self,
        ctx: &InterventionContext,
        timing: &TimingLearner,
        store: &dyn Store,
        now_ms: i64,
    ) -> OpportunityDetection {
        if let Some(hit) = self.cached(&ctx.target_app, now_ms) {
            return hit.clone();
        }
        let since = now_ms - self.config.history_days.max(1).saturating_mul(DAY_MS);
        let history = store
            .interventions(
                &RecordQuery::all()
                    .app(ctx.target_app.as_str())
                    .since(since)
                    .limit(self.config.history_limit),
            )
            .unwrap_or_else(|err| {
                warn!(app = %ctx.target_app, error = %err, "history unavailable, scoring without it");
                Vec::new()
            });
        let detection = self.score(ctx, timing, &history, now_ms);
        self.cache.insert(ctx.target_app.clone(), detection.clone());
        detection
    }

    /// Uncached scoring over explicit history.
    #[must_use]
    pub fn score(
        &self,
        ctx: &InterventionContext,
        timing: &TimingLearner,
        history: &[InterventionRecord],
        now_ms: i64,
    ) -> OpportunityDetection {
        let (time_points, personalized) = time_receptiveness(ctx, timing);
        let mut factors = BTreeMap::new();
        factors.insert(OpportunityFactor::TimeReceptiveness, time_points);
        factors.insert(OpportunityFactor::SessionPattern, session_pattern(ctx));
        factors.insert(OpportunityFactor::CognitiveLoad, cognitive_load(ctx));
        factors.insert(
            OpportunityFactor::HistoricalSuccess,
            self.historical_success(ctx, history),
        );
        factors.insert(OpportunityFactor::UserState, user_state(ctx));
        factors.insert(OpportunityFactor::BehavioralCues, behavioral_cues(ctx));
        for (factor, points) in &mut factors {
            *points = (*points).min(factor.max_points());
        }

        let score: u32 = factors.values().sum();
        let level = OpportunityLevel::from_score(score);
        debug!(app = %ctx.target_app, score, ?level, personalized, "opportunity scored");
        OpportunityDetection {
            target_app: ctx.target_app.clone(),
            score,
            level,
            action: level.action(),
            factors,
            personalized_timing: personalized,
            computed_at_ms: now_ms,
        }
    }

    /// Go-back rate near the current hour, falling back to all history.
    fn historical_success(&self, ctx: &InterventionContext, history: &[InterventionRecord]) -> u32 {
        let answered: Vec<&InterventionRecord> =
            history.iter().filter(|r| r.is_answered()).collect();
        if answered.len() < MIN_HISTORY_RECORDS {
            return NEUTRAL_HISTORY_POINTS;
        }
        let window: Vec<&InterventionRecord> = answered
            .iter()
            .copied()
            .filter(|r| hour_distance(r.hour, ctx.hour) <= self.config.hour_window)
            .collect();
        let sample = if window.len() >= self.config.min_window_samples {
            window
        } else {
            answered
        };
        let back = sample.iter().filter(|r| r.is_go_back()).count();
        #[allow(clippy::cast_precision_loss)]
        let rate = back as f64 / sample.len() as f64;
        history_points(rate)
    }
}

fn time_receptiveness(ctx: &InterventionContext, timing: &TimingLearner) -> (u32, bool) {
    let max = OpportunityFactor::TimeReceptiveness.max_points();
    if let Some(estimate) = timing.lookup(&ctx.target_app, ctx.hour, ctx.is_weekend) {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let points = (estimate.rate.clamp(0.0, 1.0) * f64::from(max)).round() as u32;
        return (points.min(max), true);
    }
    let (weekday, weekend) = population_time_points(ctx.hour);
    let mut points = if ctx.is_weekend { weekend } else { weekday };
    if ctx.is_over_goal {
        points += OVER_GOAL_TIME_BONUS;
    }
    (points.min(max), false)
}

fn session_pattern(ctx: &InterventionContext) -> u32 {
    let mut points: u32 = match ctx.session_count_today {
        0 | 1 => 10,
        2..=4 => 8,
        5..=9 => 12,
        _ => 16,
    };
    match ctx.time_since_last_session_ms {
        Some(gap) if gap < 5 * MINUTE_MS => points += 4,
        Some(gap) if gap > 4 * 60 * MINUTE_MS => points = points.saturating_sub(2),
        _ => {}
    }
    points
}

/// Fewer points the busier the user seems.
fn cognitive_load(ctx: &InterventionContext) -> u32 {
    let mut points = OpportunityFactor::CognitiveLoad.max_points();
    if ctx.rapid_app_switching {
        points = points.saturating_sub(6);
    }
    if ctx.extended_session {
        points = points.saturating_sub(4);
    }
    if ctx.session_duration_ms > 20 * MINUTE_MS {
        points = points.saturating_sub(3);
    }
    if ctx.is_late_night() {
        points = points.saturating_sub(2);
    }
    points
}

fn user_state(ctx: &InterventionContext) -> u32 {
    let mut points = 5;
    if ctx.is_over_goal {
        points += 6;
    } else if ctx.goal_progress().is_some_and(|p| p >= 0.8) {
        points += 4;
    }
    if ctx.weekly_average_ms > 0 && ctx.usage_today_ms > ctx.weekly_average_ms {
        points += 2;
    }
    if ctx.usage_today_ms > ctx.usage_yesterday_ms && ctx.usage_yesterday_ms > 0 {
        points += 2;
    }
    if ctx.streak_days >= 3 {
        points += 2;
    }
    points
}

fn behavioral_cues(ctx: &InterventionContext) -> u32 {
    let mut points = 0;
    if ctx.quick_reopen_attempt {
        points += 8;
    }
    if ctx.rapid_app_switching {
        points += 4;
    }
    if ctx.extended_session {
        points += 4;
    }
    if ctx.first_open_of_day {
        points += 2;
    }
    points
}
