//! Learned per-hour receptiveness and hour-level timing recommendations.
//!
//! [`TimingLearner`] keeps three exponentially weighted success tables keyed
//! by hour: global, per app and per day type. Lookups prefer the most
//! specific table that has enough observations.
//!
//! [`ContextualTimingOptimizer`] works from the raw intervention history and
//! classifies hours as best or worst for one app, recommending to intervene
//! now, to delay until the next best hour, or neither.

use jitai_core::clock::{hours_until, DAY_MS};
use jitai_core::config::TimingConfig;
use jitai_core::state::{self, VersionedState, KEY_TIMING};
use jitai_core::{Confidence, InterventionContext, InterventionRecord, RecordQuery, Store};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Rate a fresh bucket starts from before its first update.
const NEUTRAL_RATE: f64 = 0.5;
/// Upper bound on history rows read per analysis.
const ANALYSIS_ROW_LIMIT: usize = 1_000;

/// EMA success rate of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingPattern {
    pub rate: f64,
    pub observations: u32,
    pub last_updated_ms: i64,
}

impl Default for TimingPattern {
    fn default() -> Self {
        Self {
            rate: NEUTRAL_RATE,
            observations: 0,
            last_updated_ms: 0,
        }
    }
}

impl TimingPattern {
    fn observe(&mut self, success: f64, learning_rate: f64, now_ms: i64) {
        let x = success.clamp(0.0, 1.0);
        self.rate = (self.rate + learning_rate * (x - self.rate)).clamp(0.0, 1.0);
        self.observations = self.observations.saturating_add(1);
        self.last_updated_ms = now_ms;
    }

    fn revise(&mut self, delta: f64, learning_rate: f64, now_ms: i64) {
        if self.observations == 0 {
            return;
        }
        self.rate = (self.rate + learning_rate * delta).clamp(0.0, 1.0);
        self.last_updated_ms = now_ms;
    }
}

type HourTable = BTreeMap<u8, TimingPattern>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingState {
    pub by_hour: HourTable,
    pub by_app: BTreeMap<String, HourTable>,
    pub weekday: HourTable,
    pub weekend: HourTable,
}

impl VersionedState for TimingState {
    const VERSION: u32 = 1;
}

/// Which table answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingSource {
    App,
    DayType,
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingEstimate {
    pub rate: f64,
    pub observations: u32,
    pub source: TimingSource,
}

#[derive(Debug, Clone)]
pub struct TimingLearner {
    state: TimingState,
    learning_rate: f64,
    min_observations: u32,
}

impl Default for TimingLearner {
    fn default() -> Self {
        Self::new(&TimingConfig::default())
    }
}

impl TimingLearner {
    #[must_use]
    pub fn new(config: &TimingConfig) -> Self {
        Self {
            state: TimingState::default(),
            learning_rate: config.learning_rate.clamp(0.0, 1.0),
            min_observations: config.min_observations.max(1),
        }
    }

    #[must_use]
    pub fn load_from(store: &dyn Store, config: &TimingConfig) -> Self {
        let mut learner = Self::new(config);
        learner.state = state::load_or_default(store, KEY_TIMING);
        learner
    }

    pub fn save_to(&self, store: &dyn Store) -> bool {
        state::save_or_log(store, KEY_TIMING, &self.state)
    }

    #[must_use]
    pub fn state(&self) -> &TimingState {
        &self.state
    }

    /// Feeds one settled result into all three tables.
    pub fn record_timing_outcome(
        &mut self,
        target_app: &str,
        hour: u8,
        is_weekend: bool,
        success: f64,
        now_ms: i64,
    ) {
        if !success.is_finite() {
            warn!(app = target_app, hour, "ignoring non-finite timing outcome");
            return;
        }
        let hour = hour % 24;
        let lr = self.learning_rate;
        self.state
            .by_hour
            .entry(hour)
            .or_default()
            .observe(success, lr, now_ms);
        self.state
            .by_app
            .entry(target_app.to_string())
            .or_default()
            .entry(hour)
            .or_default()
            .observe(success, lr, now_ms);
        let day_table = if is_weekend {
            &mut self.state.weekend
        } else {
            &mut self.state.weekday
        };
        day_table.entry(hour).or_default().observe(success, lr, now_ms);
    }

    /// Shifts the buckets an earlier outcome went into, as if that outcome
    /// had been `delta` higher. Observation counts are unchanged.
    pub fn revise_timing_outcome(
        &mut self,
        target_app: &str,
        hour: u8,
        is_weekend: bool,
        delta: f64,
        now_ms: i64,
    ) {
        if !delta.is_finite() {
            warn!(app = target_app, hour, "ignoring non-finite timing revision");
            return;
        }
        let hour = hour % 24;
        let (lr, delta) = (self.learning_rate, delta.clamp(-1.0, 1.0));
        if let Some(p) = self.state.by_hour.get_mut(&hour) {
            p.revise(delta, lr, now_ms);
        }
        if let Some(p) = self
            .state
            .by_app
            .get_mut(target_app)
            .and_then(|t| t.get_mut(&hour))
        {
            p.revise(delta, lr, now_ms);
        }
        let day_table = if is_weekend {
            &mut self.state.weekend
        } else {
            &mut self.state.weekday
        };
        if let Some(p) = day_table.get_mut(&hour) {
            p.revise(delta, lr, now_ms);
        }
    }

    /// Most specific estimate with enough observations.
    #[must_use]
    pub fn lookup(&self, target_app: &str, hour: u8, is_weekend: bool) -> Option<TimingEstimate> {
        let hour = hour % 24;
        let day_table = if is_weekend {
            &self.state.weekend
        } else {
            &self.state.weekday
        };
        let candidates = [
            (
                self.state.by_app.get(target_app).and_then(|t| t.get(&hour)),
                TimingSource::App,
            ),
            (day_table.get(&hour), TimingSource::DayType),
            (self.state.by_hour.get(&hour), TimingSource::Global),
        ];
        candidates.into_iter().find_map(|(pattern, source)| {
            pattern
                .filter(|p| p.observations >= self.min_observations)
                .map(|p| TimingEstimate {
                    rate: p.rate,
                    observations: p.observations,
                    source,
                })
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HourStats {
    pub samples: usize,
    pub successes: usize,
}

impl HourStats {
    #[must_use]
    pub fn rate(&self) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            self.successes as f64 / self.samples as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimingRecommendation {
    InterveneNow,
    Delay { target_hour: u8, hours: u8 },
    Allow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimalTiming {
    pub should_intervene_now: bool,
    pub recommendation: TimingRecommendation,
    pub confidence: Confidence,
    pub current_hour: u8,
    pub current_hour_rate: Option<f64>,
    pub samples: usize,
    pub best_hours: Vec<u8>,
    pub worst_hours: Vec<u8>,
    pub computed_at_ms: i64,
}

/// Classifies hours from answered history.
#[derive(Debug, Clone, Copy)]
pub struct HourClassifier {
    pub reliable_samples: usize,
    pub excellent_rate: f64,
    pub poor_rate: f64,
}

impl HourClassifier {
    #[must_use]
    pub fn from_config(config: &TimingConfig) -> Self {
        Self {
            reliable_samples: config.reliable_samples.max(1),
            excellent_rate: config.excellent_rate,
            poor_rate: config.poor_rate,
        }
    }

    #[must_use]
    pub fn hour_stats<'a>(
        records: impl IntoIterator<Item = &'a InterventionRecord>,
    ) -> BTreeMap<u8, HourStats> {
        let mut stats: BTreeMap<u8, HourStats> = BTreeMap::new();
        for record in records.into_iter().filter(|r| r.is_answered()) {
            let entry = stats.entry(record.hour % 24).or_default();
            entry.samples += 1;
            if record.is_go_back() {
                entry.successes += 1;
            }
        }
        stats
    }

    #[must_use]
    pub fn best_hours(&self, stats: &BTreeMap<u8, HourStats>) -> Vec<u8> {
        stats
            .iter()
            .filter(|(_, s)| s.samples >= self.reliable_samples && s.rate() >= self.excellent_rate)
            .map(|(h, _)| *h)
            .collect()
    }

    #[must_use]
    pub fn worst_hours(&self, stats: &BTreeMap<u8, HourStats>) -> Vec<u8> {
        stats
            .iter()
            .filter(|(_, s)| s.samples >= self.reliable_samples && s.rate() <= self.poor_rate)
            .map(|(h, _)| *h)
            .collect()
    }
}

/// Nearest best hour strictly after `from`, wrapping at midnight.
#[must_use]
pub fn next_best_hour(from: u8, best: &[u8]) -> Option<u8> {
    best.iter()
        .copied()
        .filter(|h| *h != from)
        .min_by_key(|h| hours_until(from, *h))
}

fn confidence_for(samples: usize) -> Confidence {
    match samples {
        s if s >= 20 => Confidence::High,
        s if s >= 10 => Confidence::Medium,
        s if s >= 5 => Confidence::Low,
        _ => Confidence::VeryLow,
    }
}

type TimingKey = (String, u8, bool);

#[derive(Debug, Clone)]
pub struct ContextualTimingOptimizer {
    classifier: HourClassifier,
    refresh_ms: i64,
    lookback_days: i64,
    cache: HashMap<TimingKey, OptimalTiming>,
}

impl Default for ContextualTimingOptimizer {
    fn default() -> Self {
        Self::new(&TimingConfig::default())
    }
}

impl ContextualTimingOptimizer {
    #[must_use]
    pub fn new(config: &TimingConfig) -> Self {
        Self {
            classifier: HourClassifier::from_config(config),
            refresh_ms: i64::try_from(config.optimizer_refresh_secs.saturating_mul(1000))
                .unwrap_or(i64::MAX),
            lookback_days: config.lookback_days.max(1),
            cache: HashMap::new(),
        }
    }

    pub fn invalidate(&mut self) {
        self.cache.clear();
    }

    /// Recommendation for the context's app and hour, refreshed at most once
    /// per refresh interval per (app, hour, day type).
    pub fn optimal_timing(
        &mut self,
        store: &dyn Store,
        ctx: &InterventionContext,
        now_ms: i64,
    ) -> OptimalTiming {
        let key = (ctx.target_app.clone(), ctx.hour % 24, ctx.is_weekend);
        if let Some(cached) = self.cache.get(&key) {
            if now_ms - cached.computed_at_ms < self.refresh_ms {
                return cached.clone();
            }
        }
        let records = store
            .interventions(
                &RecordQuery::all()
                    .app(ctx.target_app.as_str())
                    .since(now_ms - self.lookback_days.saturating_mul(DAY_MS))
                    .limit(ANALYSIS_ROW_LIMIT),
            )
            .unwrap_or_else(|err| {
                warn!(app = %ctx.target_app, error = %err, "timing history unavailable");
                Vec::new()
            });
        let timing = self.analyze(&records, ctx.hour % 24, ctx.is_weekend, now_ms);
        debug!(
            app = %ctx.target_app,
            hour = ctx.hour,
            recommendation = ?timing.recommendation,
            confidence = ?timing.confidence,
            "timing analyzed"
        );
        self.cache.insert(key, timing.clone());
        timing
    }

    /// Pure analysis over one app's history.
    #[must_use]
    pub fn analyze(
        &self,
        records: &[InterventionRecord],
        hour: u8,
        is_weekend: bool,
        now_ms: i64,
    ) -> OptimalTiming {
        let same_day_type = HourClassifier::hour_stats(
            records.iter().filter(|r| r.is_weekend == is_weekend),
        );
        let enough = same_day_type
            .get(&hour)
            .is_some_and(|s| s.samples >= self.classifier.reliable_samples);
        let stats = if enough {
            same_day_type
        } else {
            HourClassifier::hour_stats(records)
        };

        let best_hours = self.classifier.best_hours(&stats);
        let worst_hours = self.classifier.worst_hours(&stats);
        let current = stats.get(&hour).copied().unwrap_or_default();

        let recommendation = if best_hours.contains(&hour) {
            TimingRecommendation::InterveneNow
        } else if worst_hours.contains(&hour) {
            match next_best_hour(hour, &best_hours) {
                Some(target) => TimingRecommendation::Delay {
                    target_hour: target,
                    hours: hours_until(hour, target),
                },
                None => TimingRecommendation::Allow,
            }
        } else {
            TimingRecommendation::Allow
        };

        OptimalTiming {
            should_intervene_now: !matches!(recommendation, TimingRecommendation::Delay { .. }),
            recommendation,
            confidence: confidence_for(current.samples),
            current_hour: hour,
            current_hour_rate: (current.samples > 0).then(|| current.rate()),
            samples: current.samples,
            best_hours,
            worst_hours,
            computed_at_ms: now_ms,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use jitai_core::{ContentType, FrictionLevel, MemoryStore, UserChoice, Variant};

    fn record(i: usize, hour: u8, choice: UserChoice) -> InterventionRecord {
        InterventionRecord {
            id: format!("r{i}"),
            timestamp_ms: 1_000 + i64::try_from(i).unwrap(),
            target_app: "x".into(),
            content_type: ContentType::Quote,
            hour,
            is_weekend: false,
            variant: Variant::Control,
            opportunity_score: 60,
            friction_level: FrictionLevel::Gentle,
            user_choice: Some(choice),
            decision_latency_ms: Some(2_000),
            feedback: None,
        }
    }

    #[test]
    fn learner_prefers_app_then_day_type_then_global() {
        let mut learner = TimingLearner::default();
        for _ in 0..3 {
            learner.record_timing_outcome("other", 9, false, 1.0, 0);
        }
        let global = learner.lookup("video", 9, true).unwrap();
        assert_eq!(global.source, TimingSource::Global);

        let weekday = learner.lookup("video", 9, false).unwrap();
        assert_eq!(weekday.source, TimingSource::DayType);

        for _ in 0..3 {
            learner.record_timing_outcome("video", 9, false, 0.0, 0);
        }
        let app = learner.lookup("video", 9, false).unwrap();
        assert_eq!(app.source, TimingSource::App);
        assert!(app.rate < NEUTRAL_RATE);
    }

    #[test]
    fn learner_needs_minimum_observations() {
        let mut learner = TimingLearner::default();
        learner.record_timing_outcome("video", 14, false, 1.0, 0);
        learner.record_timing_outcome("video", 14, false, 1.0, 0);
        assert!(learner.lookup("video", 14, false).is_none());
        learner.record_timing_outcome("video", 14, false, 1.0, 0);
        assert!(learner.lookup("video", 14, false).is_some());
    }

    #[test]
    fn ema_moves_by_learning_rate() {
        let mut learner = TimingLearner::default();
        learner.record_timing_outcome("a", 8, false, 1.0, 5);
        let p = learner.state().by_hour[&8];
        assert!((p.rate - (0.5 + 0.15 * 0.5)).abs() < 1e-12);
        assert_eq!(p.last_updated_ms, 5);
    }

    #[test]
    fn revision_shifts_only_touched_buckets() {
        let mut learner = TimingLearner::default();
        learner.record_timing_outcome("a", 8, false, 0.6, 5);
        let before = learner.state().by_hour[&8];
        learner.revise_timing_outcome("a", 8, false, -0.4, 9);

        let after = learner.state().by_hour[&8];
        assert!((after.rate - (before.rate - 0.15 * 0.4)).abs() < 1e-12);
        assert_eq!(after.observations, 1);
        assert_eq!(after.last_updated_ms, 9);
        assert_eq!(learner.state().by_app["a"][&8], after);
        assert_eq!(learner.state().weekday[&8], after);
        assert!(learner.state().weekend.is_empty());

        learner.revise_timing_outcome("b", 3, true, 1.0, 9);
        assert!(!learner.state().by_hour.contains_key(&3));
        assert!(!learner.state().by_app.contains_key("b"));
    }

    #[test]
    fn learner_state_persists() {
        let store = MemoryStore::new();
        let mut learner = TimingLearner::default();
        learner.record_timing_outcome("a", 8, true, 1.0, 5);
        assert!(learner.save_to(&store));
        let restored = TimingLearner::load_from(&store, &TimingConfig::default());
        assert_eq!(restored.state(), learner.state());
    }

    #[test]
    fn next_best_hour_wraps_midnight() {
        assert_eq!(next_best_hour(22, &[8, 23]), Some(23));
        assert_eq!(next_best_hour(23, &[8, 20]), Some(8));
        assert_eq!(next_best_hour(5, &[5]), None);
    }

    #[test]
    fn strong_evening_history_recommends_now() {
        let mut records: Vec<InterventionRecord> =
            (0..25).map(|i| record(i, 22, UserChoice::GoBack)).collect();
        records.extend((25..35).map(|i| record(i, 10, UserChoice::Continue)));
        let optimizer = ContextualTimingOptimizer::default();
        let timing = optimizer.analyze(&records, 22, false, 0);
        assert!(timing.should_intervene_now);
        assert_eq!(timing.recommendation, TimingRecommendation::InterveneNow);
        assert_eq!(timing.confidence, Confidence::High);
        assert_eq!(timing.best_hours, vec![22]);
        assert_eq!(timing.worst_hours, vec![10]);

        let morning = optimizer.analyze(&records, 10, false, 0);
        assert_eq!(
            morning.recommendation,
            TimingRecommendation::Delay {
                target_hour: 22,
                hours: 12
            }
        );
        assert!(!morning.should_intervene_now);
    }

    #[test]
    fn optimizer_caches_per_key() {
        let store = MemoryStore::new();
        let mut optimizer = ContextualTimingOptimizer::default();
        let ctx = InterventionContext {
            hour: 22,
            target_app: "x".into(),
            ..InterventionContext::default()
        };
        let first = optimizer.optimal_timing(&store, &ctx, 0);
        assert_eq!(first.recommendation, TimingRecommendation::Allow);
        for i in 0..10 {
            store.append_intervention(&record(i, 22, UserChoice::GoBack)).unwrap();
        }
        let cached = optimizer.optimal_timing(&store, &ctx, 60_000);
        assert_eq!(cached, first);
        let fresh = optimizer.optimal_timing(&store, &ctx, 16 * 60_000);
        assert_eq!(fresh.recommendation, TimingRecommendation::InterveneNow);
    }
}
