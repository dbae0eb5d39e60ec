//! Intervention burden: how fatigued the user is by overlays.
//!
//! [`BurdenEstimator`] turns the last 30 days of intervention rows into
//! [`BurdenMetrics`], scores them, applies the fatigue-recovery credit and
//! maps the result onto a [`BurdenLevel`]. [`BurdenTrendMonitor`] keeps the
//! recent scores to flag escalation.

use jitai_core::clock::DAY_MS;
use jitai_core::config::BurdenConfig;
use jitai_core::state::{self, VersionedState, KEY_BURDEN_TREND};
use jitai_core::{
    BurdenLevel, BurdenSnapshot, Feedback, InterventionRecord, OpportunityLevel, RecordQuery,
    Store, Trend, UserChoice,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Records considered by the effectiveness regression.
const REGRESSION_WINDOW: usize = 30;
/// Go-back rate change between halves that counts as a trend.
const HALF_TREND_THRESHOLD: f64 = 0.10;
/// Regression slope that counts as a trend.
const SLOPE_TREND_THRESHOLD: f64 = 0.02;
/// A dismissal faster than this is treated as reflexive.
const REFLEXIVE_DISMISS_MS: i64 = 1_500;
/// Mean spacing under half an hour adds burden.
const CLOSE_SPACING_MS: f64 = 30.0 * 60_000.0;
/// Results inspected for relief eligibility.
const RELIEF_WINDOW: usize = 10;
const RELIEF_GO_BACK_RATE: f64 = 0.70;

/// Rolling-window fatigue indicators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BurdenMetrics {
    pub sample_size: usize,
    pub answered: usize,
    pub avg_decision_latency_ms: Option<f64>,
    pub dismiss_rate: f64,
    pub timeout_rate: f64,
    pub count_24h: usize,
    pub count_7d: usize,
    pub daily_average_7d: f64,
    pub go_back_first_half: Option<f64>,
    pub go_back_second_half: Option<f64>,
    pub engagement_trend: Trend,
    pub effectiveness_slope: Option<f64>,
    pub effectiveness_trend: Trend,
    pub feedback_count: usize,
    pub helpful_ratio: Option<f64>,
    pub mean_spacing_ms: Option<f64>,
    pub min_spacing_ms: Option<i64>,
    pub reflexive_dismissals: usize,
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Least-squares slope of `ys` against their index.
#[must_use]
pub fn regression_slope(ys: &[f64]) -> Option<f64> {
    if ys.len() < 2 {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = ys.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = ys.iter().sum::<f64>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in ys.iter().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }
    (den > 0.0).then(|| num / den)
}

impl BurdenMetrics {
    /// Computes metrics from rows in any order.
    #[must_use]
    pub fn from_records(records: &[InterventionRecord], now_ms: i64) -> Self {
        let mut rows: Vec<&InterventionRecord> = records.iter().collect();
        rows.sort_by_key(|r| r.timestamp_ms);

        let answered: Vec<&InterventionRecord> =
            rows.iter().copied().filter(|r| r.is_answered()).collect();
        let count_choice =
            |choice: UserChoice| answered.iter().filter(|r| r.user_choice == Some(choice)).count();

        let latencies: Vec<i64> = answered.iter().filter_map(|r| r.decision_latency_ms).collect();
        #[allow(clippy::cast_precision_loss)]
        let avg_decision_latency_ms = (!latencies.is_empty())
            .then(|| latencies.iter().sum::<i64>() as f64 / latencies.len() as f64);

        let count_24h = rows.iter().filter(|r| now_ms - r.timestamp_ms < DAY_MS).count();
        let count_7d = rows.iter().filter(|r| now_ms - r.timestamp_ms < 7 * DAY_MS).count();

        let outcomes: Vec<f64> = answered
            .iter()
            .map(|r| if r.is_go_back() { 1.0 } else { 0.0 })
            .collect();
        let (first, second, engagement_trend) = half_trend(&outcomes);
        let recent = &outcomes[outcomes.len().saturating_sub(REGRESSION_WINDOW)..];
        let effectiveness_slope = if recent.len() >= 5 {
            regression_slope(recent)
        } else {
            None
        };
        let effectiveness_trend = match effectiveness_slope {
            Some(s) if s > SLOPE_TREND_THRESHOLD => Trend::Improving,
            Some(s) if s < -SLOPE_TREND_THRESHOLD => Trend::Declining,
            _ => Trend::Stable,
        };

        let feedback: Vec<Feedback> = rows.iter().filter_map(|r| r.feedback).collect();
        let helpful = feedback.iter().filter(|f| **f == Feedback::Helpful).count();

        let gaps: Vec<i64> = rows
            .windows(2)
            .map(|w| w[1].timestamp_ms - w[0].timestamp_ms)
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let mean_spacing_ms =
            (!gaps.is_empty()).then(|| gaps.iter().sum::<i64>() as f64 / gaps.len() as f64);

        let reflexive_dismissals = answered
            .iter()
            .filter(|r| {
                r.user_choice == Some(UserChoice::Dismissed)
                    && r.decision_latency_ms.is_some_and(|l| l < REFLEXIVE_DISMISS_MS)
            })
            .count();

        #[allow(clippy::cast_precision_loss)]
        let daily_average_7d = count_7d as f64 / 7.0;

        Self {
            sample_size: rows.len(),
            answered: answered.len(),
            avg_decision_latency_ms,
            dismiss_rate: ratio(count_choice(UserChoice::Dismissed), answered.len()),
            timeout_rate: ratio(count_choice(UserChoice::Timeout), answered.len()),
            count_24h,
            count_7d,
            daily_average_7d,
            go_back_first_half: first,
            go_back_second_half: second,
            engagement_trend,
            effectiveness_slope,
            effectiveness_trend,
            feedback_count: feedback.len(),
            helpful_ratio: (!feedback.is_empty()).then(|| ratio(helpful, feedback.len())),
            mean_spacing_ms,
            min_spacing_ms: gaps.iter().copied().min(),
            reflexive_dismissals,
        }
    }

    /// Burden points before the recovery credit.
    #[must_use]
    pub fn raw_score(&self) -> f64 {
        let mut score = 0.0;
        if self.answered == 0 && self.count_24h == 0 {
            return score;
        }
        score += match self.dismiss_rate {
            r if r > 0.5 => 4.0,
            r if r > 0.3 => 2.0,
            _ => 0.0,
        };
        score += match self.timeout_rate {
            r if r > 0.3 => 3.0,
            r if r > 0.15 => 1.0,
            _ => 0.0,
        };
        score += match self.count_24h {
            c if c > 10 => 4.0,
            c if c > 6 => 2.0,
            c if c > 3 => 1.0,
            _ => 0.0,
        };
        if self.engagement_trend == Trend::Declining {
            score += 2.0;
        }
        if self.effectiveness_trend == Trend::Declining {
            score += 2.0;
        }
        if self.feedback_count >= 3 && self.helpful_ratio.is_some_and(|r| r < 0.3) {
            score += 3.0;
        }
        if self.mean_spacing_ms.is_some_and(|s| s < CLOSE_SPACING_MS) {
            score += 2.0;
        }
        if self.reflexive_dismissals >= 3 {
            score += 2.0;
        }
        score
    }
}

/// Go-back rate of the first and second half and the resulting trend.
fn half_trend(outcomes: &[f64]) -> (Option<f64>, Option<f64>, Trend) {
    if outcomes.len() < 4 {
        return (None, None, Trend::Stable);
    }
    let (first, second) = outcomes.split_at(outcomes.len() / 2);
    #[allow(clippy::cast_precision_loss)]
    let mean = |xs: &[f64]| xs.iter().sum::<f64>() / xs.len() as f64;
    let (a, b) = (mean(first), mean(second));
    let trend = if b - a > HALF_TREND_THRESHOLD {
        Trend::Improving
    } else if a - b > HALF_TREND_THRESHOLD {
        Trend::Declining
    } else {
        Trend::Stable
    };
    (Some(a), Some(b), trend)
}

/// Credit for a quiet day and relief for a run of successes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FatigueRecoveryTracker;

impl FatigueRecoveryTracker {
    /// Multiplicative reduction in `[0, 0.3]` when the last 24h were much
    /// quieter than the 7-day daily average.
    #[must_use]
    pub fn recovery_credit(count_24h: usize, daily_average_7d: f64) -> f64 {
        if daily_average_7d <= 0.0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let relative = count_24h as f64 / daily_average_7d;
        match relative {
            r if r <= 0.25 => 0.3,
            r if r <= 0.5 => 0.2,
            r if r <= 0.75 => 0.1,
            _ => 0.0,
        }
    }

    /// Whether the latest ten answered results are at least 70% go-back.
    #[must_use]
    pub fn relief_eligible(records: &[InterventionRecord]) -> bool {
        let mut answered: Vec<&InterventionRecord> =
            records.iter().filter(|r| r.is_answered()).collect();
        if answered.len() < RELIEF_WINDOW {
            return false;
        }
        answered.sort_by_key(|r| std::cmp::Reverse(r.timestamp_ms));
        let back = answered
            .iter()
            .take(RELIEF_WINDOW)
            .filter(|r| r.is_go_back())
            .count();
        ratio(back, RELIEF_WINDOW) >= RELIEF_GO_BACK_RATE
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BurdenTrendState {
    pub scores: VecDeque<f64>,
}

impl VersionedState for BurdenTrendState {
    const VERSION: u32 = 1;
}

/// The last few burden scores, persisted between runs.
#[derive(Debug, Clone)]
pub struct BurdenTrendMonitor {
    state: BurdenTrendState,
    window: usize,
}

impl Default for BurdenTrendMonitor {
    fn default() -> Self {
        Self::new(BurdenConfig::default().trend_window)
    }
}

impl BurdenTrendMonitor {
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self {
            state: BurdenTrendState::default(),
            window: window.max(4),
        }
    }

    #[must_use]
    pub fn load_from(store: &dyn Store, window: usize) -> Self {
        let mut monitor = Self::new(window);
        monitor.state = state::load_or_default(store, KEY_BURDEN_TREND);
        monitor.trim();
        monitor
    }

    pub fn save_to(&self, store: &dyn Store) -> bool {
        state::save_or_log(store, KEY_BURDEN_TREND, &self.state)
    }

    fn trim(&mut self) {
        while self.state.scores.len() > self.window {
            self.state.scores.pop_front();
        }
    }

    pub fn record(&mut self, score: f64) {
        if score.is_finite() {
            self.state.scores.push_back(score);
            self.trim();
        }
    }

    #[must_use]
    pub fn scores(&self) -> Vec<f64> {
        self.state.scores.iter().copied().collect()
    }

    /// Three strict increases in a row ending at 10 or more, or a jump of
    /// more than half ending at 8 or more.
    #[must_use]
    pub fn is_escalating(&self) -> bool {
        let s = &self.state.scores;
        let n = s.len();
        if n < 2 {
            return false;
        }
        let last = s[n - 1];
        let prev = s[n - 2];
        let climbing = n >= 4 && s[n - 4] < s[n - 3] && s[n - 3] < prev && prev < last;
        let jumped = prev > 0.0 && last > prev * 1.5;
        (climbing && last >= 10.0) || (jumped && last >= 8.0)
    }

    /// Direction of the latest score against the mean of the earlier ones.
    #[must_use]
    pub fn trend(&self) -> Trend {
        let s = &self.state.scores;
        if s.len() < 3 {
            return Trend::Stable;
        }
        let last = s[s.len() - 1];
        #[allow(clippy::cast_precision_loss)]
        let earlier = s.iter().take(s.len() - 1).sum::<f64>() / (s.len() - 1) as f64;
        if last < earlier - 1.0 {
            Trend::Improving
        } else if last > earlier + 1.0 {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }
}

/// Everything the orchestrator and analytics need about current burden.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurdenAssessment {
    pub metrics: BurdenMetrics,
    pub raw_score: f64,
    pub score: f64,
    pub level: BurdenLevel,
    pub cooldown_multiplier: f64,
    pub recovery_credit: f64,
    pub relief_eligible: bool,
    pub trend: Trend,
    pub escalating: bool,
    pub recent_scores: Vec<f64>,
    pub computed_at_ms: i64,
}

impl BurdenAssessment {
    /// Critical burden always blocks; high burden blocks unless the moment is
    /// excellent.
    #[must_use]
    pub fn blocks(&self, opportunity: OpportunityLevel) -> bool {
        match self.level {
            BurdenLevel::Critical => true,
            BurdenLevel::High => opportunity != OpportunityLevel::Excellent,
            BurdenLevel::Low | BurdenLevel::Moderate => false,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> BurdenSnapshot {
        BurdenSnapshot {
            level: self.level,
            score: self.score,
            cooldown_multiplier: self.cooldown_multiplier,
            recovery_credit: self.recovery_credit,
            relief_eligible: self.relief_eligible,
            escalating: self.escalating,
        }
    }
}

#[derive(Debug)]
pub struct BurdenEstimator {
    config: BurdenConfig,
    monitor: BurdenTrendMonitor,
    cache: Option<BurdenAssessment>,
}

impl Default for BurdenEstimator {
    fn default() -> Self {
        Self::new(BurdenConfig::default())
    }
}

impl BurdenEstimator {
    #[must_use]
    pub fn new(config: BurdenConfig) -> Self {
        let monitor = BurdenTrendMonitor::new(config.trend_window);
        Self {
            config,
            monitor,
            cache: None,
        }
    }

    #[must_use]
    pub fn load_from(store: &dyn Store, config: BurdenConfig) -> Self {
        let monitor = BurdenTrendMonitor::load_from(store, config.trend_window);
        Self {
            config,
            monitor,
            cache: None,
        }
    }

    #[must_use]
    pub fn monitor(&self) -> &BurdenTrendMonitor {
        &self.monitor
    }

    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    fn ttl_ms(&self) -> i64 {
        i64::try_from(self.config.cache_ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
    }

    fn history(&self, store: &dyn Store, now_ms: i64) -> Vec<InterventionRecord> {
        let since = now_ms - self.config.lookback_days.max(1).saturating_mul(DAY_MS);
        store
            .interventions(&RecordQuery::all().since(since))
            .unwrap_or_else(|err| {
                warn!(error = %err, "burden history unavailable, assuming low burden");
                Vec::new()
            })
    }

    fn fresh_cache(&self, now_ms: i64) -> Option<BurdenAssessment> {
        self.cache
            .as_ref()
            .filter(|cached| now_ms - cached.computed_at_ms < self.ttl_ms())
            .cloned()
    }

    /// Current assessment for a decision, recomputed at most once per cache
    /// TTL. Each recomputation adds a point to the persisted trend.
    pub fn assess(&mut self, store: &dyn Store, now_ms: i64) -> BurdenAssessment {
        if let Some(cached) = self.fresh_cache(now_ms) {
            return cached;
        }
        let records = self.history(store, now_ms);
        let assessment = self.evaluate(&records, now_ms);
        self.monitor.save_to(store);
        self.cache = Some(assessment.clone());
        assessment
    }

    /// Read-only assessment: the trend is reported as recorded so far and
    /// nothing is written or cached.
    #[must_use]
    pub fn peek(&self, store: &dyn Store, now_ms: i64) -> BurdenAssessment {
        if let Some(cached) = self.fresh_cache(now_ms) {
            return cached;
        }
        let records = self.history(store, now_ms);
        self.peek_records(&records, now_ms)
    }

    /// Scores `records` without touching the trend monitor.
    #[must_use]
    pub fn peek_records(&self, records: &[InterventionRecord], now_ms: i64) -> BurdenAssessment {
        let mut assessment = Self::score(records, now_ms);
        self.attach_trend(&mut assessment);
        assessment
    }

    /// Scores `records` and pushes the score into the trend monitor.
    pub fn evaluate(&mut self, records: &[InterventionRecord], now_ms: i64) -> BurdenAssessment {
        let mut assessment = Self::score(records, now_ms);
        self.monitor.record(assessment.score);
        self.attach_trend(&mut assessment);
        if assessment.escalating {
            info!(score = assessment.score, level = ?assessment.level, "burden escalating");
        }
        debug!(
            score = assessment.score,
            raw_score = assessment.raw_score,
            recovery_credit = assessment.recovery_credit,
            level = ?assessment.level,
            "burden assessed"
        );
        assessment
    }

    fn score(records: &[InterventionRecord], now_ms: i64) -> BurdenAssessment {
        let metrics = BurdenMetrics::from_records(records, now_ms);
        let raw_score = metrics.raw_score();
        let recovery_credit =
            FatigueRecoveryTracker::recovery_credit(metrics.count_24h, metrics.daily_average_7d);
        let score = raw_score * (1.0 - recovery_credit);
        let relief_eligible = FatigueRecoveryTracker::relief_eligible(records);
        let mut level = BurdenLevel::from_score(score);
        if relief_eligible {
            level = level.lowered();
        }
        BurdenAssessment {
            metrics,
            raw_score,
            score,
            level,
            cooldown_multiplier: level.cooldown_multiplier(),
            recovery_credit,
            relief_eligible,
            trend: Trend::Stable,
            escalating: false,
            recent_scores: Vec::new(),
            computed_at_ms: now_ms,
        }
    }

    fn attach_trend(&self, assessment: &mut BurdenAssessment) {
        assessment.trend = self.monitor.trend();
        assessment.escalating = self.monitor.is_escalating();
        assessment.recent_scores = self.monitor.scores();
    }
}
