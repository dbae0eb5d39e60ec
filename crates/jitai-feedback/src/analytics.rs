//! Read-only aggregates over intervention and outcome rows.

use jitai_core::{
    Confidence, ContentType, InterventionRecord, Outcome, UserChoice, Variant,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// Pattern detection thresholds
/// Minimum answered interventions of one content type before it is judged.
const PATTERN_MIN_PER_CONTENT: usize = 5;
/// Failure rate (70%) above which a content type is flagged.
const PATTERN_HIGH_FAILURE_THRESHOLD: f64 = 0.7;
/// Overall go-back rate (20%) below which the whole program is flagged.
const PATTERN_LOW_SUCCESS_THRESHOLD: f64 = 0.2;
/// Minimum answered interventions before the overall rate is judged.
const PATTERN_MIN_OVERALL: usize = 10;

/// Success and reward totals for a group of outcomes.
///
/// Success means the user went back. Only answered outcomes are counted.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeStatistics {
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
    pub total_reward: f64,
    pub rewarded: usize,
}

impl OutcomeStatistics {
    fn observe(&mut self, outcome: &Outcome) {
        let Some(choice) = outcome.user_choice() else {
            return;
        };
        self.total += 1;
        if choice.is_success() {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        if let Some(reward) = outcome.reward.filter(|r| r.is_finite()) {
            self.total_reward += reward;
            self.rewarded += 1;
        }
    }

    /// Go-back rate in `[0, 1]`.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            self.successes as f64 / self.total as f64
        }
    }

    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        1.0 - self.success_rate()
    }

    /// Mean raw reward, `None` when nothing was rewarded yet.
    #[must_use]
    pub fn average_reward(&self) -> Option<f64> {
        if self.rewarded == 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        Some(self.total_reward / self.rewarded as f64)
    }
}

/// Groups outcomes by `key_fn`; outcomes mapped to `None` are left out.
pub fn aggregate_outcomes<K: Ord>(
    outcomes: &[Outcome],
    key_fn: impl Fn(&Outcome) -> Option<K>,
) -> BTreeMap<K, OutcomeStatistics> {
    let mut stats: BTreeMap<K, OutcomeStatistics> = BTreeMap::new();
    for outcome in outcomes {
        if let Some(key) = key_fn(outcome) {
            stats.entry(key).or_default().observe(outcome);
        }
    }
    stats
}

#[must_use]
pub fn summarize_outcomes(outcomes: &[Outcome]) -> OutcomeStatistics {
    let mut stats = OutcomeStatistics::default();
    for outcome in outcomes {
        stats.observe(outcome);
    }
    stats
}

/// Go-back rate per content type over answered records with at least
/// `min_samples` answers.
#[must_use]
pub fn go_back_rates(
    records: &[InterventionRecord],
    min_samples: usize,
) -> BTreeMap<ContentType, f64> {
    let mut counts: BTreeMap<ContentType, (usize, usize)> = BTreeMap::new();
    for record in records.iter().filter(|r| r.is_answered()) {
        let entry = counts.entry(record.content_type).or_default();
        entry.0 += 1;
        if record.is_go_back() {
            entry.1 += 1;
        }
    }
    counts
        .into_iter()
        .filter(|(_, (answered, _))| *answered >= min_samples.max(1))
        .map(|(content, (answered, back))| {
            #[allow(clippy::cast_precision_loss)]
            let rate = back as f64 / answered as f64;
            (content, rate)
        })
        .collect()
}

/// Per-content view combining observed results with the bandit posterior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentEffectiveness {
    pub content_type: ContentType,
    pub shown: usize,
    pub answered: usize,
    pub go_back_rate: Option<f64>,
    pub mean_reward: Option<f64>,
    pub posterior_mean: Option<f64>,
    pub confidence: Option<Confidence>,
}

/// Builds one row per content type. The posterior columns stay empty; the
/// engine fills them from the live bandit.
#[must_use]
pub fn content_effectiveness(
    records: &[InterventionRecord],
    outcomes: &[Outcome],
) -> Vec<ContentEffectiveness> {
    let rewards = aggregate_outcomes(outcomes, |o| Some(o.content_type));
    ContentType::ALL
        .iter()
        .map(|&content| {
            let of_type: Vec<&InterventionRecord> =
                records.iter().filter(|r| r.content_type == content).collect();
            let answered = of_type.iter().filter(|r| r.is_answered()).count();
            let back = of_type.iter().filter(|r| r.is_go_back()).count();
            #[allow(clippy::cast_precision_loss)]
            let go_back_rate = (answered > 0).then(|| back as f64 / answered as f64);
            ContentEffectiveness {
                content_type: content,
                shown: of_type.len(),
                answered,
                go_back_rate,
                mean_reward: rewards.get(&content).and_then(OutcomeStatistics::average_reward),
                posterior_mean: None,
                confidence: None,
            }
        })
        .collect()
}

/// How many outcomes reached each horizon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HorizonCounts {
    pub proximal: usize,
    pub short_term: usize,
    pub medium_term: usize,
    pub long_term: usize,
    pub rewards_applied: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectivenessMetrics {
    pub interventions: usize,
    pub overall: OutcomeStatistics,
    pub go_back_rate: f64,
    pub mean_reward: Option<f64>,
    pub horizons: HorizonCounts,
    pub by_variant: BTreeMap<Variant, OutcomeStatistics>,
    pub by_choice: BTreeMap<UserChoice, usize>,
    pub patterns: Vec<String>,
}

#[must_use]
pub fn effectiveness_metrics(interventions: usize, outcomes: &[Outcome]) -> EffectivenessMetrics {
    let overall = summarize_outcomes(outcomes);
    let mut horizons = HorizonCounts::default();
    let mut by_choice: BTreeMap<UserChoice, usize> = BTreeMap::new();
    for outcome in outcomes {
        horizons.proximal += usize::from(outcome.proximal_collected);
        horizons.short_term += usize::from(outcome.short_term_collected);
        horizons.medium_term += usize::from(outcome.medium_term_collected);
        horizons.long_term += usize::from(outcome.long_term_collected);
        horizons.rewards_applied += usize::from(outcome.reward_applied);
        if let Some(choice) = outcome.user_choice() {
            *by_choice.entry(choice).or_default() += 1;
        }
    }
    EffectivenessMetrics {
        interventions,
        go_back_rate: overall.success_rate(),
        mean_reward: overall.average_reward(),
        horizons,
        by_variant: aggregate_outcomes(outcomes, |o| Some(o.variant)),
        by_choice,
        patterns: analyze_patterns(outcomes),
        overall,
    }
}

/// Heuristic flags for content that keeps failing or an overall low rate.
#[must_use]
pub fn analyze_patterns(outcomes: &[Outcome]) -> Vec<String> {
    let mut patterns = Vec::new();

    let by_content = aggregate_outcomes(outcomes, |o| Some(o.content_type));
    for (content, stats) in &by_content {
        if stats.total >= PATTERN_MIN_PER_CONTENT
            && stats.failure_rate() > PATTERN_HIGH_FAILURE_THRESHOLD
        {
            patterns.push(format!(
                "High failure rate ({:.1}%) for content '{}'",
                stats.failure_rate() * 100.0,
                content
            ));
        }
    }

    let overall = summarize_outcomes(outcomes);
    if overall.total >= PATTERN_MIN_OVERALL && overall.success_rate() < PATTERN_LOW_SUCCESS_THRESHOLD
    {
        patterns.push(format!(
            "Overall go-back rate is low ({:.1}%)",
            overall.success_rate() * 100.0
        ));
    }

    patterns
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use jitai_core::{FrictionLevel, ProximalSignals};

    fn record(content: ContentType, choice: Option<UserChoice>) -> InterventionRecord {
        InterventionRecord {
            id: jitai_core::records::new_intervention_id(),
            timestamp_ms: 0,
            target_app: "app".into(),
            content_type: content,
            hour: 10,
            is_weekend: false,
            variant: Variant::Control,
            opportunity_score: 50,
            friction_level: FrictionLevel::Gentle,
            user_choice: choice,
            decision_latency_ms: None,
            feedback: None,
        }
    }

    fn outcome(content: ContentType, variant: Variant, choice: UserChoice, reward: f64) -> Outcome {
        let mut r = record(content, Some(choice));
        r.variant = variant;
        let mut o = Outcome::pending(&r);
        o.proximal = Some(ProximalSignals {
            user_choice: choice,
            response_time_ms: 1_000,
            interaction_depth: 0,
            feedback: None,
        });
        o.proximal_collected = true;
        o.reward = Some(reward);
        o
    }

    #[test]
    fn statistics_calculate_rates() {
        let stats = OutcomeStatistics {
            total: 10,
            successes: 7,
            failures: 3,
            total_reward: 2.5,
            rewarded: 5,
        };
        assert!((stats.success_rate() - 0.7).abs() < 1e-12);
        assert!((stats.failure_rate() - 0.3).abs() < 1e-12);
        assert!((stats.average_reward().unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn statistics_handle_empty_set() {
        let stats = OutcomeStatistics::default();
        assert!(stats.success_rate().abs() < f64::EPSILON);
        assert!(stats.failure_rate().abs() < f64::EPSILON);
        assert_eq!(stats.average_reward(), None);
    }

    #[test]
    fn aggregates_by_variant() {
        let outcomes = vec![
            outcome(ContentType::Quote, Variant::Control, UserChoice::GoBack, 0.5),
            outcome(ContentType::Quote, Variant::Control, UserChoice::Continue, -0.2),
            outcome(ContentType::Reflection, Variant::Treatment, UserChoice::GoBack, 0.8),
        ];
        let by_variant = aggregate_outcomes(&outcomes, |o| Some(o.variant));
        assert_eq!(by_variant[&Variant::Control].total, 2);
        assert_eq!(by_variant[&Variant::Control].successes, 1);
        assert_eq!(by_variant[&Variant::Treatment].successes, 1);
    }

    #[test]
    fn go_back_rates_respect_minimum_samples() {
        let mut records = vec![
            record(ContentType::Quote, Some(UserChoice::GoBack)),
            record(ContentType::Quote, Some(UserChoice::GoBack)),
            record(ContentType::Quote, Some(UserChoice::Dismissed)),
            record(ContentType::Quote, None),
        ];
        records.push(record(ContentType::Reflection, Some(UserChoice::GoBack)));
        let rates = go_back_rates(&records, 3);
        assert!((rates[&ContentType::Quote] - 2.0 / 3.0).abs() < 1e-12);
        assert!(!rates.contains_key(&ContentType::Reflection));
    }

    #[test]
    fn content_rows_cover_every_type() {
        let records = vec![record(ContentType::Quote, Some(UserChoice::GoBack))];
        let outcomes = vec![outcome(ContentType::Quote, Variant::Control, UserChoice::GoBack, 0.8)];
        let rows = content_effectiveness(&records, &outcomes);
        assert_eq!(rows.len(), ContentType::ALL.len());
        let quote = rows.iter().find(|r| r.content_type == ContentType::Quote).unwrap();
        assert_eq!(quote.shown, 1);
        assert_eq!(quote.go_back_rate, Some(1.0));
        assert!((quote.mean_reward.unwrap() - 0.8).abs() < 1e-12);
        let gaming = rows
            .iter()
            .find(|r| r.content_type == ContentType::Gamification)
            .unwrap();
        assert_eq!(gaming.go_back_rate, None);
    }

    #[test]
    fn flags_content_that_keeps_failing() {
        let outcomes: Vec<Outcome> = (0..12)
            .map(|_| outcome(ContentType::UsageStats, Variant::Treatment, UserChoice::Continue, -0.2))
            .collect();
        let metrics = effectiveness_metrics(12, &outcomes);
        assert_eq!(metrics.horizons.proximal, 12);
        assert_eq!(metrics.by_choice[&UserChoice::Continue], 12);
        assert!(metrics
            .patterns
            .iter()
            .any(|p| p.contains("High failure rate") && p.contains("USAGE_STATS")));
        assert!(metrics.patterns.iter().any(|p| p.contains("Overall go-back rate is low")));
    }
}
