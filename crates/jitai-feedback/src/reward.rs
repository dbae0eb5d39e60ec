//! Scalar reward from the signals collected so far.
//!
//! The raw reward is a weighted linear combination over every horizon that
//! has been filled, clamped to `[-1, 1]`. Unknown signals contribute nothing.

use jitai_core::config::RewardWeights;
use jitai_core::{Outcome, UserChoice};

/// Lower bound of the raw reward.
pub const REWARD_MIN: f64 = -1.0;
/// Upper bound of the raw reward.
pub const REWARD_MAX: f64 = 1.0;

/// Sums the weighted terms of every collected horizon.
#[must_use]
pub fn compute_raw_reward(outcome: &Outcome, weights: &RewardWeights) -> f64 {
    let mut reward = 0.0;

    if let Some(proximal) = &outcome.proximal {
        reward += match proximal.user_choice {
            UserChoice::GoBack => weights.go_back,
            UserChoice::Continue => weights.continued,
            UserChoice::Timeout => weights.timeout,
            UserChoice::Dismissed => 0.0,
        };
    }

    if let Some(short) = &outcome.short_term {
        if short.quick_reopen {
            reward += weights.quick_reopen;
        } else if !short.session_continued && outcome.user_choice() == Some(UserChoice::GoBack) {
            reward += weights.session_closed;
        }
    }

    if let Some(medium) = &outcome.medium_term {
        if medium.goal_met == Some(true) {
            reward += weights.goal_met;
        }
    }

    if let Some(long) = &outcome.long_term {
        if long.usage_change.is_reduction() == Some(true) {
            reward += weights.usage_reduced;
        }
        if long.streak_maintained == Some(true) {
            reward += weights.streak_maintained;
        }
        if !long.retained {
            reward += weights.retention_lost;
        }
        if long.app_uninstalled {
            reward += weights.app_uninstalled;
        }
    }

    if reward.is_finite() {
        reward.clamp(REWARD_MIN, REWARD_MAX)
    } else {
        0.0
    }
}

/// Maps a raw reward onto the `[0, 1]` scale the bandit update expects.
#[must_use]
pub fn to_bandit_reward(raw: f64) -> f64 {
    ((raw.clamp(REWARD_MIN, REWARD_MAX) - REWARD_MIN) / (REWARD_MAX - REWARD_MIN)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jitai_core::records::new_intervention_id;
    use jitai_core::{
        ContentType, FrictionLevel, InterventionRecord, LongTermSignals, MediumTermSignals,
        ProximalSignals, ShortTermSignals, UsageChange, Variant,
    };

    fn outcome(choice: UserChoice) -> Outcome {
        let record = InterventionRecord {
            id: new_intervention_id(),
            timestamp_ms: 0,
            target_app: "app".into(),
            content_type: ContentType::Reflection,
            hour: 21,
            is_weekend: false,
            variant: Variant::Treatment,
            opportunity_score: 72,
            friction_level: FrictionLevel::Gentle,
            user_choice: None,
            decision_latency_ms: None,
            feedback: None,
        };
        let mut outcome = Outcome::pending(&record);
        outcome.proximal = Some(ProximalSignals {
            user_choice: choice,
            response_time_ms: 4_000,
            interaction_depth: 1,
            feedback: None,
        });
        outcome.proximal_collected = true;
        outcome
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn go_back_with_closed_session_scores_high() {
        let weights = RewardWeights::default();
        let mut o = outcome(UserChoice::GoBack);
        assert!(close(compute_raw_reward(&o, &weights), 0.5));

        o.short_term = Some(ShortTermSignals {
            session_continued: false,
            quick_reopen: false,
            reopen_count_30m: 0,
        });
        assert!(close(compute_raw_reward(&o, &weights), 0.8));
        assert!(close(to_bandit_reward(0.8), 0.9));
    }

    #[test]
    fn quick_reopen_cancels_the_session_bonus() {
        let weights = RewardWeights::default();
        let mut o = outcome(UserChoice::GoBack);
        o.short_term = Some(ShortTermSignals {
            session_continued: false,
            quick_reopen: true,
            reopen_count_30m: 2,
        });
        assert!(close(compute_raw_reward(&o, &weights), 0.2));
    }

    #[test]
    fn penalties_for_continue_and_timeout() {
        let weights = RewardWeights::default();
        assert!(close(compute_raw_reward(&outcome(UserChoice::Continue), &weights), -0.2));
        assert!(close(compute_raw_reward(&outcome(UserChoice::Timeout), &weights), -0.3));
        assert!(close(compute_raw_reward(&outcome(UserChoice::Dismissed), &weights), 0.0));
    }

    #[test]
    fn unknown_signals_contribute_nothing() {
        let weights = RewardWeights::default();
        let mut o = outcome(UserChoice::Dismissed);
        o.medium_term = Some(MediumTermSignals {
            additional_sessions: 3,
            screen_time_ms: 1_000,
            goal_met: None,
        });
        o.long_term = Some(LongTermSignals {
            usage_change: UsageChange::Unknown,
            usage_change_pct: None,
            retained: true,
            app_uninstalled: false,
            streak_maintained: None,
        });
        assert!(close(compute_raw_reward(&o, &weights), 0.0));
    }

    #[test]
    fn uninstall_saturates_at_the_upper_bound() {
        let weights = RewardWeights::default();
        let mut o = outcome(UserChoice::GoBack);
        o.long_term = Some(LongTermSignals {
            usage_change: UsageChange::SignificantReduction,
            usage_change_pct: Some(-1.0),
            retained: true,
            app_uninstalled: true,
            streak_maintained: Some(true),
        });
        assert!(close(compute_raw_reward(&o, &weights), REWARD_MAX));
        assert!(close(to_bandit_reward(REWARD_MAX), 1.0));
    }

    #[test]
    fn retention_loss_is_penalized() {
        let weights = RewardWeights::default();
        let mut o = outcome(UserChoice::Continue);
        o.long_term = Some(LongTermSignals {
            usage_change: UsageChange::Increase,
            usage_change_pct: Some(0.4),
            retained: false,
            app_uninstalled: false,
            streak_maintained: Some(false),
        });
        assert!(close(compute_raw_reward(&o, &weights), -0.7));
        assert!(close(to_bandit_reward(-0.7), 0.15));
    }
}
