//! Tunables for every component. All fields default, so a partial JSON file
//! only needs to name what it overrides.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub opportunity: OpportunityConfig,
    pub bandit: BanditConfig,
    pub selection: SelectionConfig,
    pub burden: BurdenConfig,
    pub timing: TimingConfig,
    pub rollout: RolloutConfig,
    pub rate_limit: RateLimitConfig,
    pub outcome: OutcomeConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpportunityConfig {
    pub cache_ttl_secs: u64,
    /// Days of intervention history the historical-success factor reads.
    pub history_days: i64,
    pub history_limit: usize,
    /// Hours on either side of the current hour that count as "same time".
    pub hour_window: u8,
    pub min_window_samples: usize,
}

impl Default for OpportunityConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 5 * 60,
            history_days: 14,
            history_limit: 50,
            hour_window: 2,
            min_window_samples: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BanditConfig {
    pub sufficient_data_pulls: f64,
    /// Fixed RNG seed; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            sufficient_data_pulls: 30.0,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub history_len: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self { history_len: 10 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BurdenConfig {
    pub lookback_days: i64,
    pub cache_ttl_secs: u64,
    pub trend_window: usize,
}

impl Default for BurdenConfig {
    fn default() -> Self {
        Self {
            lookback_days: 30,
            cache_ttl_secs: 10 * 60,
            trend_window: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub learning_rate: f64,
    pub min_observations: u32,
    pub optimizer_refresh_secs: u64,
    pub reliable_samples: usize,
    pub excellent_rate: f64,
    pub poor_rate: f64,
    pub lookback_days: i64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.15,
            min_observations: 3,
            optimizer_refresh_secs: 15 * 60,
            reliable_samples: 5,
            excellent_rate: 0.60,
            poor_rate: 0.30,
            lookback_days: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolloutConfig {
    /// Share of users, 0..=100, bucketed into TREATMENT.
    pub percentage: u8,
    pub ema_alpha: f64,
    /// Relative shortfall of TREATMENT vs CONTROL that triggers rollback.
    pub rollback_margin: f64,
    pub check_interval_secs: u64,
    /// Observations each variant needs before the comparison runs.
    pub min_observations: u32,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            percentage: 50,
            ema_alpha: 0.1,
            rollback_margin: 0.10,
            check_interval_secs: 24 * 60 * 60,
            min_observations: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub base_cooldown_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_cooldown_secs: 5 * 60,
        }
    }
}

/// Linear reward terms. Positive values reward, negative values penalize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardWeights {
    pub go_back: f64,
    pub session_closed: f64,
    pub continued: f64,
    pub timeout: f64,
    pub quick_reopen: f64,
    pub goal_met: f64,
    pub usage_reduced: f64,
    pub streak_maintained: f64,
    pub retention_lost: f64,
    pub app_uninstalled: f64,
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            go_back: 0.5,
            session_closed: 0.3,
            continued: -0.2,
            timeout: -0.3,
            quick_reopen: -0.3,
            goal_met: 0.1,
            usage_reduced: 0.1,
            streak_maintained: 0.05,
            retention_lost: -0.5,
            app_uninstalled: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutcomeConfig {
    pub short_term_delay_secs: u64,
    pub quick_reopen_secs: u64,
    pub continuation_grace_secs: u64,
    pub medium_term_delay_secs: u64,
    pub long_term_delay_days: i64,
    pub retention_window_days: i64,
    pub weights: RewardWeights,
}

impl Default for OutcomeConfig {
    fn default() -> Self {
        Self {
            short_term_delay_secs: 30 * 60,
            quick_reopen_secs: 5 * 60,
            continuation_grace_secs: 60,
            medium_term_delay_secs: 6 * 60 * 60,
            long_term_delay_days: 7,
            retention_window_days: 3,
            weights: RewardWeights::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { days: 90 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"rollout":{"percentage":0},"timing":{"learning_rate":0.3}}"#)
                .expect("config should parse");
        assert_eq!(config.rollout.percentage, 0);
        assert!((config.rollout.ema_alpha - 0.1).abs() < f64::EPSILON);
        assert!((config.timing.learning_rate - 0.3).abs() < f64::EPSILON);
        assert_eq!(config.timing.min_observations, 3);
        assert_eq!(config.retention.days, 90);
    }
}
