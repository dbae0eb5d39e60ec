#![warn(clippy::unwrap_used, clippy::expect_used)]

//! Closing the loop: outcomes, rewards and decision analytics.
//!
//! [`OutcomeCollector`] fills in what happened after each shown intervention
//! and settles a reward through a [`RewardSink`]. [`DecisionLogger`] keeps the
//! audit trail and the `analytics` module aggregates both for reporting.

pub mod analytics;
pub mod error;
pub mod logger;
pub mod outcome;
pub mod reward;

pub use analytics::{
    content_effectiveness, effectiveness_metrics, go_back_rates, ContentEffectiveness,
    EffectivenessMetrics, HorizonCounts, OutcomeStatistics,
};
pub use error::{CollectError, Result};
pub use logger::{DecisionLogger, DecisionSummary};
pub use outcome::{CollectReport, OutcomeCollector, RewardSignal, RewardSink};
pub use reward::{compute_raw_reward, to_bandit_reward};
