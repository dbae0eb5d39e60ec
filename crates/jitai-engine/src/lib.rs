#![warn(clippy::unwrap_used, clippy::expect_used)]

//! Decision orchestration for just-in-time interventions.
//!
//! [`Engine`] is the caller-facing API. Underneath it the
//! [`DecisionOrchestrator`] runs rate limits, [`OpportunityScorer`],
//! [`BurdenEstimator`] and content selection per app-open event, and feeds
//! settled rewards back into the bandit, the [`TimingLearner`] and the
//! rollout controller.

pub mod burden;
pub mod engine;
pub mod opportunity;
pub mod orchestrator;
pub mod rate_limit;
pub mod timing;

pub use burden::{
    BurdenAssessment, BurdenEstimator, BurdenMetrics, BurdenTrendMonitor, FatigueRecoveryTracker,
};
pub use engine::Engine;
pub use opportunity::OpportunityScorer;
pub use orchestrator::{CollectionSummary, Decision, DecisionOrchestrator, EffectivenessReport};
pub use rate_limit::{RateLimitOutcome, RateLimiter};
pub use timing::{
    ContextualTimingOptimizer, OptimalTiming, TimingEstimate, TimingLearner, TimingRecommendation,
};
