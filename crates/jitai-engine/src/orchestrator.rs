//! One decision per app-open event, plus the learning loop behind it.
//!
//! Stages run in a fixed order: rate limits, opportunity scoring, burden,
//! content selection. The first stage that objects produces a SKIP with its
//! blocking reason; every run leaves one [`DecisionExplanation`] row behind.

use crate::burden::{BurdenAssessment, BurdenEstimator};
use crate::opportunity::OpportunityScorer;
use crate::rate_limit::RateLimiter;
use crate::timing::{ContextualTimingOptimizer, TimingLearner, TimingRecommendation};
use jitai_bandits::{
    BetaBandit, ContentSelectionPolicy, RolloutCheck, RolloutController, RolloutStatus,
    SelectionInput,
};
use jitai_core::clock::DAY_MS;
use jitai_core::records::new_intervention_id;
use jitai_core::{
    BlockingReason, ContentType, DecisionExplanation, DecisionKind, EngineConfig, FrictionLevel,
    Horizon, InterventionContext, InterventionId, InterventionRecord, OpportunityLevel, Outcome,
    PersonaAssessment, ProximalSignals, RecordQuery, Store, Variant,
};
use jitai_feedback::{
    content_effectiveness, effectiveness_metrics, go_back_rates, CollectReport,
    ContentEffectiveness, DecisionLogger, DecisionSummary, EffectivenessMetrics, OutcomeCollector,
    RewardSignal, RewardSink,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use time::UtcOffset;
use tracing::{debug, info, warn};

/// Answered records per content type before its go-back rate shapes weights.
const EFFECTIVENESS_MIN_SAMPLES: usize = 3;

/// What the caller gets back from one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub decision: DecisionKind,
    pub intervention_id: Option<InterventionId>,
    pub content_type: Option<ContentType>,
    pub friction_level: Option<FrictionLevel>,
    pub blocking_reason: Option<BlockingReason>,
    pub variant: Variant,
    pub summary: String,
    pub explanation: DecisionExplanation,
}

impl Decision {
    fn from_explanation(explanation: DecisionExplanation) -> Self {
        Self {
            decision: explanation.decision,
            intervention_id: explanation.intervention_id.clone(),
            content_type: explanation.content.as_ref().map(|c| c.content_type),
            friction_level: explanation.friction,
            blocking_reason: explanation.blocking_reason,
            variant: explanation.variant,
            summary: explanation.summary_line(),
            explanation,
        }
    }

    #[must_use]
    pub fn is_show(&self) -> bool {
        self.decision == DecisionKind::Show
    }
}

/// Context kept from SHOW until the answer arrives or the short-term
/// horizon passes.
#[derive(Debug, Clone)]
struct PendingIntervention {
    shown_at_ms: i64,
    context: InterventionContext,
    content_type: ContentType,
    variant: Variant,
}

/// Engine-wide analytics view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectivenessReport {
    #[serde(flatten)]
    pub metrics: EffectivenessMetrics,
    pub rollout: RolloutStatus,
    pub bandit_total_pulls: f64,
    pub bandit_sufficient_data: bool,
}

/// Result of one scheduled collection pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSummary {
    #[serde(flatten)]
    pub report: CollectReport,
    pub rollout_check: RolloutCheck,
}

/// Feeds settled rewards into every learner.
struct LearnerSink<'a> {
    bandit: &'a mut BetaBandit,
    timing: &'a mut TimingLearner,
    rollout: &'a mut RolloutController,
    now_ms: i64,
    applied: usize,
}

impl RewardSink for LearnerSink<'_> {
    fn apply(&mut self, signal: &RewardSignal) {
        let updated = match signal.previous_bandit_reward {
            Some(previous) => {
                let delta = signal.bandit_reward - previous;
                self.timing.revise_timing_outcome(
                    &signal.target_app,
                    signal.hour,
                    signal.is_weekend,
                    delta,
                    self.now_ms,
                );
                // Rollout success is the proximal answer and is already counted.
                self.bandit.revise(signal.content_type, delta)
            }
            None => {
                self.timing.record_timing_outcome(
                    &signal.target_app,
                    signal.hour,
                    signal.is_weekend,
                    signal.bandit_reward,
                    self.now_ms,
                );
                self.rollout.record_outcome(signal.variant, signal.success);
                self.bandit.update(signal.content_type, signal.bandit_reward)
            }
        };
        if let Err(err) = updated {
            warn!(id = %signal.intervention_id, error = %err, "bandit update rejected");
        }
        self.applied += 1;
    }
}

pub struct DecisionOrchestrator {
    store: Arc<dyn Store>,
    config: EngineConfig,
    scorer: OpportunityScorer,
    burden: BurdenEstimator,
    timing: TimingLearner,
    optimizer: ContextualTimingOptimizer,
    bandit: BetaBandit,
    selection: ContentSelectionPolicy,
    rollout: RolloutController,
    limiter: RateLimiter,
    logger: DecisionLogger,
    collector: OutcomeCollector,
    pending: HashMap<InterventionId, PendingIntervention>,
}

impl std::fmt::Debug for DecisionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionOrchestrator")
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl DecisionOrchestrator {
    /// Builds every component and loads learner state from `store`.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        config: EngineConfig,
        user_id: &str,
        offset: UtcOffset,
    ) -> Self {
        let backing = store.as_ref();
        let seed = config.bandit.seed;
        let bandit = BetaBandit::load_from(backing, seed)
            .with_sufficient_data_pulls(config.bandit.sufficient_data_pulls);
        let timing = TimingLearner::load_from(backing, &config.timing);
        let rollout = RolloutController::load_from(backing, user_id, config.rollout.clone());
        let burden = BurdenEstimator::load_from(backing, config.burden.clone());
        Self {
            scorer: OpportunityScorer::new(config.opportunity.clone()),
            optimizer: ContextualTimingOptimizer::new(&config.timing),
            selection: ContentSelectionPolicy::new(
                config.selection.history_len,
                seed.map(|s| s.wrapping_add(1)),
            ),
            limiter: RateLimiter::new(config.rate_limit.clone()),
            logger: DecisionLogger::new(store.clone()),
            collector: OutcomeCollector::new(store.clone(), config.outcome.clone())
                .with_offset(offset),
            pending: HashMap::new(),
            store,
            config,
            burden,
            timing,
            bandit,
            rollout,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn bandit(&self) -> &BetaBandit {
        &self.bandit
    }

    #[must_use]
    pub fn timing(&self) -> &TimingLearner {
        &self.timing
    }

    #[must_use]
    pub fn collector(&self) -> &OutcomeCollector {
        &self.collector
    }

    /// Interventions shown and not yet answered.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Drops pending entries whose short-term horizon has passed; their
    /// answers, if any arrive, still reach the store.
    fn expire_pending(&mut self, now_ms: i64) {
        let max_age_ms = i64::try_from(
            self.config
                .outcome
                .short_term_delay_secs
                .saturating_mul(1000),
        )
        .unwrap_or(i64::MAX);
        let before = self.pending.len();
        self.pending
            .retain(|_, pending| now_ms - pending.shown_at_ms <= max_age_ms);
        let expired = before - self.pending.len();
        if expired > 0 {
            debug!(expired, "unanswered interventions expired");
        }
    }

    /// Variant for this user, persisting a fresh assignment.
    fn current_variant(&mut self) -> Variant {
        let before = self.rollout.state().assignment;
        let variant = self.rollout.user_variant();
        if self.rollout.state().assignment != before {
            self.rollout.save_to(self.store.as_ref());
        }
        variant
    }

    /// Drops cached scoring after something about `target_app` changed.
    pub fn invalidate(&mut self, target_app: &str) {
        self.scorer.invalidate(target_app);
        self.burden.invalidate();
        self.optimizer.invalidate();
    }

    /// Runs the decision pipeline for one app-open event.
    pub fn evaluate(
        &mut self,
        ctx: &InterventionContext,
        persona: PersonaAssessment,
        now_ms: i64,
    ) -> Decision {
        let mut explanation = DecisionExplanation::new(now_ms, ctx.target_app.as_str());
        explanation.persona = persona.persona;
        explanation.persona_confidence = persona.confidence;
        explanation.variant = self.current_variant();

        let store = self.store.clone();
        let burden = self.burden.assess(store.as_ref(), now_ms);
        explanation.burden = Some(burden.snapshot());

        let limits = self.limiter.check(
            store.as_ref(),
            ctx,
            persona.persona,
            burden.cooldown_multiplier,
            now_ms,
        );
        explanation.rate_limits = limits.checks.clone();
        if let Some(reason) = limits.blocked {
            return self.skip(explanation, reason);
        }

        let detection = self.scorer.detect(ctx, &self.timing, store.as_ref(), now_ms);
        let level = detection.level;
        explanation.note(format!(
            "opportunity {} ({level:?}){}",
            detection.score,
            if detection.personalized_timing {
                ", personalized timing"
            } else {
                ""
            }
        ));
        explanation.opportunity = Some(detection);
        if level == OpportunityLevel::Poor {
            return self.skip(explanation, BlockingReason::PoorOpportunity);
        }

        let timing = self.optimizer.optimal_timing(store.as_ref(), ctx, now_ms);
        if let TimingRecommendation::Delay { target_hour, hours } = timing.recommendation {
            explanation.note(format!(
                "timing suggests waiting {hours}h until {target_hour}:00 ({:?} confidence)",
                timing.confidence
            ));
            if level <= OpportunityLevel::Moderate {
                return self.skip(explanation, BlockingReason::PoorOpportunity);
            }
        }

        if burden.blocks(level) {
            explanation.note(format!(
                "burden {:?} (score {:.1}) blocks a {level:?} moment",
                burden.level, burden.score
            ));
            return self.skip(explanation, BlockingReason::BurdenMitigation);
        }

        let effectiveness = self.effectiveness_rates(now_ms);
        let input = SelectionInput {
            context: ctx,
            persona: persona.persona,
            opportunity: level,
            effectiveness: &effectiveness,
        };
        let selection = self
            .selection
            .select(&input, explanation.variant, &mut self.bandit);
        let friction = friction_for(ctx.friction_level, &burden, level);
        if friction != ctx.friction_level {
            explanation.note(format!("friction softened to {friction:?}"));
        }

        let record = InterventionRecord {
            id: new_intervention_id(),
            timestamp_ms: now_ms,
            target_app: ctx.target_app.clone(),
            content_type: selection.content_type,
            hour: ctx.hour % 24,
            is_weekend: ctx.is_weekend,
            variant: explanation.variant,
            opportunity_score: explanation.opportunity.as_ref().map_or(0, |o| o.score),
            friction_level: friction,
            user_choice: None,
            decision_latency_ms: None,
            feedback: None,
        };
        if let Err(err) = store.append_intervention(&record) {
            warn!(app = %ctx.target_app, error = %err, "could not persist intervention, skipping");
            explanation.note("intervention row could not be written");
            return self.skip(explanation, BlockingReason::Other);
        }
        if let Err(err) = self.collector.open(&record) {
            warn!(id = %record.id, error = %err, "could not open outcome row");
        }
        self.expire_pending(now_ms);
        self.pending.insert(
            record.id.clone(),
            PendingIntervention {
                shown_at_ms: now_ms,
                context: ctx.clone(),
                content_type: record.content_type,
                variant: record.variant,
            },
        );
        self.scorer.invalidate(&ctx.target_app);
        self.burden.invalidate();

        explanation.decision = DecisionKind::Show;
        explanation.intervention_id = Some(record.id);
        explanation.content = Some(selection);
        explanation.friction = Some(friction);
        self.logger.log(&explanation);
        info!(summary = %explanation.summary_line(), "intervention shown");
        Decision::from_explanation(explanation)
    }

    fn skip(&mut self, mut explanation: DecisionExplanation, reason: BlockingReason) -> Decision {
        explanation.decision = DecisionKind::Skip;
        explanation.blocking_reason = Some(reason);
        self.logger.log(&explanation);
        debug!(summary = %explanation.summary_line(), "intervention skipped");
        Decision::from_explanation(explanation)
    }

    fn effectiveness_rates(&self, now_ms: i64) -> std::collections::BTreeMap<ContentType, f64> {
        let since = now_ms - self.config.opportunity.history_days.max(1).saturating_mul(DAY_MS);
        match self.store.interventions(&RecordQuery::all().since(since)) {
            Ok(records) => go_back_rates(&records, EFFECTIVENESS_MIN_SAMPLES),
            Err(err) => {
                warn!(error = %err, "effectiveness history unavailable");
                std::collections::BTreeMap::new()
            }
        }
    }

    /// Records the overlay answer. The pending context is taken exactly once.
    pub fn record_outcome(
        &mut self,
        intervention_id: &str,
        signals: ProximalSignals,
        now_ms: i64,
    ) -> Option<Outcome> {
        let pending = self.pending.remove(intervention_id);
        match self
            .collector
            .record_proximal(intervention_id, signals, now_ms)
        {
            Ok(outcome) => {
                if let Some(pending) = &pending {
                    debug!(
                        id = intervention_id,
                        app = %pending.context.target_app,
                        content = %pending.content_type,
                        variant = %pending.variant,
                        latency_ms = now_ms - pending.shown_at_ms,
                        "answer matched pending intervention"
                    );
                }
                self.invalidate(&outcome.target_app);
                Some(outcome)
            }
            Err(err) => {
                warn!(id = intervention_id, error = %err, "could not record outcome");
                None
            }
        }
    }

    /// Runs one collection pass and feeds settled rewards to the learners.
    pub fn collect(&mut self, horizon: Horizon, now_ms: i64, limit: usize) -> CollectionSummary {
        self.expire_pending(now_ms);
        let mut sink = LearnerSink {
            bandit: &mut self.bandit,
            timing: &mut self.timing,
            rollout: &mut self.rollout,
            now_ms,
            applied: 0,
        };
        let report = match horizon {
            Horizon::Proximal => CollectReport {
                horizon: Some(Horizon::Proximal),
                ..CollectReport::default()
            },
            Horizon::ShortTerm => self.collector.collect_short_term(now_ms, limit, &mut sink),
            Horizon::MediumTerm => self.collector.collect_medium_term(now_ms, limit, &mut sink),
            Horizon::LongTerm => self.collector.collect_long_term(now_ms, limit, &mut sink),
        };
        let applied = sink.applied;

        let store = self.store.as_ref();
        if applied > 0 {
            self.bandit.save_to(store);
            self.timing.save_to(store);
            self.optimizer.invalidate();
            self.scorer.invalidate_all();
        }
        let rollout_check = self.rollout.check(now_ms);
        if applied > 0 || rollout_check != RolloutCheck::NotDue {
            self.rollout.save_to(store);
        }
        CollectionSummary {
            report,
            rollout_check,
        }
    }

    pub fn content_effectiveness(&self) -> jitai_core::Result<Vec<ContentEffectiveness>> {
        let records = self.store.interventions(&RecordQuery::all())?;
        let outcomes = self.store.outcomes(&RecordQuery::all())?;
        let mut rows = content_effectiveness(&records, &outcomes);
        for row in &mut rows {
            row.posterior_mean = Some(self.bandit.arm(row.content_type).mean());
            row.confidence = Some(self.bandit.confidence(row.content_type));
        }
        Ok(rows)
    }

    /// Burden as a read-only view; only decisions extend the trend.
    pub fn burden_summary(&self, now_ms: i64) -> BurdenAssessment {
        self.burden.peek(self.store.as_ref(), now_ms)
    }

    pub fn decision_summary(
        &self,
        now_ms: i64,
        days_back: i64,
    ) -> jitai_core::Result<DecisionSummary> {
        self.logger.decision_summary(now_ms, days_back)
    }

    pub fn effectiveness_report(&mut self) -> jitai_core::Result<EffectivenessReport> {
        let interventions = self.store.interventions(&RecordQuery::all())?.len();
        let outcomes = self.store.outcomes(&RecordQuery::all())?;
        Ok(EffectivenessReport {
            metrics: effectiveness_metrics(interventions, &outcomes),
            rollout: self.rollout.status(),
            bandit_total_pulls: self.bandit.total_pulls(),
            bandit_sufficient_data: self.bandit.has_sufficient_data(),
        })
    }

    /// Deletes rows older than `retention_days` (configured default when `None`).
    pub fn prune(
        &mut self,
        now_ms: i64,
        retention_days: Option<i64>,
    ) -> jitai_core::Result<jitai_core::PruneReport> {
        self.expire_pending(now_ms);
        let days = retention_days.unwrap_or(self.config.retention.days);
        let report = self.logger.prune(now_ms, days)?;
        if report.total() > 0 {
            self.scorer.invalidate_all();
            self.burden.invalidate();
            self.optimizer.invalidate();
        }
        Ok(report)
    }

    pub fn set_rollout_percentage(&mut self, percentage: u8) -> RolloutStatus {
        self.rollout.set_percentage(percentage);
        let status = self.rollout.status();
        self.rollout.save_to(self.store.as_ref());
        status
    }

    pub fn enable_rollout(&mut self) -> RolloutStatus {
        self.rollout.re_enable();
        let status = self.rollout.status();
        self.rollout.save_to(self.store.as_ref());
        status
    }

    pub fn rollout_status(&mut self) -> RolloutStatus {
        self.rollout.status()
    }

    pub fn check_rollout(&mut self, now_ms: i64) -> RolloutCheck {
        let check = self.rollout.check(now_ms);
        if check != RolloutCheck::NotDue {
            self.rollout.save_to(self.store.as_ref());
        }
        check
    }
}

/// Softens friction when the user is already loaded or the moment is middling.
fn friction_for(
    requested: FrictionLevel,
    burden: &BurdenAssessment,
    opportunity: OpportunityLevel,
) -> FrictionLevel {
    if burden.level >= jitai_core::BurdenLevel::High || opportunity == OpportunityLevel::Moderate {
        requested.softened()
    } else {
        requested
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use jitai_core::clock::MINUTE_MS;
    use jitai_core::{MemoryStore, Persona, UserChoice};

    const NOW: i64 = 1_700_000_000_000;

    fn orchestrator(store: Arc<MemoryStore>) -> DecisionOrchestrator {
        let mut config = EngineConfig::default();
        config.bandit.seed = Some(7);
        DecisionOrchestrator::new(store, config, "user-1", UtcOffset::UTC)
    }

    fn receptive(at: i64) -> InterventionContext {
        InterventionContext {
            timestamp_ms: at,
            hour: 14,
            target_app: "video".into(),
            quick_reopen_attempt: true,
            session_count_today: 1,
            time_since_last_session_ms: Some(2 * MINUTE_MS),
            is_over_goal: true,
            usage_today_ms: 90 * MINUTE_MS,
            weekly_average_ms: 60 * MINUTE_MS,
            friction_level: FrictionLevel::Firm,
            ..InterventionContext::default()
        }
    }

    fn history(at: i64, hour: u8, choice: UserChoice) -> InterventionRecord {
        InterventionRecord {
            id: String::new(),
            timestamp_ms: at,
            target_app: "video".into(),
            content_type: ContentType::Quote,
            hour,
            is_weekend: false,
            variant: Variant::Control,
            opportunity_score: 50,
            friction_level: FrictionLevel::Gentle,
            user_choice: Some(choice),
            decision_latency_ms: Some(4_000),
            feedback: None,
        }
    }

    fn casual() -> PersonaAssessment {
        PersonaAssessment {
            persona: Persona::CasualUser,
            confidence: 0.8,
        }
    }

    #[test]
    fn show_persists_record_outcome_and_explanation() {
        let store = Arc::new(MemoryStore::new());
        let mut orch = orchestrator(store.clone());
        let decision = orch.evaluate(&receptive(NOW), casual(), NOW);
        assert!(decision.is_show(), "{}", decision.summary);
        assert_eq!(decision.blocking_reason, None);
        let id = decision.intervention_id.clone().unwrap();
        assert!(store.intervention(&id).unwrap().is_some());
        assert!(store.outcome(&id).unwrap().is_some());
        assert_eq!(store.explanations(&RecordQuery::all()).unwrap().len(), 1);
        assert_eq!(orch.pending_count(), 1);
        assert_eq!(decision.friction_level, Some(FrictionLevel::Firm));
    }

    #[test]
    fn second_open_hits_cooldown() {
        let store = Arc::new(MemoryStore::new());
        let mut orch = orchestrator(store.clone());
        assert!(orch.evaluate(&receptive(NOW), casual(), NOW).is_show());
        let later = NOW + MINUTE_MS;
        let decision = orch.evaluate(&receptive(later), casual(), later);
        assert_eq!(decision.blocking_reason, Some(BlockingReason::BasicCooldown));
        let explanations = store.explanations(&RecordQuery::all()).unwrap();
        assert_eq!(explanations.len(), 2);
        assert_eq!(explanations[0].decision, DecisionKind::Skip);
    }

    #[test]
    fn delayed_timing_skips_middling_moment() {
        let store = Arc::new(MemoryStore::new());
        let base = NOW - 2 * DAY_MS;
        for i in 0..5_i64 {
            let mut bad = history(base + i * MINUTE_MS, 9, UserChoice::Dismissed);
            bad.id = format!("bad{i}");
            store.append_intervention(&bad).unwrap();
        }
        for i in 0..5_i64 {
            let mut good = history(base + (10 + i) * MINUTE_MS, 20, UserChoice::GoBack);
            good.id = format!("good{i}");
            store.append_intervention(&good).unwrap();
        }
        let mut orch = orchestrator(store);
        let ctx = InterventionContext {
            timestamp_ms: NOW,
            hour: 9,
            target_app: "video".into(),
            session_count_today: 3,
            session_duration_ms: 40 * MINUTE_MS,
            time_since_last_session_ms: Some(6 * 60 * MINUTE_MS),
            ..InterventionContext::default()
        };
        let decision = orch.evaluate(&ctx, casual(), NOW);
        assert_eq!(decision.blocking_reason, Some(BlockingReason::PoorOpportunity));
        assert!(decision.intervention_id.is_none());
        let opportunity = decision.explanation.opportunity.as_ref().unwrap();
        assert_eq!(opportunity.level, OpportunityLevel::Moderate);
        assert!(decision
            .explanation
            .rationale
            .iter()
            .any(|line| line.starts_with("timing suggests waiting")));
    }

    #[test]
    fn unanswered_interventions_leave_pending() {
        let store = Arc::new(MemoryStore::new());
        let mut orch = orchestrator(store);
        assert!(orch.evaluate(&receptive(NOW), casual(), NOW).is_show());
        orch.prune(NOW + 10 * MINUTE_MS, Some(1)).unwrap();
        assert_eq!(orch.pending_count(), 1);
        orch.prune(NOW + 31 * MINUTE_MS, Some(1)).unwrap();
        assert_eq!(orch.pending_count(), 0);

        for i in 1..=20_i64 {
            let at = NOW + i * 3 * 60 * MINUTE_MS;
            orch.evaluate(&receptive(at), casual(), at);
            assert!(orch.pending_count() <= 1);
        }
        let end = NOW + 61 * 3 * 60 * MINUTE_MS;
        orch.collect(Horizon::ShortTerm, end, 10);
        assert_eq!(orch.pending_count(), 0);
    }

    #[test]
    fn answer_consumes_pending_once() {
        let store = Arc::new(MemoryStore::new());
        let mut orch = orchestrator(store);
        let decision = orch.evaluate(&receptive(NOW), casual(), NOW);
        let id = decision.intervention_id.unwrap();
        let signals = ProximalSignals {
            user_choice: UserChoice::GoBack,
            response_time_ms: 2_000,
            interaction_depth: 1,
            feedback: None,
        };
        let first = orch.record_outcome(&id, signals.clone(), NOW + 2_000).unwrap();
        assert_eq!(first.user_choice(), Some(UserChoice::GoBack));
        assert_eq!(orch.pending_count(), 0);
        let again = orch
            .record_outcome(
                &id,
                ProximalSignals {
                    user_choice: UserChoice::Continue,
                    ..signals
                },
                NOW + 3_000,
            )
            .unwrap();
        assert_eq!(again.user_choice(), Some(UserChoice::GoBack));
        assert!(orch
            .record_outcome("missing", ProximalSignals {
                user_choice: UserChoice::Timeout,
                response_time_ms: 0,
                interaction_depth: 0,
                feedback: None,
            }, NOW)
            .is_none());
    }

    #[test]
    fn short_term_pass_updates_learners_once() {
        let store = Arc::new(MemoryStore::new());
        let mut orch = orchestrator(store.clone());
        let decision = orch.evaluate(&receptive(NOW), casual(), NOW);
        let id = decision.intervention_id.unwrap();
        let content = decision.content_type.unwrap();
        orch.record_outcome(
            &id,
            ProximalSignals {
                user_choice: UserChoice::GoBack,
                response_time_ms: 1_000,
                interaction_depth: 1,
                feedback: None,
            },
            NOW + 1_000,
        );
        let before = orch.bandit().arm(content).pulls();
        let later = NOW + 31 * MINUTE_MS;
        let summary = orch.collect(Horizon::ShortTerm, later, 50);
        assert_eq!(summary.report.rewards_applied, 1);
        assert!((orch.bandit().arm(content).pulls() - before - 1.0).abs() < 1e-9);

        let again = orch.collect(Horizon::ShortTerm, later + MINUTE_MS, 50);
        assert_eq!(again.report.rewards_applied, 0);
        assert!(store.get(jitai_core::state::KEY_BANDIT).unwrap().is_some());
    }

    #[test]
    fn effectiveness_report_flattens_metrics() {
        let store = Arc::new(MemoryStore::new());
        let mut orch = orchestrator(store);
        orch.evaluate(&receptive(NOW), casual(), NOW);
        let report = orch.effectiveness_report().unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["interventions"], 1);
        assert!(json["rollout"]["percentage"].is_number());
        assert_eq!(orch.content_effectiveness().unwrap().len(), ContentType::ALL.len());
    }
}
