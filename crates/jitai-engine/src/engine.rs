//! Caller-facing facade: the app-open handler, the scheduler and analytics
//! screens all go through [`Engine`].

use crate::burden::BurdenAssessment;
use crate::orchestrator::{CollectionSummary, Decision, DecisionOrchestrator, EffectivenessReport};
use jitai_bandits::{RolloutCheck, RolloutStatus};
use jitai_core::state::{KEY_ENABLED, KEY_SNOOZE_UNTIL};
use jitai_core::{
    Clock, EngineConfig, Feedback, Horizon, InterventionContext, Outcome, PersonaClassifier,
    ProximalSignals, PruneReport, SessionRecord, Store, UserChoice,
};
use jitai_feedback::{ContentEffectiveness, DecisionSummary};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

/// Thread-safe entry point wrapping one [`DecisionOrchestrator`].
///
/// Every call takes the same lock, so evaluations for different apps run one
/// after another. Bandit, burden, rollout and cooldown state is shared across
/// apps and each evaluation read-modify-writes it; none of the stages wait
/// on anything but the store.
pub struct Engine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    persona: Arc<dyn PersonaClassifier>,
    inner: Mutex<DecisionOrchestrator>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    /// Loads learner state from `store`. `user_id` is the stable anonymous id
    /// used for rollout bucketing.
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        persona: Arc<dyn PersonaClassifier>,
        config: EngineConfig,
        user_id: &str,
    ) -> Self {
        let offset = clock.now().offset();
        let inner = DecisionOrchestrator::new(store.clone(), config, user_id, offset);
        Self {
            store,
            clock,
            persona,
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DecisionOrchestrator> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Fresh context for `target_app` with calendar fields from the clock.
    #[must_use]
    pub fn context_now(&self, target_app: &str) -> InterventionContext {
        InterventionContext::new(self.clock.now(), target_app)
    }

    /// Decides SHOW or SKIP for one app-open event. Never fails.
    pub fn evaluate(&self, ctx: &InterventionContext) -> Decision {
        let persona = self.persona.classify(&ctx.target_app);
        let now_ms = self.clock.now_ms();
        self.lock().evaluate(ctx, persona, now_ms)
    }

    /// Records the overlay answer; `None` when it could not be stored.
    pub fn record_outcome(
        &self,
        intervention_id: &str,
        user_choice: UserChoice,
        response_time_ms: i64,
        feedback: Option<Feedback>,
        interaction_depth: u32,
    ) -> Option<Outcome> {
        let signals = ProximalSignals {
            user_choice,
            response_time_ms,
            interaction_depth,
            feedback,
        };
        let now_ms = self.clock.now_ms();
        self.lock().record_outcome(intervention_id, signals, now_ms)
    }

    pub fn collect(&self, horizon: Horizon, limit: usize) -> CollectionSummary {
        let now_ms = self.clock.now_ms();
        self.lock().collect(horizon, now_ms, limit)
    }

    pub fn collect_short_term(&self, limit: usize) -> CollectionSummary {
        self.collect(Horizon::ShortTerm, limit)
    }

    pub fn collect_medium_term(&self, limit: usize) -> CollectionSummary {
        self.collect(Horizon::MediumTerm, limit)
    }

    pub fn collect_long_term(&self, limit: usize) -> CollectionSummary {
        self.collect(Horizon::LongTerm, limit)
    }

    pub fn content_effectiveness(&self) -> jitai_core::Result<Vec<ContentEffectiveness>> {
        self.lock().content_effectiveness()
    }

    pub fn burden_summary(&self) -> BurdenAssessment {
        let now_ms = self.clock.now_ms();
        self.lock().burden_summary(now_ms)
    }

    pub fn decision_summary(&self, days_back: i64) -> jitai_core::Result<DecisionSummary> {
        let now_ms = self.clock.now_ms();
        self.lock().decision_summary(now_ms, days_back)
    }

    pub fn effectiveness_metrics(&self) -> jitai_core::Result<EffectivenessReport> {
        self.lock().effectiveness_report()
    }

    pub fn prune(&self, retention_days: Option<i64>) -> jitai_core::Result<PruneReport> {
        let now_ms = self.clock.now_ms();
        self.lock().prune(now_ms, retention_days)
    }

    /// Master switch read by the first rate-limit gate.
    pub fn set_enabled(&self, enabled: bool) -> jitai_core::Result<()> {
        self.store.set(KEY_ENABLED, if enabled { "true" } else { "false" })?;
        info!(enabled, "interventions switched");
        Ok(())
    }

    pub fn snooze_until(&self, until_ms: i64) -> jitai_core::Result<()> {
        self.store.set(KEY_SNOOZE_UNTIL, &until_ms.to_string())?;
        info!(until_ms, "interventions snoozed");
        Ok(())
    }

    pub fn clear_snooze(&self) -> jitai_core::Result<()> {
        self.store.remove(KEY_SNOOZE_UNTIL)
    }

    /// Stores a finished usage session and drops caches that depend on it.
    pub fn record_session(&self, session: &SessionRecord) -> jitai_core::Result<()> {
        self.store.append_session(session)?;
        self.lock().invalidate(&session.target_app);
        Ok(())
    }

    pub fn mark_uninstalled(&self, target_app: &str) -> jitai_feedback::Result<()> {
        self.lock().collector().mark_uninstalled(target_app)
    }

    pub fn set_rollout_percentage(&self, percentage: u8) -> RolloutStatus {
        self.lock().set_rollout_percentage(percentage)
    }

    pub fn enable_rollout(&self) -> RolloutStatus {
        self.lock().enable_rollout()
    }

    pub fn rollout_status(&self) -> RolloutStatus {
        self.lock().rollout_status()
    }

    pub fn check_rollout(&self) -> RolloutCheck {
        let now_ms = self.clock.now_ms();
        self.lock().check_rollout(now_ms)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use jitai_core::state::KEY_BURDEN_TREND;
    use jitai_core::{
        BlockingReason, ManualClock, MemoryStore, Persona, RecordQuery, StaticPersona,
    };
    use time::macros::datetime;
    use time::Duration;

    fn engine() -> (Engine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(datetime!(2024-03-05 14:00 UTC)));
        let engine = Engine::new(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            Arc::new(StaticPersona::new(Persona::CasualUser, 0.9)),
            EngineConfig::default(),
            "user-1",
        );
        (engine, clock)
    }

    fn receptive(engine: &Engine) -> InterventionContext {
        let mut ctx = engine.context_now("video");
        ctx.quick_reopen_attempt = true;
        ctx.session_count_today = 1;
        ctx.time_since_last_session_ms = Some(60_000);
        ctx.is_over_goal = true;
        ctx
    }

    #[test]
    fn switches_gate_evaluation() {
        let (engine, clock) = engine();
        engine.set_enabled(false).unwrap();
        let decision = engine.evaluate(&receptive(&engine));
        assert_eq!(decision.blocking_reason, Some(BlockingReason::FeatureDisabled));

        engine.set_enabled(true).unwrap();
        engine
            .snooze_until(clock.now_ms() + 10 * 60_000)
            .unwrap();
        let decision = engine.evaluate(&receptive(&engine));
        assert_eq!(decision.blocking_reason, Some(BlockingReason::UserSnooze));

        engine.clear_snooze().unwrap();
        assert!(engine.evaluate(&receptive(&engine)).is_show());
    }

    #[test]
    fn context_now_follows_clock() {
        let (engine, clock) = engine();
        clock.advance(Duration::hours(9));
        let ctx = engine.context_now("video");
        assert_eq!(ctx.hour, 23);
        assert_eq!(ctx.weekday, 2);
        assert!(!ctx.is_weekend);
    }

    #[test]
    fn decision_summary_sees_both_outcomes() {
        let (engine, clock) = engine();
        assert!(engine.evaluate(&receptive(&engine)).is_show());
        clock.advance(Duration::minutes(1));
        engine.evaluate(&receptive(&engine));
        let summary = engine.decision_summary(1).unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.shown, 1);
        assert_eq!(summary.by_reason[&BlockingReason::BasicCooldown], 1);
    }

    #[test]
    fn evaluations_from_several_threads_each_leave_one_row() {
        let (engine, _clock) = engine();
        let engine = Arc::new(engine);
        let handles: Vec<_> = ["video", "feed", "chat", "game"]
            .into_iter()
            .map(|app| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || engine.evaluate(&engine.context_now(app)))
            })
            .collect();
        let shown = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Decision::is_show)
            .count();
        let rows = engine.store().explanations(&RecordQuery::all()).unwrap();
        assert_eq!(rows.len(), 4);
        // The cooldown spans apps, so at most one of the four is shown.
        assert!(shown <= 1);
    }

    #[test]
    fn polling_burden_summary_writes_nothing() {
        let (engine, clock) = engine();
        for _ in 0..5 {
            let summary = engine.burden_summary();
            assert!(summary.recent_scores.is_empty());
            clock.advance(Duration::minutes(11));
        }
        assert_eq!(engine.store().get(KEY_BURDEN_TREND).unwrap(), None);

        engine.evaluate(&receptive(&engine));
        assert!(engine.store().get(KEY_BURDEN_TREND).unwrap().is_some());
        assert_eq!(engine.burden_summary().recent_scores.len(), 1);
    }
}
