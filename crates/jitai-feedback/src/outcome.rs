//! Multi-horizon outcome collection.
//!
//! An [`Outcome`] row is opened when an intervention is shown and filled in
//! four passes: proximal (the overlay answer), short-term (the next 30
//! minutes), medium-term (the rest of the day) and long-term (the following
//! week). Passes run strictly in order and each flips its flag once; running
//! a pass again over a collected row is a no-op. Learners are fed once per
//! intervention when the short-term horizon closes; when the long-term
//! horizon closes they receive a single revision replacing that reward with
//! the final one.
//!
//! Batch passes isolate failures per record: a record that cannot be
//! collected is logged and skipped while the batch continues.

use crate::error::{CollectError, Result};
use crate::reward::{compute_raw_reward, to_bandit_reward};
use jitai_core::clock::{end_of_day_ms, from_millis, DAY_MS};
use jitai_core::config::OutcomeConfig;
use jitai_core::state::{read_json, KEY_UNINSTALLED};
use jitai_core::{
    ContentType, Horizon, InterventionRecord, LongTermSignals, MediumTermSignals, Outcome,
    ProximalSignals, RecordQuery, ShortTermSignals, Store, UsageChange, UserChoice, Variant,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use time::UtcOffset;
use tracing::{debug, info, warn};

/// What the learners receive when an intervention's reward is settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardSignal {
    pub intervention_id: String,
    pub target_app: String,
    pub content_type: ContentType,
    pub variant: Variant,
    pub hour: u8,
    pub is_weekend: bool,
    /// Raw reward in `[-1, 1]`.
    pub raw_reward: f64,
    /// Reward mapped onto `[0, 1]`.
    pub bandit_reward: f64,
    /// Binary success: the user went back.
    pub success: bool,
    /// Bandit reward settled earlier for this intervention; `Some` marks a
    /// revision that replaces it rather than a new observation.
    pub previous_bandit_reward: Option<f64>,
}

impl RewardSignal {
    #[must_use]
    pub fn is_revision(&self) -> bool {
        self.previous_bandit_reward.is_some()
    }
}

/// Receiver for settled rewards.
pub trait RewardSink {
    fn apply(&mut self, signal: &RewardSignal);
}

impl RewardSink for Vec<RewardSignal> {
    fn apply(&mut self, signal: &RewardSignal) {
        self.push(signal.clone());
    }
}

/// Counts for one batch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectReport {
    pub horizon: Option<Horizon>,
    pub examined: usize,
    pub collected: usize,
    pub failed: usize,
    pub rewards_applied: usize,
}

#[derive(Clone)]
pub struct OutcomeCollector {
    store: Arc<dyn Store>,
    config: OutcomeConfig,
    offset: UtcOffset,
}

impl std::fmt::Debug for OutcomeCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeCollector")
            .field("config", &self.config)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX)
}

impl OutcomeCollector {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: OutcomeConfig) -> Self {
        Self {
            store,
            config,
            offset: UtcOffset::UTC,
        }
    }

    /// Local offset used to find the end of the calendar day.
    #[must_use]
    pub fn with_offset(mut self, offset: UtcOffset) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub fn config(&self) -> &OutcomeConfig {
        &self.config
    }

    /// Opens the pending outcome row for a freshly shown intervention.
    pub fn open(&self, record: &InterventionRecord) -> Result<()> {
        if self.store.outcome(&record.id)?.is_some() {
            return Ok(());
        }
        self.store.insert_outcome(&Outcome::pending(record))?;
        Ok(())
    }

    /// Records the overlay answer and copies it onto the intervention row.
    ///
    /// Recording twice keeps the first answer.
    pub fn record_proximal(
        &self,
        intervention_id: &str,
        signals: ProximalSignals,
        now_ms: i64,
    ) -> Result<Outcome> {
        let mut record = self
            .store
            .intervention(intervention_id)?
            .ok_or_else(|| CollectError::MissingIntervention(intervention_id.to_string()))?;

        let (mut outcome, existed) = match self.store.outcome(intervention_id)? {
            Some(outcome) => (outcome, true),
            None => (Outcome::pending(&record), false),
        };
        if outcome.proximal_collected {
            debug!(id = intervention_id, "proximal outcome already recorded");
            return Ok(outcome);
        }

        record.user_choice = Some(signals.user_choice);
        record.decision_latency_ms = Some(signals.response_time_ms.max(0));
        record.feedback = signals.feedback;
        self.store.update_intervention(&record)?;

        outcome.proximal = Some(signals);
        outcome.proximal_collected = true;
        outcome.reward = Some(compute_raw_reward(&outcome, &self.config.weights));
        outcome.updated_at_ms = now_ms;
        if existed {
            self.store.update_outcome(&outcome)?;
        } else {
            self.store.insert_outcome(&outcome)?;
        }
        debug!(
            id = intervention_id,
            choice = ?outcome.user_choice(),
            "proximal outcome recorded"
        );
        Ok(outcome)
    }

    /// Marks an app as uninstalled for the long-term pass.
    pub fn mark_uninstalled(&self, target_app: &str) -> Result<()> {
        let mut apps: BTreeSet<String> =
            read_json(self.store.as_ref(), KEY_UNINSTALLED).unwrap_or_default();
        if apps.insert(target_app.to_string()) {
            let raw = serde_json::to_string(&apps).map_err(jitai_core::StoreError::from)?;
            self.store.set(KEY_UNINSTALLED, &raw)?;
            info!(app = target_app, "tracked app marked as uninstalled");
        }
        Ok(())
    }

    fn uninstalled_apps(&self) -> BTreeSet<String> {
        read_json(self.store.as_ref(), KEY_UNINSTALLED).unwrap_or_default()
    }

    /// Outcomes waiting on `horizon` whose delay has passed, oldest first.
    fn due(&self, horizon: Horizon, now_ms: i64, limit: usize) -> Result<Vec<Outcome>> {
        let delay_ms = match horizon {
            Horizon::Proximal => 0,
            Horizon::ShortTerm => secs_to_ms(self.config.short_term_delay_secs),
            Horizon::MediumTerm => secs_to_ms(self.config.medium_term_delay_secs),
            Horizon::LongTerm => self.config.long_term_delay_days.saturating_mul(DAY_MS),
        };
        let mut due: Vec<Outcome> = self
            .store
            .outcomes(&RecordQuery::all().until(now_ms.saturating_sub(delay_ms) + 1))?
            .into_iter()
            .filter(|o| o.is_ready_for(horizon))
            .collect();
        due.reverse();
        due.truncate(limit);
        Ok(due)
    }

    fn run_batch(
        &self,
        horizon: Horizon,
        now_ms: i64,
        limit: usize,
        sink: &mut dyn RewardSink,
    ) -> CollectReport {
        let mut report = CollectReport {
            horizon: Some(horizon),
            ..CollectReport::default()
        };
        let due = match self.due(horizon, now_ms, limit) {
            Ok(due) => due,
            Err(err) => {
                warn!(?horizon, error = %err, "outcome batch query failed");
                return report;
            }
        };
        for outcome in due {
            report.examined += 1;
            let id = outcome.intervention_id.clone();
            match self.collect_one(outcome, horizon, now_ms, sink) {
                Ok(applied) => {
                    report.collected += 1;
                    if applied {
                        report.rewards_applied += 1;
                    }
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(id = %id, ?horizon, error = %err, "outcome collection failed, skipping");
                }
            }
        }
        if report.examined > 0 {
            info!(
                ?horizon,
                examined = report.examined,
                collected = report.collected,
                failed = report.failed,
                "outcome batch finished"
            );
        }
        report
    }

    /// Short-term pass: session continuation, quick reopen, reopen count.
    pub fn collect_short_term(
        &self,
        now_ms: i64,
        limit: usize,
        sink: &mut dyn RewardSink,
    ) -> CollectReport {
        self.run_batch(Horizon::ShortTerm, now_ms, limit, sink)
    }

    /// Medium-term pass: sessions and screen time for the rest of the day.
    pub fn collect_medium_term(
        &self,
        now_ms: i64,
        limit: usize,
        sink: &mut dyn RewardSink,
    ) -> CollectReport {
        self.run_batch(Horizon::MediumTerm, now_ms, limit, sink)
    }

    /// Long-term pass: usage change, retention, uninstall.
    pub fn collect_long_term(
        &self,
        now_ms: i64,
        limit: usize,
        sink: &mut dyn RewardSink,
    ) -> CollectReport {
        self.run_batch(Horizon::LongTerm, now_ms, limit, sink)
    }

    /// Collects one horizon of one outcome. Returns whether learners were fed
    /// or revised.
    pub fn collect_one(
        &self,
        mut outcome: Outcome,
        horizon: Horizon,
        now_ms: i64,
        sink: &mut dyn RewardSink,
    ) -> Result<bool> {
        if outcome.is_collected(horizon) {
            return Ok(false);
        }
        if !outcome.is_ready_for(horizon) {
            return Err(CollectError::OutOfOrder {
                id: outcome.intervention_id.clone(),
                horizon,
            });
        }

        match horizon {
            Horizon::Proximal => {
                return Err(CollectError::OutOfOrder {
                    id: outcome.intervention_id.clone(),
                    horizon,
                })
            }
            Horizon::ShortTerm => {
                outcome.short_term = Some(self.short_term_signals(&outcome)?);
                outcome.short_term_collected = true;
            }
            Horizon::MediumTerm => {
                outcome.medium_term = Some(self.medium_term_signals(&outcome)?);
                outcome.medium_term_collected = true;
            }
            Horizon::LongTerm => {
                outcome.long_term = Some(self.long_term_signals(&outcome)?);
                outcome.long_term_collected = true;
            }
        }

        let raw = compute_raw_reward(&outcome, &self.config.weights);
        outcome.reward = Some(raw);
        outcome.updated_at_ms = now_ms;

        let bandit_reward = to_bandit_reward(raw);
        let first = !outcome.reward_applied;
        let previous = outcome.applied_bandit_reward.filter(|_| !first);
        let revise = horizon == Horizon::LongTerm
            && !outcome.final_reward_applied
            && previous.is_some_and(|prev| (prev - bandit_reward).abs() > f64::EPSILON);
        let settle = first || revise;
        if settle {
            outcome.reward_applied = true;
            outcome.applied_bandit_reward = Some(bandit_reward);
        }
        if horizon == Horizon::LongTerm {
            outcome.final_reward_applied = true;
        }
        self.store.update_outcome(&outcome)?;

        if settle {
            let signal = RewardSignal {
                intervention_id: outcome.intervention_id.clone(),
                target_app: outcome.target_app.clone(),
                content_type: outcome.content_type,
                variant: outcome.variant,
                hour: outcome.hour,
                is_weekend: outcome.is_weekend,
                raw_reward: raw,
                bandit_reward,
                success: outcome.user_choice() == Some(UserChoice::GoBack),
                previous_bandit_reward: if revise { previous } else { None },
            };
            sink.apply(&signal);
            debug!(
                id = %signal.intervention_id,
                content = %signal.content_type,
                reward = signal.bandit_reward,
                previous = ?signal.previous_bandit_reward,
                "reward settled"
            );
        }
        Ok(settle)
    }

    fn response_at(outcome: &Outcome) -> i64 {
        outcome.shown_at_ms
            + outcome
                .proximal
                .as_ref()
                .map_or(0, |p| p.response_time_ms.max(0))
    }

    fn short_term_signals(&self, outcome: &Outcome) -> Result<ShortTermSignals> {
        let responded = Self::response_at(outcome);
        let window_end = outcome.shown_at_ms + secs_to_ms(self.config.short_term_delay_secs);
        let sessions = self.store.sessions(
            &RecordQuery::all()
                .app(outcome.target_app.as_str())
                .since(responded)
                .until(window_end.max(responded) + 1),
        )?;

        let grace_end = responded + secs_to_ms(self.config.continuation_grace_secs);
        let reopen_end = responded + secs_to_ms(self.config.quick_reopen_secs);
        let choice = outcome.user_choice();

        let session_continued = choice == Some(UserChoice::Continue)
            && sessions.iter().any(|s| s.start_ms <= grace_end);
        let quick_reopen = choice == Some(UserChoice::GoBack)
            && sessions
                .iter()
                .any(|s| s.start_ms > responded && s.start_ms <= reopen_end);
        let reopen_count_30m = sessions.iter().filter(|s| s.start_ms > responded).count();

        Ok(ShortTermSignals {
            session_continued,
            quick_reopen,
            reopen_count_30m: u32::try_from(reopen_count_30m).unwrap_or(u32::MAX),
        })
    }

    fn medium_term_signals(&self, outcome: &Outcome) -> Result<MediumTermSignals> {
        let responded = Self::response_at(outcome);
        let day_end = end_of_day_ms(from_millis(outcome.shown_at_ms, self.offset));
        let sessions = self.store.sessions(
            &RecordQuery::all()
                .app(outcome.target_app.as_str())
                .since(responded)
                .until(day_end),
        )?;
        let additional = sessions.iter().filter(|s| s.start_ms > responded).count();
        let screen_time_ms = sessions.iter().map(|s| s.duration_ms.max(0)).sum();
        Ok(MediumTermSignals {
            additional_sessions: u32::try_from(additional).unwrap_or(u32::MAX),
            screen_time_ms,
            goal_met: None,
        })
    }

    fn long_term_signals(&self, outcome: &Outcome) -> Result<LongTermSignals> {
        let window_ms = self.config.long_term_delay_days.saturating_mul(DAY_MS);
        let shown = outcome.shown_at_ms;
        let app = outcome.target_app.as_str();

        let usage = |since: i64, until: i64| -> Result<i64> {
            Ok(self
                .store
                .sessions(&RecordQuery::all().app(app).since(since).until(until))?
                .iter()
                .map(|s| s.duration_ms.max(0))
                .sum())
        };
        let before = usage(shown - window_ms, shown)?;
        let after = usage(shown, shown + window_ms)?;
        #[allow(clippy::cast_precision_loss)]
        let change = (before > 0).then(|| (after - before) as f64 / before as f64);

        let retention_start = shown + window_ms
            - self.config.retention_window_days.saturating_mul(DAY_MS);
        let retained = !self
            .store
            .explanations(
                &RecordQuery::all()
                    .since(retention_start)
                    .until(shown + window_ms)
                    .limit(1),
            )?
            .is_empty();

        Ok(LongTermSignals {
            usage_change: UsageChange::classify(change),
            usage_change_pct: change.map(|c| c * 100.0),
            retained,
            app_uninstalled: self.uninstalled_apps().contains(app),
            streak_maintained: None,
        })
    }
}
