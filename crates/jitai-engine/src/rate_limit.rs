//! Pre-scoring gates: switches, snooze, cooldown and hourly caps.

use jitai_core::clock::HOUR_MS;
use jitai_core::config::RateLimitConfig;
use jitai_core::state::{read_json, KEY_ENABLED, KEY_SNOOZE_UNTIL};
use jitai_core::{BlockingReason, InterventionContext, Persona, RateLimitChecks, RecordQuery, Store};
use tracing::{debug, warn};

/// Checks that ran and the first one that failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitOutcome {
    pub checks: RateLimitChecks,
    pub blocked: Option<BlockingReason>,
}

impl RateLimitOutcome {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.blocked.is_none()
    }

    fn block(mut self, reason: BlockingReason) -> Self {
        self.blocked = Some(reason);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    config: RateLimitConfig,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config }
    }

    /// Cooldown after scaling by the burden multiplier.
    #[must_use]
    pub fn cooldown_ms(&self, multiplier: f64) -> i64 {
        let base = i64::try_from(self.config.base_cooldown_secs.saturating_mul(1000))
            .unwrap_or(i64::MAX);
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        let scaled = (base as f64 * multiplier.max(1.0)).round() as i64;
        scaled
    }

    /// Runs the gates in order and stops at the first failure.
    ///
    /// A store read failure passes the gate it was needed for.
    pub fn check(
        &self,
        store: &dyn Store,
        ctx: &InterventionContext,
        persona: Persona,
        cooldown_multiplier: f64,
        now_ms: i64,
    ) -> RateLimitOutcome {
        let mut outcome = RateLimitOutcome::default();

        let enabled = read_json::<bool>(store, KEY_ENABLED) != Some(false);
        outcome.checks.feature_enabled = Some(enabled);
        if !enabled {
            return outcome.block(BlockingReason::FeatureDisabled);
        }

        outcome.checks.permission_granted = Some(ctx.overlay_permission_granted);
        if !ctx.overlay_permission_granted {
            return outcome.block(BlockingReason::PermissionDenied);
        }

        let snoozed = read_json::<i64>(store, KEY_SNOOZE_UNTIL).is_some_and(|until| until > now_ms);
        outcome.checks.snooze_clear = Some(!snoozed);
        if snoozed {
            return outcome.block(BlockingReason::UserSnooze);
        }

        let cooldown = self.cooldown_ms(cooldown_multiplier);
        let cooled = match store.interventions(&RecordQuery::all().limit(1)) {
            Ok(latest) => latest
                .first()
                .map_or(true, |last| now_ms - last.timestamp_ms >= cooldown),
            Err(err) => {
                warn!(error = %err, "cooldown history unavailable, passing gate");
                true
            }
        };
        outcome.checks.cooldown_passed = Some(cooled);
        if !cooled {
            debug!(cooldown_ms = cooldown, "cooldown active");
            return outcome.block(BlockingReason::BasicCooldown);
        }

        let cap = persona.max_per_hour();
        let under_cap = match store.interventions(&RecordQuery::all().since(now_ms - HOUR_MS)) {
            Ok(rows) => u32::try_from(rows.len()).unwrap_or(u32::MAX) < cap,
            Err(err) => {
                warn!(error = %err, "hourly history unavailable, passing gate");
                true
            }
        };
        outcome.checks.persona_frequency_passed = Some(under_cap);
        if !under_cap {
            debug!(?persona, cap, "hourly cap reached");
            return outcome.block(BlockingReason::PersonaFrequency);
        }

        outcome
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use jitai_core::clock::MINUTE_MS;
    use jitai_core::{ContentType, FrictionLevel, InterventionRecord, MemoryStore, Variant};

    const NOW: i64 = 1_700_000_000_000;

    fn ctx() -> InterventionContext {
        InterventionContext {
            timestamp_ms: NOW,
            target_app: "video".into(),
            ..InterventionContext::default()
        }
    }

    fn shown(at: i64) -> InterventionRecord {
        InterventionRecord {
            id: format!("i{at}"),
            timestamp_ms: at,
            target_app: "social".into(),
            content_type: ContentType::Quote,
            hour: 12,
            is_weekend: false,
            variant: Variant::Control,
            opportunity_score: 60,
            friction_level: FrictionLevel::Gentle,
            user_choice: None,
            decision_latency_ms: None,
            feedback: None,
        }
    }

    #[test]
    fn clean_store_passes_every_gate() {
        let store = MemoryStore::new();
        let out = RateLimiter::default().check(&store, &ctx(), Persona::CasualUser, 1.0, NOW);
        assert!(out.passed());
        assert_eq!(out.checks.persona_frequency_passed, Some(true));
    }

    #[test]
    fn disabled_wins_over_everything() {
        let store = MemoryStore::new();
        store.set(KEY_ENABLED, "false").unwrap();
        store.set(KEY_SNOOZE_UNTIL, &(NOW + MINUTE_MS).to_string()).unwrap();
        let mut context = ctx();
        context.overlay_permission_granted = false;
        let out = RateLimiter::default().check(&store, &context, Persona::CasualUser, 1.0, NOW);
        assert_eq!(out.blocked, Some(BlockingReason::FeatureDisabled));
        assert_eq!(out.checks.permission_granted, None);
    }

    #[test]
    fn permission_then_snooze() {
        let store = MemoryStore::new();
        store.set(KEY_SNOOZE_UNTIL, &(NOW + MINUTE_MS).to_string()).unwrap();
        let mut context = ctx();
        context.overlay_permission_granted = false;
        let limiter = RateLimiter::default();
        let out = limiter.check(&store, &context, Persona::CasualUser, 1.0, NOW);
        assert_eq!(out.blocked, Some(BlockingReason::PermissionDenied));

        let out = limiter.check(&store, &ctx(), Persona::CasualUser, 1.0, NOW);
        assert_eq!(out.blocked, Some(BlockingReason::UserSnooze));

        let out = limiter.check(&store, &ctx(), Persona::CasualUser, 1.0, NOW + 2 * MINUTE_MS);
        assert!(out.passed());
    }

    #[test]
    fn cooldown_scales_with_burden() {
        let store = MemoryStore::new();
        store.append_intervention(&shown(NOW - 7 * MINUTE_MS)).unwrap();
        let limiter = RateLimiter::default();
        assert!(limiter.check(&store, &ctx(), Persona::CasualUser, 1.0, NOW).passed());
        let out = limiter.check(&store, &ctx(), Persona::CasualUser, 2.0, NOW);
        assert_eq!(out.blocked, Some(BlockingReason::BasicCooldown));
        assert_eq!(limiter.cooldown_ms(1.5), 450_000);
    }

    #[test]
    fn hourly_cap_counts_every_app() {
        let store = MemoryStore::new();
        let cap = Persona::CasualUser.max_per_hour();
        for i in 0..cap {
            store
                .append_intervention(&shown(NOW - 50 * MINUTE_MS + i64::from(i)))
                .unwrap();
        }
        let out = RateLimiter::default().check(&store, &ctx(), Persona::CasualUser, 1.0, NOW);
        assert_eq!(out.blocked, Some(BlockingReason::PersonaFrequency));
        assert_eq!(out.checks.cooldown_passed, Some(true));
    }
}
