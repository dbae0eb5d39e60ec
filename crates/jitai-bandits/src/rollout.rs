//! Staged CONTROL/TREATMENT rollout with automatic rollback.
//!
//! Users are bucketed by `hash(user_id) mod 100 < percentage`. The bucket is
//! cached and only recomputed when the percentage changes. Each variant keeps
//! an EMA of binary success; a periodic check disables the rollout when
//! TREATMENT trails CONTROL by more than the configured relative margin.

use jitai_core::config::RolloutConfig;
use jitai_core::state::{self, VersionedState, KEY_ROLLOUT};
use jitai_core::{Store, Variant};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantStats {
    pub ema: Option<f64>,
    pub observations: u32,
}

impl VariantStats {
    fn observe(&mut self, success: bool, alpha: f64) {
        let x = if success { 1.0 } else { 0.0 };
        self.ema = Some(self.ema.map_or(x, |prev| prev + alpha * (x - prev)));
        self.observations = self.observations.saturating_add(1);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAssignment {
    pub percentage: u8,
    pub variant: Variant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutState {
    pub percentage: u8,
    pub enabled: bool,
    pub assignment: Option<CachedAssignment>,
    pub control: VariantStats,
    pub treatment: VariantStats,
    pub last_check_ms: Option<i64>,
    pub disabled_at_ms: Option<i64>,
    pub disabled_reason: Option<String>,
}

impl Default for RolloutState {
    fn default() -> Self {
        Self {
            percentage: RolloutConfig::default().percentage,
            enabled: true,
            assignment: None,
            control: VariantStats::default(),
            treatment: VariantStats::default(),
            last_check_ms: None,
            disabled_at_ms: None,
            disabled_reason: None,
        }
    }
}

impl VersionedState for RolloutState {
    const VERSION: u32 = 1;
}

/// Result of a periodic health check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RolloutCheck {
    NotDue,
    Disabled,
    InsufficientData { control: u32, treatment: u32 },
    Healthy { control: f64, treatment: f64 },
    RolledBack { control: f64, treatment: f64 },
}

/// Read-only view for analytics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutStatus {
    pub percentage: u8,
    pub enabled: bool,
    pub variant: Variant,
    pub control: VariantStats,
    pub treatment: VariantStats,
    pub disabled_reason: Option<String>,
}

/// Maps a user id onto `0..100`, identically in every process.
#[must_use]
pub fn bucket(user_id: &str) -> u8 {
    let digest = Sha256::digest(user_id.as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    #[allow(clippy::cast_possible_truncation)]
    let slot = (head % 100) as u8;
    slot
}

#[derive(Debug)]
pub struct RolloutController {
    user_id: String,
    config: RolloutConfig,
    state: RolloutState,
}

impl RolloutController {
    /// A fresh controller starting at the configured percentage.
    #[must_use]
    pub fn new(user_id: impl Into<String>, config: RolloutConfig) -> Self {
        let state = RolloutState {
            percentage: config.percentage.min(100),
            ..RolloutState::default()
        };
        Self {
            user_id: user_id.into(),
            config,
            state,
        }
    }

    /// Restores persisted state. The stored percentage wins over the config
    /// once a state row exists.
    #[must_use]
    pub fn load_from(store: &dyn Store, user_id: impl Into<String>, config: RolloutConfig) -> Self {
        let mut controller = Self::new(user_id, config);
        if matches!(store.get(KEY_ROLLOUT), Ok(Some(_))) {
            controller.state = state::load_or_default(store, KEY_ROLLOUT);
        }
        controller
    }

    pub fn save_to(&self, store: &dyn Store) -> bool {
        state::save_or_log(store, KEY_ROLLOUT, &self.state)
    }

    #[must_use]
    pub fn state(&self) -> &RolloutState {
        &self.state
    }

    /// The variant for this user right now.
    pub fn user_variant(&mut self) -> Variant {
        if !self.state.enabled || self.state.percentage == 0 {
            return Variant::Control;
        }
        match self.state.assignment {
            Some(cached) if cached.percentage == self.state.percentage => cached.variant,
            _ => {
                let variant = if bucket(&self.user_id) < self.state.percentage {
                    Variant::Treatment
                } else {
                    Variant::Control
                };
                self.state.assignment = Some(CachedAssignment {
                    percentage: self.state.percentage,
                    variant,
                });
                variant
            }
        }
    }

    pub fn set_percentage(&mut self, percentage: u8) {
        let percentage = percentage.min(100);
        if percentage != self.state.percentage {
            info!(from = self.state.percentage, to = percentage, "rollout percentage changed");
            self.state.percentage = percentage;
            self.state.assignment = None;
        }
    }

    pub fn record_outcome(&mut self, variant: Variant, success: bool) {
        let alpha = self.config.ema_alpha;
        match variant {
            Variant::Control => self.state.control.observe(success, alpha),
            Variant::Treatment => self.state.treatment.observe(success, alpha),
        }
    }

    /// Compares the variants at most once per check interval.
    pub fn check(&mut self, now_ms: i64) -> RolloutCheck {
        #[allow(clippy::cast_possible_wrap)]
        let interval_ms = (self.config.check_interval_secs as i64).saturating_mul(1000);
        if let Some(last) = self.state.last_check_ms {
            if now_ms - last < interval_ms {
                return RolloutCheck::NotDue;
            }
        }
        self.state.last_check_ms = Some(now_ms);

        if !self.state.enabled {
            return RolloutCheck::Disabled;
        }
        let (control, treatment) = (self.state.control, self.state.treatment);
        let min = self.config.min_observations;
        let (Some(control_ema), Some(treatment_ema)) = (control.ema, treatment.ema) else {
            return RolloutCheck::InsufficientData {
                control: control.observations,
                treatment: treatment.observations,
            };
        };
        if control.observations < min || treatment.observations < min {
            return RolloutCheck::InsufficientData {
                control: control.observations,
                treatment: treatment.observations,
            };
        }

        if treatment_ema < control_ema * (1.0 - self.config.rollback_margin) {
            let reason = format!(
                "treatment {treatment_ema:.3} trails control {control_ema:.3} by more than {:.0}%",
                self.config.rollback_margin * 100.0
            );
            warn!(%reason, "rolling back bandit rollout");
            self.state.enabled = false;
            self.state.disabled_at_ms = Some(now_ms);
            self.state.disabled_reason = Some(reason);
            self.state.assignment = None;
            return RolloutCheck::RolledBack {
                control: control_ema,
                treatment: treatment_ema,
            };
        }
        RolloutCheck::Healthy {
            control: control_ema,
            treatment: treatment_ema,
        }
    }

    /// Manual re-enable after a rollback.
    pub fn re_enable(&mut self) {
        if !self.state.enabled {
            info!("rollout re-enabled");
        }
        self.state.enabled = true;
        self.state.disabled_at_ms = None;
        self.state.disabled_reason = None;
        self.state.assignment = None;
    }

    pub fn status(&mut self) -> RolloutStatus {
        let variant = self.user_variant();
        RolloutStatus {
            percentage: self.state.percentage,
            enabled: self.state.enabled,
            variant,
            control: self.state.control,
            treatment: self.state.treatment,
            disabled_reason: self.state.disabled_reason.clone(),
        }
    }
}
