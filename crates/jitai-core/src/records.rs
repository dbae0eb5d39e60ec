//! Row types persisted in the record store.

use crate::types::{ContentType, Feedback, FrictionLevel, UserChoice, Variant};
use serde::{Deserialize, Serialize};

/// Stable identifier of one shown intervention.
pub type InterventionId = String;

#[must_use]
pub fn new_intervention_id() -> InterventionId {
    uuid::Uuid::new_v4().to_string()
}

/// One shown overlay and, once known, how the user answered it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionRecord {
    pub id: InterventionId,
    pub timestamp_ms: i64,
    pub target_app: String,
    pub content_type: ContentType,
    pub hour: u8,
    pub is_weekend: bool,
    pub variant: Variant,
    pub opportunity_score: u32,
    pub friction_level: FrictionLevel,
    #[serde(default)]
    pub user_choice: Option<UserChoice>,
    #[serde(default)]
    pub decision_latency_ms: Option<i64>,
    #[serde(default)]
    pub feedback: Option<Feedback>,
}

impl InterventionRecord {
    #[must_use]
    pub fn is_go_back(&self) -> bool {
        self.user_choice == Some(UserChoice::GoBack)
    }

    #[must_use]
    pub fn is_answered(&self) -> bool {
        self.user_choice.is_some()
    }
}

/// A foreground session of a monitored app, reported by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub target_app: String,
    pub start_ms: i64,
    pub duration_ms: i64,
}

impl SessionRecord {
    #[must_use]
    pub fn end_ms(&self) -> i64 {
        self.start_ms + self.duration_ms.max(0)
    }
}

/// Collection horizons in the order they must be filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Horizon {
    Proximal,
    ShortTerm,
    MediumTerm,
    LongTerm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximalSignals {
    pub user_choice: UserChoice,
    pub response_time_ms: i64,
    /// Number of interactions with the overlay before the choice.
    pub interaction_depth: u32,
    pub feedback: Option<Feedback>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortTermSignals {
    pub session_continued: bool,
    pub quick_reopen: bool,
    pub reopen_count_30m: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediumTermSignals {
    pub additional_sessions: u32,
    pub screen_time_ms: i64,
    /// `None` when no goal is known for the day.
    pub goal_met: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UsageChange {
    SignificantReduction,
    Reduction,
    Stable,
    Increase,
    Unknown,
}

impl UsageChange {
    /// Classifies a relative change (`-0.25` is a 25% drop).
    #[must_use]
    pub fn classify(change: Option<f64>) -> Self {
        match change {
            None => UsageChange::Unknown,
            Some(c) if c <= -0.20 => UsageChange::SignificantReduction,
            Some(c) if c <= -0.05 => UsageChange::Reduction,
            Some(c) if c < 0.05 => UsageChange::Stable,
            Some(_) => UsageChange::Increase,
        }
    }

    #[must_use]
    pub fn is_reduction(self) -> Option<bool> {
        match self {
            UsageChange::SignificantReduction | UsageChange::Reduction => Some(true),
            UsageChange::Stable | UsageChange::Increase => Some(false),
            UsageChange::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTermSignals {
    pub usage_change: UsageChange,
    pub usage_change_pct: Option<f64>,
    pub retained: bool,
    pub app_uninstalled: bool,
    pub streak_maintained: Option<bool>,
}

/// Multi-horizon behavioral result of one shown intervention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub intervention_id: InterventionId,
    pub target_app: String,
    pub content_type: ContentType,
    pub variant: Variant,
    pub shown_at_ms: i64,
    pub hour: u8,
    pub is_weekend: bool,

    pub proximal_collected: bool,
    pub short_term_collected: bool,
    pub medium_term_collected: bool,
    pub long_term_collected: bool,

    pub proximal: Option<ProximalSignals>,
    pub short_term: Option<ShortTermSignals>,
    pub medium_term: Option<MediumTermSignals>,
    pub long_term: Option<LongTermSignals>,

    /// Raw reward in `[-1, 1]` over everything collected so far.
    pub reward: Option<f64>,
    /// Whether the learners have already been fed for this intervention.
    pub reward_applied: bool,
    /// Bandit-scale reward the learners currently hold for this intervention.
    #[serde(default)]
    pub applied_bandit_reward: Option<f64>,
    /// Set once the long-term reward has been reconciled with the learners.
    #[serde(default)]
    pub final_reward_applied: bool,
    pub updated_at_ms: i64,
}

impl Outcome {
    #[must_use]
    pub fn pending(record: &InterventionRecord) -> Self {
        Self {
            intervention_id: record.id.clone(),
            target_app: record.target_app.clone(),
            content_type: record.content_type,
            variant: record.variant,
            shown_at_ms: record.timestamp_ms,
            hour: record.hour,
            is_weekend: record.is_weekend,
            proximal_collected: false,
            short_term_collected: false,
            medium_term_collected: false,
            long_term_collected: false,
            proximal: None,
            short_term: None,
            medium_term: None,
            long_term: None,
            reward: None,
            reward_applied: false,
            applied_bandit_reward: None,
            final_reward_applied: false,
            updated_at_ms: record.timestamp_ms,
        }
    }

    #[must_use]
    pub fn is_collected(&self, horizon: Horizon) -> bool {
        match horizon {
            Horizon::Proximal => self.proximal_collected,
            Horizon::ShortTerm => self.short_term_collected,
            Horizon::MediumTerm => self.medium_term_collected,
            Horizon::LongTerm => self.long_term_collected,
        }
    }

    /// The horizon that has to be collected before `horizon` may run.
    #[must_use]
    pub fn prerequisite(horizon: Horizon) -> Option<Horizon> {
        match horizon {
            Horizon::Proximal => None,
            Horizon::ShortTerm => Some(Horizon::Proximal),
            Horizon::MediumTerm => Some(Horizon::ShortTerm),
            Horizon::LongTerm => Some(Horizon::MediumTerm),
        }
    }

    /// True when `horizon` is next in line and not yet filled.
    #[must_use]
    pub fn is_ready_for(&self, horizon: Horizon) -> bool {
        !self.is_collected(horizon)
            && Self::prerequisite(horizon).map_or(true, |prev| self.is_collected(prev))
    }

    #[must_use]
    pub fn user_choice(&self) -> Option<UserChoice> {
        self.proximal.as_ref().map(|p| p.user_choice)
    }
}
